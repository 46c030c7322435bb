//! Outbound commands and the synchronous reply

use quick_xml::escape::escape;
use rust_decimal::Decimal;

use super::parser::parse_document;
use crate::core::{Error, Price, Result, Seccode, Side, VenueTime, format_venue_time};
use crate::state::models::Condition;

#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub login: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub rqdelay_ms: u64,
    pub session_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// How often the venue pushes limits and position equity
    pub push_interval_secs: u64,
}

/// Everything needed to place one order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub seccode: Seccode,
    pub board: String,
    pub client: String,
    pub union: String,
    pub side: Side,
    /// `None` places a market order
    pub price: Option<Price>,
    pub quantity: i64,
    pub tick: Decimal,
    pub decimals: u32,
    pub condition: Option<Condition>,
    /// Free-text tag echoed back on the order
    pub brokerref: String,
    pub use_credit: bool,
}

#[derive(Debug, Clone)]
pub enum Command {
    Connect(ConnectParams),
    Disconnect,
    ServerStatus,
    NewOrder(NewOrder),
    CancelOrder { transaction_id: i64 },
    SubscribeTrades(Vec<(String, Seccode)>),
    UnsubscribeTrades(Vec<(String, Seccode)>),
    GetHistory {
        board: String,
        seccode: Seccode,
        period: u32,
        count: u32,
        reset: bool,
    },
    GetSecuritiesInfo { market: u32, seccode: Seccode },
    GetClnSecPermissions {
        board: String,
        seccode: Seccode,
        client: String,
        union: String,
    },
    GetFortsPositions { client: String },
    GetMcPortfolio { union: String, client: String },
}

impl Command {
    /// The `id` attribute, used for logging.
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Connect(_) => "connect",
            Command::Disconnect => "disconnect",
            Command::ServerStatus => "server_status",
            Command::NewOrder(o) if o.condition.is_some() => "newcondorder",
            Command::NewOrder(_) => "neworder",
            Command::CancelOrder { .. } => "cancelorder",
            Command::SubscribeTrades(_) => "subscribe",
            Command::UnsubscribeTrades(_) => "unsubscribe",
            Command::GetHistory { .. } => "gethistorydata",
            Command::GetSecuritiesInfo { .. } => "get_securities_info",
            Command::GetClnSecPermissions { .. } => "get_cln_sec_permissions",
            Command::GetFortsPositions { .. } => "get_forts_positions",
            Command::GetMcPortfolio { .. } => "get_mc_portfolio",
        }
    }

    /// `true` for commands that carry credentials and must not be logged verbatim.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Command::Connect(_))
    }

    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(256);
        match self {
            Command::Connect(p) => {
                out.push_str(&format!(
                    "<command id=\"connect\"><login>{}</login><password>{}</password>\
                     <host>{}</host><port>{}</port><rqdelay>{}</rqdelay>\
                     <session_timeout>{}</session_timeout><request_timeout>{}</request_timeout>\
                     <push_u_limits>{}</push_u_limits><push_pos_equity>{}</push_pos_equity></command>",
                    escape(p.login.as_str()),
                    escape(p.password.as_str()),
                    escape(p.host.as_str()),
                    p.port,
                    p.rqdelay_ms,
                    p.session_timeout_secs,
                    p.request_timeout_secs,
                    p.push_interval_secs,
                    p.push_interval_secs
                ));
            }
            Command::Disconnect | Command::ServerStatus => {
                out.push_str(&format!("<command id=\"{}\"/>", self.verb()));
            }
            Command::NewOrder(o) => encode_order(&mut out, self.verb(), o),
            Command::CancelOrder { transaction_id } => {
                out.push_str(&format!(
                    "<command id=\"cancelorder\"><transactionid>{}</transactionid></command>",
                    transaction_id
                ));
            }
            Command::SubscribeTrades(list) | Command::UnsubscribeTrades(list) => {
                out.push_str(&format!("<command id=\"{}\"><alltrades>", self.verb()));
                for (board, seccode) in list {
                    out.push_str(&format!(
                        "<security><board>{}</board><seccode>{}</seccode></security>",
                        escape(board.as_str()),
                        escape(seccode.as_str())
                    ));
                }
                out.push_str("</alltrades></command>");
            }
            Command::GetHistory {
                board,
                seccode,
                period,
                count,
                reset,
            } => {
                out.push_str(&format!(
                    "<command id=\"gethistorydata\"><security><board>{}</board><seccode>{}</seccode></security>\
                     <period>{}</period><count>{}</count><reset>{}</reset></command>",
                    escape(board.as_str()),
                    escape(seccode.as_str()),
                    period,
                    count,
                    reset
                ));
            }
            Command::GetSecuritiesInfo { market, seccode } => {
                out.push_str(&format!(
                    "<command id=\"get_securities_info\"><security><market>{}</market><seccode>{}</seccode></security></command>",
                    market,
                    escape(seccode.as_str())
                ));
            }
            Command::GetClnSecPermissions {
                board,
                seccode,
                client,
                union,
            } => {
                out.push_str(&format!(
                    "<command id=\"get_cln_sec_permissions\"><security><board>{}</board><seccode>{}</seccode></security>",
                    escape(board.as_str()),
                    escape(seccode.as_str())
                ));
                push_account(&mut out, client, union);
                out.push_str("</command>");
            }
            Command::GetFortsPositions { client } => {
                out.push_str(&format!(
                    "<command id=\"get_forts_positions\" client=\"{}\"/>",
                    escape(client.as_str())
                ));
            }
            Command::GetMcPortfolio { union, client } => {
                if !union.is_empty() {
                    out.push_str(&format!(
                        "<command id=\"get_mc_portfolio\" union=\"{}\" currency=\"true\" asset=\"true\" money=\"true\" depo=\"true\" registers=\"true\" maxbs=\"true\"/>",
                        escape(union.as_str())
                    ));
                } else {
                    out.push_str(&format!(
                        "<command id=\"get_mc_portfolio\" client=\"{}\" currency=\"true\" asset=\"true\" money=\"true\" depo=\"true\" registers=\"true\" maxbs=\"true\"/>",
                        escape(client.as_str())
                    ));
                }
            }
        }
        out
    }

    /// Rendering safe for logs.
    pub fn redacted(&self) -> String {
        if self.is_sensitive() {
            format!("<command id=\"{}\"/> (credentials omitted)", self.verb())
        } else {
            self.encode()
        }
    }
}

fn push_account(out: &mut String, client: &str, union: &str) {
    if !union.is_empty() {
        out.push_str(&format!("<union>{}</union>", escape(union)));
    } else {
        out.push_str(&format!("<client>{}</client>", escape(client)));
    }
}

fn encode_order(out: &mut String, verb: &str, o: &NewOrder) {
    out.push_str(&format!(
        "<command id=\"{}\"><security><board>{}</board><seccode>{}</seccode></security>",
        verb,
        escape(o.board.as_str()),
        escape(o.seccode.as_str())
    ));
    push_account(out, &o.client, &o.union);
    match o.price {
        Some(price) => {
            out.push_str(&format!("<price>{}</price>", price.to_wire(o.tick, o.decimals)));
        }
        None => out.push_str("<price>0</price>"),
    }
    out.push_str(&format!(
        "<quantity>{}</quantity><buysell>{}</buysell>",
        o.quantity,
        o.side.wire()
    ));
    if o.price.is_none() {
        out.push_str("<bymarket/>");
    }
    if !o.brokerref.is_empty() {
        out.push_str(&format!("<brokerref>{}</brokerref>", escape(o.brokerref.as_str())));
    }
    if let Some(cond) = &o.condition {
        out.push_str(&format!("<cond_type>{}</cond_type>", escape(cond.cond_type.as_str())));
        if let Some(value) = cond.cond_value {
            out.push_str(&format!("<cond_value>{}</cond_value>", value.to_wire(o.tick, o.decimals)));
        }
        push_time(out, "validafter", cond.valid_after.as_ref());
        push_time(out, "validbefore", cond.valid_before.as_ref());
    }
    out.push_str("<unfilled>PutInQueue</unfilled>");
    if o.use_credit {
        out.push_str("<usecredit/>");
    }
    out.push_str("</command>");
}

fn push_time(out: &mut String, tag: &str, t: Option<&VenueTime>) {
    if let Some(t) = t {
        out.push_str(&format!("<{tag}>{}</{tag}>", format_venue_time(t)));
    }
}

/// Synchronous answer to a command.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Reply {
    pub success: bool,
    pub transaction_id: Option<i64>,
    pub message: String,
}

impl Reply {
    /// Parse `<result success=".." transactionid="..">` or `<error>..</error>`.
    pub fn parse(raw: &str) -> Result<Self> {
        let roots = parse_document(raw)?;
        let root = roots
            .first()
            .ok_or_else(|| Error::Protocol("empty command reply".into()))?;
        match root.name.as_str() {
            "result" => Ok(Reply {
                success: root.attr("success") == Some("true"),
                transaction_id: root.attr("transactionid").and_then(|v| v.parse().ok()),
                message: root
                    .child("message")
                    .map(|m| m.value().to_string())
                    .unwrap_or_else(|| root.value().to_string()),
            }),
            "error" => Ok(Reply {
                success: false,
                transaction_id: None,
                message: root.value().to_string(),
            }),
            other => Err(Error::Protocol(format!("unexpected reply element <{}>", other))),
        }
    }

    /// Case-insensitive search in the venue's message.
    pub fn mentions(&self, needle: &str) -> bool {
        self.message.to_lowercase().contains(&needle.to_lowercase())
    }

    /// Turn an unsuccessful reply into an error.
    pub fn into_result(self, verb: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::Trading(format!("{} rejected: {}", verb, self.message)))
        }
    }
}
