//! Inbound section dispatch into the state store
//!
//! One handler per leading section tag. A record missing a required field is
//! logged and skipped; its siblings are still applied.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::parser::{Element, FieldReader, parse_document};
use crate::core::{
    Error, OrderStatus, Price, Result, Seccode, Side, parse_f64, parse_i64, parse_venue_time,
};
use crate::execution::attribution;
use crate::notify::EngineEvent;
use crate::state::bars::{Bar, Bars, MergeKind};
use crate::state::models::*;
use crate::state::{StateStore, Upsert};
use crate::supervisor::{ConnectionMonitor, StatusChange};

/// `candles` status meaning the venue has no data for the request.
const CANDLES_UNAVAILABLE: &str = "3";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub applied: usize,
    pub skipped: usize,
}

pub struct Dispatcher {
    store: Arc<StateStore>,
    monitor: Arc<ConnectionMonitor>,
}

impl Dispatcher {
    pub fn new(store: Arc<StateStore>, monitor: Arc<ConnectionMonitor>) -> Self {
        Self { store, monitor }
    }

    /// Apply one inbound blob.
    pub fn dispatch(&self, blob: &str) -> DispatchStats {
        let mut stats = DispatchStats::default();
        let roots = match parse_document(blob) {
            Ok(roots) => roots,
            Err(e) => {
                let preview: String = blob.chars().take(120).collect();
                warn!("unparsable inbound blob: {} ({})", e, preview);
                stats.skipped += 1;
                return stats;
            }
        };
        for section in &roots {
            self.dispatch_section(section, &mut stats);
        }
        stats
    }

    fn dispatch_section(&self, section: &Element, stats: &mut DispatchStats) {
        match section.name.as_str() {
            "server_status" => self.on_server_status(section),
            "candles" => self.on_candles(section, stats),
            "alltrades" => {
                for rec in section.children_named("trade") {
                    record(stats, "alltrades", self.on_market_trade(rec));
                }
            }
            "orders" => {
                for rec in &section.children {
                    let result = match rec.name.as_str() {
                        "order" => self.on_order(rec),
                        "stoporder" => self.on_stop_order(rec),
                        _ => continue,
                    };
                    record(stats, "orders", result);
                }
            }
            "trades" => {
                for rec in section.children_named("trade") {
                    record(stats, "trades", self.on_trade(rec));
                }
            }
            "positions" => {
                for rec in &section.children {
                    let result = match rec.name.as_str() {
                        "sec_position" => self.on_sec_position(rec),
                        "forts_position" => self.on_forts_position(rec),
                        "money_position" => self.on_money_position(rec),
                        "united_limits" => self.on_united_limits(rec),
                        other => {
                            debug!("positions: unhandled sub-kind {}", other);
                            continue;
                        }
                    };
                    record(stats, "positions", result);
                }
            }
            "mc_portfolio" => record(stats, "mc_portfolio", self.on_portfolio(section)),
            "sec_info" => record(stats, "sec_info", self.on_sec_info(section)),
            "sec_info_upd" => record(stats, "sec_info_upd", self.on_sec_info_upd(section)),
            "cln_sec_permissions" => record(stats, "cln_sec_permissions", self.on_permissions(section)),
            "securities" => {
                for rec in section.children_named("security") {
                    record(stats, "securities", self.on_security(rec));
                }
            }
            "client" => record(stats, "client", self.on_client(section)),
            "markets" => self.on_markets(section, stats),
            "candlekinds" => self.on_candle_kinds(section, stats),
            "messages" => {
                for rec in section.children_named("message") {
                    record(stats, "messages", self.on_message(rec));
                }
            }
            "error" => {
                let text = section.value().to_string();
                error!("venue error: {}", text);
                self.store.events().publish(EngineEvent::Notice { text, urgent: true });
                stats.applied += 1;
            }
            other => debug!("unhandled section <{}>", other),
        }
    }

    fn on_server_status(&self, section: &Element) {
        let connected = section.attr("connected").unwrap_or("false");
        let recover = section.attr("recover") == Some("true");
        match self.monitor.on_server_status(connected, recover, section.value()) {
            StatusChange::Connected => {
                let session = self.store.begin_session();
                info!(session, recover, "venue session up");
            }
            StatusChange::Disconnected => info!("venue session down"),
            StatusChange::Failed(text) => {
                error!("venue connection error: {}", text);
                self.store.events().publish(EngineEvent::Notice {
                    text: format!("connection error: {}", text),
                    urgent: true,
                });
            }
            StatusChange::Unchanged => {}
        }
    }

    fn seccode_of(&self, raw: Option<&str>, secid: Option<i64>) -> Option<Seccode> {
        raw.filter(|s| !s.is_empty())
            .map(Seccode::new)
            .or_else(|| secid.and_then(|id| self.store.security_by_secid(id)))
    }

    fn on_candles(&self, section: &Element, stats: &mut DispatchStats) {
        let secid = section.attr("secid").and_then(parse_i64);
        let Some(seccode) = self.seccode_of(section.attr("seccode"), secid) else {
            warn!("candles: no seccode, batch skipped");
            stats.skipped += 1;
            return;
        };
        if section.attr("status") == Some(CANDLES_UNAVAILABLE) {
            warn!(%seccode, "history data unavailable from venue; nothing merged");
            stats.skipped += 1;
            return;
        }

        let minutes = section
            .attr("period")
            .and_then(|p| p.parse::<u32>().ok())
            .and_then(|id| self.store.candle_kind_period(id))
            .map(|secs| (secs / 60).max(1))
            .unwrap_or(1);

        let mut bars = Vec::with_capacity(section.children.len());
        for candle in section.children_named("candle") {
            match parse_candle(candle) {
                Ok(bar) => bars.push(bar),
                Err(e) => {
                    warn!(%seccode, "candle skipped: {}", e);
                    stats.skipped += 1;
                }
            }
        }
        let batch = Bars::from_bars(minutes, bars);
        let current_tf = self.store.with_security(&seccode, |s| s.bars.timeframe).unwrap_or(minutes);
        if current_tf != minutes {
            warn!(%seccode, got = minutes, want = current_tf, "candles of unexpected timeframe ignored");
            stats.skipped += 1;
            return;
        }
        let kind = self.store.merge_bars(&seccode, batch);
        debug!(%seccode, ?kind, "candles merged");
        if kind != MergeKind::Empty {
            stats.applied += 1;
        }
    }

    fn on_market_trade(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("alltrades", rec);
        let secid = f.parsed("secid", parse_i64);
        let code = f.field("seccode");
        let _trade_no = f.parsed("tradeno", parse_i64);
        let time = f.require_parsed("time", parse_venue_time)?;
        let _board = f.field("board");
        let price = f.require_parsed("price", Price::parse)?;
        let seccode = self.seccode_of(code, secid).ok_or(Error::MissingField {
            section: "alltrades",
            field: "seccode",
        })?;
        self.store.set_last_trade(&seccode, price, time);
        Ok(())
    }

    fn on_order(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("orders", rec);
        let transaction_id = f.require_attr("transactionid").map(|v| parse_i64(v).unwrap_or(0))?;
        let order_no = f.parsed("orderno", parse_i64).unwrap_or(0);
        let secid = f.parsed("secid", parse_i64);
        let board = f.field("board").unwrap_or_default().to_string();
        let code = f.field("seccode");
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let status_raw = f.require("status")?;
        let status = OrderStatus::from_wire(status_raw)
            .ok_or_else(|| Error::Protocol(format!("orders: unknown status '{}'", status_raw)))?;
        let side = f.field("buysell").and_then(Side::from_wire);
        let registered = f.parsed("time", parse_venue_time);
        let brokerref = f.field("brokerref").unwrap_or_default().to_string();
        let balance = f.parsed("balance", parse_i64).unwrap_or(0);
        let price = f.parsed("price", Price::parse).unwrap_or(Price::ZERO);
        let quantity = f.parsed("quantity", parse_i64).unwrap_or(0);
        let withdrawn = f.parsed("withdrawtime", parse_venue_time);
        let cond_type = f.field("condition").unwrap_or("None").to_string();
        let cond_value = f.parsed("conditionvalue", Price::parse);
        let valid_after = f.parsed("validafter", parse_venue_time);
        let valid_before = f.parsed("validbefore", parse_venue_time);
        let result = f.field("result").unwrap_or_default().to_string();

        let lenient = matches!(
            status,
            OrderStatus::Forwarding | OrderStatus::Inactive | OrderStatus::Disabled | OrderStatus::Rejected
        );
        let seccode = self.seccode_of(code, secid);
        if !lenient {
            if order_no == 0 {
                return Err(Error::MissingField { section: "orders", field: "orderno" });
            }
            if seccode.is_none() {
                return Err(Error::MissingField { section: "orders", field: "seccode" });
            }
            if side.is_none() {
                return Err(Error::MissingField { section: "orders", field: "buysell" });
            }
        }

        let condition = (cond_type != "None" && !cond_type.is_empty()).then(|| Condition {
            cond_type,
            cond_value,
            valid_after,
            valid_before,
        });
        let order = Order {
            transaction_id,
            order_no,
            seccode: seccode.unwrap_or_default(),
            board,
            client,
            union,
            status,
            side: side.unwrap_or(Side::Buy),
            price,
            quantity,
            balance,
            by_market: price.is_zero(),
            registered,
            withdrawn,
            condition,
            sender: String::new(),
            signal: String::new(),
            note: String::new(),
            result,
            seen_session: 0,
        };
        if !brokerref.is_empty() {
            debug!(transaction_id, %brokerref, "order brokerref");
        }
        self.apply_order(order);
        Ok(())
    }

    fn on_stop_order(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("orders", rec);
        let transaction_id = f.require_attr("transactionid").map(|v| parse_i64(v).unwrap_or(0))?;
        let order_no = f.parsed("activeorderno", parse_i64).unwrap_or(0);
        let secid = f.parsed("secid", parse_i64);
        let board = f.field("board").unwrap_or_default().to_string();
        let code = f.field("seccode");
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let side = f.field("buysell").and_then(Side::from_wire);
        let _canceller = f.field("canceller");
        let _alltradeno = f.field("alltradeno");
        let valid_before = f.parsed("validbefore", parse_venue_time);
        let _author = f.field("author");
        let registered = f.parsed("accepttime", parse_venue_time);
        let _linked = f.field("linkedorderno");
        let _expdate = f.field("expdate");
        let status_raw = f.require("status")?;
        let status = OrderStatus::from_wire(status_raw)
            .ok_or_else(|| Error::Protocol(format!("stoporder: unknown status '{}'", status_raw)))?;
        let seccode = self.seccode_of(code, secid).ok_or(Error::MissingField {
            section: "orders",
            field: "seccode",
        })?;

        self.apply_order(Order {
            transaction_id,
            order_no,
            seccode,
            board,
            client,
            union,
            status,
            side: side.unwrap_or(Side::Buy),
            price: Price::ZERO,
            quantity: 0,
            balance: 0,
            by_market: false,
            registered,
            withdrawn: None,
            condition: Some(Condition {
                cond_type: "stop".into(),
                cond_value: None,
                valid_after: None,
                valid_before,
            }),
            sender: String::new(),
            signal: String::new(),
            note: String::new(),
            result: String::new(),
            seen_session: 0,
        });
        Ok(())
    }

    fn apply_order(&self, order: Order) {
        let (outcome, merged) = self.store.upsert_order(order);
        if outcome != Upsert::Unchanged {
            attribution::on_order(&self.store, merged, outcome == Upsert::Inserted);
        }
    }

    fn on_trade(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("trades", rec);
        let secid = f.parsed("secid", parse_i64);
        let trade_no = f.require_parsed("tradeno", parse_i64)?;
        let order_no = f.require_parsed("orderno", parse_i64)?;
        let board = f.field("board").unwrap_or_default().to_string();
        let code = f.require("seccode")?;
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let side = f.require_parsed("buysell", Side::from_wire)?;
        let time = f.require_parsed("time", parse_venue_time)?;
        let _brokerref = f.field("brokerref");
        let value = f.parsed("value", parse_f64).unwrap_or(0.0);
        let commission = f.parsed("comission", parse_f64).unwrap_or(0.0);
        let price = f.require_parsed("price", Price::parse)?;
        let quantity = f.require_parsed("quantity", parse_i64)?;

        let seccode = self.seccode_of(Some(code), secid).unwrap_or_else(|| Seccode::new(code));
        let trade = Trade {
            trade_no,
            order_no,
            seccode,
            board,
            client,
            union,
            side,
            price,
            quantity,
            time,
            value,
            commission,
            sender: String::new(),
            signal: String::new(),
            note: String::new(),
        };
        if attribution::on_trade(&self.store, trade).is_none() {
            debug!(trade_no, "duplicate trade ignored");
        }
        Ok(())
    }

    fn on_sec_position(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("sec_position", rec);
        let _secid = f.field("secid");
        let market = f.parsed("market", |v| v.parse::<u32>().ok()).unwrap_or(0);
        let seccode = Seccode::new(f.require("seccode")?);
        let _register = f.field("register");
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let _shortname = f.field("shortname");
        let saldo_in = f.parsed("saldoin", parse_i64).unwrap_or(0);
        let _saldo_min = f.field("saldomin");
        let bought = f.parsed("bought", parse_i64).unwrap_or(0);
        let sold = f.parsed("sold", parse_i64).unwrap_or(0);
        let saldo = f.require_parsed("saldo", parse_i64)?;
        self.store.set_position(Position {
            seccode,
            kind: PositionKind::Securities,
            market,
            client,
            union,
            saldo_in,
            saldo,
            bought,
            sold,
            pnl: 0.0,
        });
        Ok(())
    }

    fn on_forts_position(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("forts_position", rec);
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let market = f.parsed("market", |v| v.parse::<u32>().ok()).unwrap_or(MARKET_FORTS);
        let seccode = Seccode::new(f.require("seccode")?);
        let saldo_in = f.parsed("startnet", parse_i64).unwrap_or(0);
        let _open_buys = f.field("openbuys");
        let _open_sells = f.field("opensells");
        let saldo = f.require_parsed("totalnet", parse_i64)?;
        let bought = f.parsed("todaybuy", parse_i64).unwrap_or(0);
        let sold = f.parsed("todaysell", parse_i64).unwrap_or(0);
        let pnl = f.parsed("varmargin", parse_f64).unwrap_or(0.0);
        self.store.set_position(Position {
            seccode,
            kind: PositionKind::Forts,
            market,
            client,
            union,
            saldo_in,
            saldo,
            bought,
            sold,
            pnl,
        });
        Ok(())
    }

    fn on_money_position(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("money_position", rec);
        let client = f.field("client").unwrap_or_default().to_string();
        let union = f.field("union").unwrap_or_default().to_string();
        let _market = f.field("market");
        let asset = f.require("asset")?.to_string();
        let _shortname = f.field("shortname");
        let saldo_in = f.parsed("saldoin", parse_f64).unwrap_or(0.0);
        let _bought = f.field("bought");
        let _sold = f.field("sold");
        let saldo = f.require_parsed("saldo", parse_f64)?;
        self.store.set_money_position(MoneyPosition {
            client,
            union,
            asset,
            saldo_in,
            saldo,
        });
        Ok(())
    }

    fn on_united_limits(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("united_limits", rec);
        let union = f.field("union").unwrap_or_default().to_string();
        let open_equity = f.parsed("open_equity", parse_f64).unwrap_or(0.0);
        let equity = f.require_parsed("equity", parse_f64)?;
        let requirements = f.parsed("requirements", parse_f64).unwrap_or(0.0);
        let free = f.parsed("free", parse_f64).unwrap_or(0.0);
        let vm = f.parsed("vm", parse_f64).unwrap_or(0.0);
        let finres = f.parsed("finres", parse_f64).unwrap_or(0.0);
        let go = f.parsed("go", parse_f64).unwrap_or(0.0);
        self.store.set_united_limits(UnitedLimits {
            union,
            open_equity,
            equity,
            requirements,
            free,
            vm,
            finres,
            go,
        });
        Ok(())
    }

    fn on_portfolio(&self, section: &Element) -> Result<()> {
        let mut f = FieldReader::new("mc_portfolio", section);
        let union = f.attr("union").unwrap_or_default().to_string();
        let client = f.attr("client").unwrap_or_default().to_string();
        let open_equity = f.parsed("open_equity", parse_f64).unwrap_or(0.0);
        let equity = f.require_parsed("equity", parse_f64)?;
        let _chrgoff_ir = f.field("chrgoff_ir");
        let init_req = f.require_parsed("init_req", parse_f64)?;
        let _chrgoff_mr = f.field("chrgoff_mr");
        let maint_req = f.require_parsed("maint_req", parse_f64)?;
        let _reg_equity = f.field("reg_equity");
        let _reg_ir = f.field("reg_ir");
        let _reg_mr = f.field("reg_mr");
        let vm = f.parsed("vm", parse_f64).unwrap_or(0.0);
        let finres = f.parsed("finres", parse_f64).unwrap_or(0.0);
        let go = f.parsed("go", parse_f64).unwrap_or(0.0);

        let mut securities = Vec::new();
        for sec in section.children_named("security") {
            match parse_portfolio_security(sec) {
                Ok(line) => securities.push(line),
                Err(e) => warn!("mc_portfolio security skipped: {}", e),
            }
        }
        self.store.set_portfolio(Portfolio {
            union,
            client,
            open_equity,
            equity,
            init_req,
            maint_req,
            vm,
            finres,
            go,
            securities,
            generation: 0,
        });
        Ok(())
    }

    fn on_sec_info(&self, section: &Element) -> Result<()> {
        let mut f = FieldReader::new("sec_info", section);
        let secid = f.attr("secid").and_then(parse_i64);
        let shortname = f.field("secname").map(str::to_string);
        let code = f.field("seccode");
        let market = f.parsed("market", |v| v.parse::<u32>().ok());
        let _pname = f.field("pname");
        let clearing_price = f.parsed("clearing_price", parse_f64);
        let min_price = f.parsed("minprice", parse_f64);
        let max_price = f.parsed("maxprice", parse_f64);
        let buy_deposit = f.parsed("buy_deposit", parse_f64);
        let sell_deposit = f.parsed("sell_deposit", parse_f64);
        let point_cost = f.parsed("point_cost", parse_f64);
        let seccode = self.seccode_of(code, secid).ok_or(Error::MissingField {
            section: "sec_info",
            field: "seccode",
        })?;
        self.store.with_security_mut(&seccode, |sec| {
            if let Some(v) = shortname {
                sec.shortname = v;
            }
            if let Some(v) = market {
                sec.market = v;
            }
            apply_margin_fields(sec, clearing_price, min_price, max_price, buy_deposit, sell_deposit, point_cost);
        });
        Ok(())
    }

    fn on_sec_info_upd(&self, section: &Element) -> Result<()> {
        let mut f = FieldReader::new("sec_info_upd", section);
        let secid = f.parsed("secid", parse_i64);
        let code = f.field("seccode");
        let market = f.parsed("market", |v| v.parse::<u32>().ok());
        let min_price = f.parsed("minprice", parse_f64);
        let max_price = f.parsed("maxprice", parse_f64);
        let buy_deposit = f.parsed("buy_deposit", parse_f64);
        let sell_deposit = f.parsed("sell_deposit", parse_f64);
        let point_cost = f.parsed("point_cost", parse_f64);
        let seccode = self.seccode_of(code, secid).ok_or(Error::MissingField {
            section: "sec_info_upd",
            field: "seccode",
        })?;
        self.store.with_security_mut(&seccode, |sec| {
            if let Some(v) = market {
                sec.market = v;
            }
            apply_margin_fields(sec, None, min_price, max_price, buy_deposit, sell_deposit, point_cost);
        });
        Ok(())
    }

    fn on_permissions(&self, section: &Element) -> Result<()> {
        let mut f = FieldReader::new("cln_sec_permissions", section);
        let secid = f.parsed("secid", parse_i64);
        let code = f.field("seccode");
        let _market = f.field("market");
        let rates = RiskRates {
            riskrate_long: f.require_parsed("riskrate_long", parse_f64)?,
            reserate_long: f.parsed("reserate_long", parse_f64).unwrap_or(0.0),
            riskrate_short: f.require_parsed("riskrate_short", parse_f64)?,
            reserate_short: f.parsed("reserate_short", parse_f64).unwrap_or(0.0),
        };
        let seccode = self.seccode_of(code, secid).ok_or(Error::MissingField {
            section: "cln_sec_permissions",
            field: "seccode",
        })?;
        self.store.with_security_mut(&seccode, |sec| {
            sec.rates = Some(rates);
            sec.mark_margin_dirty();
        });
        Ok(())
    }

    fn on_security(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("securities", rec);
        let secid = f.attr("secid").and_then(parse_i64).unwrap_or(0);
        let active = f.attr("active") != Some("false");
        let seccode = Seccode::new(f.require("seccode")?);
        let board = f.field("board").unwrap_or_default().to_string();
        let market = f.parsed("market", |v| v.parse::<u32>().ok()).unwrap_or(0);
        let currency = f.field("currency").unwrap_or_default().to_string();
        let shortname = f.field("shortname").unwrap_or_default().to_string();
        let decimals = f.parsed("decimals", |v| v.parse::<u32>().ok()).unwrap_or(0);
        let min_step = f.parsed("minstep", Price::parse).map(|p| p.as_decimal());
        let lot_size = f.parsed("lotsize", parse_i64).unwrap_or(1);
        let point_cost = f.parsed("point_cost", parse_f64);

        self.store.with_security_mut(&seccode, |sec| {
            sec.secid = secid;
            sec.active = active;
            sec.board = board;
            sec.market = market;
            sec.currency = currency;
            sec.shortname = shortname;
            sec.decimals = decimals;
            if let Some(step) = min_step {
                sec.min_step = step;
            }
            sec.lot_size = lot_size.max(1);
            if let Some(cost) = point_cost {
                sec.point_cost = cost;
            }
        });
        Ok(())
    }

    fn on_client(&self, section: &Element) -> Result<()> {
        let mut f = FieldReader::new("client", section);
        let id = f.require_attr("id")?.to_string();
        let remove = f.attr("remove") == Some("true");
        let client = ClientAccount {
            id,
            client_type: f.field("type").unwrap_or_default().to_string(),
            currency: f.field("currency").unwrap_or_default().to_string(),
            market: f.parsed("market", |v| v.parse::<u32>().ok()).unwrap_or(0),
            union: f.field("union").unwrap_or_default().to_string(),
            forts_acc: f.field("forts_acc").unwrap_or_default().to_string(),
        };
        self.store.upsert_client(client, remove);
        Ok(())
    }

    fn on_markets(&self, section: &Element, stats: &mut DispatchStats) {
        let mut markets = HashMap::new();
        for market in section.children_named("market") {
            match market.attr("id").and_then(|v| v.parse::<u32>().ok()) {
                Some(id) => {
                    markets.insert(id, market.value().to_string());
                }
                None => {
                    warn!("markets: record without id skipped");
                    stats.skipped += 1;
                }
            }
        }
        stats.applied += markets.len();
        self.store.set_markets(markets);
    }

    fn on_candle_kinds(&self, section: &Element, stats: &mut DispatchStats) {
        let mut kinds = Vec::new();
        for kind in section.children_named("kind") {
            let mut f = FieldReader::new("candlekinds", kind);
            let parsed = (|| -> Result<CandleKind> {
                Ok(CandleKind {
                    id: f.require_parsed("id", |v| v.parse::<u32>().ok())?,
                    period: f.require_parsed("period", |v| v.parse::<u32>().ok())?,
                    name: f.field("name").unwrap_or_default().to_string(),
                })
            })();
            match parsed {
                Ok(k) => kinds.push(k),
                Err(e) => {
                    warn!("candlekinds record skipped: {}", e);
                    stats.skipped += 1;
                }
            }
        }
        stats.applied += kinds.len();
        self.store.set_candle_kinds(kinds);
    }

    fn on_message(&self, rec: &Element) -> Result<()> {
        let mut f = FieldReader::new("messages", rec);
        let date = f.parsed("date", parse_venue_time);
        let urgent = f.field("urgent") == Some("Y");
        let from = f.field("from").unwrap_or_default().to_string();
        let text = f.require("text")?.to_string();
        if urgent {
            self.store.events().publish(EngineEvent::Notice {
                text: format!("{}: {}", from, text),
                urgent: true,
            });
        }
        info!(%from, urgent, "venue message: {}", text);
        self.store.push_message(VenueMessage { date, urgent, from, text });
        Ok(())
    }
}

fn record(stats: &mut DispatchStats, section: &str, result: Result<()>) {
    match result {
        Ok(()) => stats.applied += 1,
        Err(e) => {
            warn!(section, "record skipped: {}", e);
            stats.skipped += 1;
        }
    }
}

fn parse_candle(candle: &Element) -> Result<Bar> {
    let attr = |name: &'static str| -> Result<&str> {
        candle.attr(name).ok_or(Error::MissingField { section: "candles", field: name })
    };
    let num = |name: &'static str| -> Result<f64> {
        parse_f64(attr(name)?).ok_or_else(|| Error::Protocol(format!("candles: bad {}", name)))
    };
    Ok(Bar {
        time: parse_venue_time(attr("date")?)
            .ok_or_else(|| Error::Protocol("candles: bad date".into()))?,
        open: num("open")?,
        high: num("high")?,
        low: num("low")?,
        close: num("close")?,
        volume: num("volume").unwrap_or(0.0),
    })
}

fn parse_portfolio_security(sec: &Element) -> Result<PortfolioSecurity> {
    let mut f = FieldReader::new("mc_portfolio", sec);
    let secid = f.attr("secid").and_then(parse_i64).unwrap_or(0);
    let market = f.parsed("market", |v| v.parse::<u32>().ok()).unwrap_or(0);
    let seccode = Seccode::new(f.require("seccode")?);
    let price = f.parsed("price", parse_f64).unwrap_or(0.0);
    let open_balance = f.parsed("open_balance", parse_i64).unwrap_or(0);
    let _bought = f.field("bought");
    let _sold = f.field("sold");
    let balance = f.require_parsed("balance", parse_i64)?;
    let init_req = f.parsed("init_req", parse_f64).unwrap_or(0.0);
    let maint_req = f.parsed("maint_req", parse_f64).unwrap_or(0.0);
    let pl = f.parsed("pl", parse_f64).unwrap_or(0.0);
    Ok(PortfolioSecurity {
        secid,
        seccode,
        market,
        price,
        open_balance,
        balance,
        init_req,
        maint_req,
        pl,
    })
}

fn apply_margin_fields(
    sec: &mut Security,
    clearing_price: Option<f64>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    buy_deposit: Option<f64>,
    sell_deposit: Option<f64>,
    point_cost: Option<f64>,
) {
    let mut touched = false;
    if let Some(v) = clearing_price {
        sec.clearing_price = v;
    }
    if let Some(v) = min_price {
        sec.min_price = v;
    }
    if let Some(v) = max_price {
        sec.max_price = v;
    }
    if let Some(v) = buy_deposit {
        sec.buy_deposit = v;
        touched = true;
    }
    if let Some(v) = sell_deposit {
        sec.sell_deposit = v;
        touched = true;
    }
    if let Some(v) = point_cost {
        sec.point_cost = v;
    }
    if touched {
        sec.mark_margin_dirty();
    }
}
