//! Domain records held by the state store

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::bars::Bars;
use crate::core::{OrderStatus, Price, Seccode, Side, VenueTime};

/// FORTS market id
pub const MARKET_FORTS: u32 = 4;

/// Conditional-order parameters (`newcondorder`, `stoporder`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Condition {
    pub cond_type: String,
    pub cond_value: Option<Price>,
    pub valid_after: Option<VenueTime>,
    pub valid_before: Option<VenueTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Client-assigned id; unique while `order_no` is zero
    pub transaction_id: i64,
    /// Venue-assigned id; stable identity once non-zero
    pub order_no: i64,
    pub seccode: Seccode,
    pub board: String,
    pub client: String,
    pub union: String,
    pub status: OrderStatus,
    pub side: Side,
    pub price: Price,
    pub quantity: i64,
    /// Unfilled lots
    pub balance: i64,
    pub by_market: bool,
    pub registered: Option<VenueTime>,
    pub withdrawn: Option<VenueTime>,
    pub condition: Option<Condition>,
    /// Owning strategy, `System`, or empty when unattributed
    pub sender: String,
    pub signal: String,
    pub note: String,
    /// Last venue text about this order
    pub result: String,
    /// Connection session in which the venue last reported this order
    pub seen_session: u64,
}

impl Order {
    pub fn filled(&self) -> i64 {
        self.quantity - self.balance
    }

    pub fn is_partially_filled(&self) -> bool {
        self.status.is_live() && self.balance > 0 && self.balance < self.quantity
    }

    /// Signed unfilled lots (buy positive).
    pub fn signed_balance(&self) -> i64 {
        self.side.sign() * self.balance
    }

    pub fn note_has(&self, tag: &str) -> bool {
        self.note.split_whitespace().any(|t| t == tag)
    }

    pub fn add_note(&mut self, tag: &str) {
        if self.note_has(tag) {
            return;
        }
        if !self.note.is_empty() {
            self.note.push(' ');
        }
        self.note.push_str(tag);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_no: i64,
    pub order_no: i64,
    pub seccode: Seccode,
    pub board: String,
    pub client: String,
    pub union: String,
    pub side: Side,
    pub price: Price,
    pub quantity: i64,
    pub time: VenueTime,
    pub value: f64,
    pub commission: f64,
    pub sender: String,
    pub signal: String,
    pub note: String,
}

impl Trade {
    pub fn signed_quantity(&self) -> i64 {
        self.side.sign() * self.quantity
    }
}

/// Anonymous market trade (`alltrades`), used for last price.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTrade {
    pub seccode: Seccode,
    pub trade_no: i64,
    pub time: VenueTime,
    pub price: Price,
    pub quantity: i64,
    pub side: Option<Side>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionKind {
    Securities,
    Forts,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub seccode: Seccode,
    pub kind: PositionKind,
    pub market: u32,
    pub client: String,
    pub union: String,
    /// Opening quantity
    pub saldo_in: i64,
    /// Current signed quantity; only ever set from venue reports
    pub saldo: i64,
    pub bought: i64,
    pub sold: i64,
    /// Running P/L (variation margin for FORTS)
    pub pnl: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MoneyPosition {
    pub client: String,
    pub union: String,
    pub asset: String,
    pub saldo_in: f64,
    pub saldo: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UnitedLimits {
    pub union: String,
    pub open_equity: f64,
    pub equity: f64,
    pub requirements: f64,
    pub free: f64,
    pub vm: f64,
    pub finres: f64,
    pub go: f64,
}

/// Per-security line of the multi-currency portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSecurity {
    pub secid: i64,
    pub seccode: Seccode,
    pub market: u32,
    pub price: f64,
    pub open_balance: i64,
    pub balance: i64,
    pub init_req: f64,
    pub maint_req: f64,
    pub pl: f64,
}

/// Aggregate account state, replaced wholesale on every `mc_portfolio`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Portfolio {
    pub union: String,
    pub client: String,
    pub open_equity: f64,
    pub equity: f64,
    /// Initial requirement total
    pub init_req: f64,
    /// Maintenance (minimum) requirement total
    pub maint_req: f64,
    /// Variance margin
    pub vm: f64,
    pub finres: f64,
    pub go: f64,
    pub securities: Vec<PortfolioSecurity>,
    /// Bumped on each refresh so waiters can tell a fresh snapshot
    pub generation: u64,
}

impl Portfolio {
    pub fn free_funds(&self) -> f64 {
        self.equity - self.init_req
    }

    /// Initial requirements as % of equity
    pub fn share_init_reqs(&self) -> f64 {
        if self.equity > 0.0 {
            self.init_req / self.equity * 100.0
        } else {
            0.0
        }
    }

    /// Minimum requirements as % of equity
    pub fn share_min_reqs(&self) -> f64 {
        if self.equity > 0.0 {
            self.maint_req / self.equity * 100.0
        } else {
            0.0
        }
    }
}

/// Client-level margin rates from `cln_sec_permissions` (percent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RiskRates {
    pub riskrate_long: f64,
    pub reserate_long: f64,
    pub riskrate_short: f64,
    pub reserate_short: f64,
}

/// Per-lot requirements derived from margin data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Requirements {
    pub init_long: f64,
    pub init_short: f64,
    pub min_long: f64,
    pub min_short: f64,
}

impl Requirements {
    pub fn max_init(&self) -> f64 {
        self.init_long.max(self.init_short)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Security {
    pub secid: i64,
    pub seccode: Seccode,
    pub board: String,
    pub market: u32,
    pub currency: String,
    pub shortname: String,
    pub active: bool,
    pub decimals: u32,
    pub min_step: Decimal,
    pub lot_size: i64,
    pub point_cost: f64,

    pub clearing_price: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub buy_deposit: f64,
    pub sell_deposit: f64,
    pub rates: Option<RiskRates>,
    pub requirements: Requirements,

    pub last_price: Option<Price>,
    pub last_trade_time: Option<VenueTime>,
    /// One-minute source series
    pub bars: Bars,

    #[serde(skip)]
    pub margin_dirty_since: Option<Instant>,
}

impl Security {
    pub fn new(seccode: Seccode) -> Self {
        Self {
            secid: 0,
            seccode,
            board: String::new(),
            market: 0,
            currency: String::new(),
            shortname: String::new(),
            active: true,
            decimals: 0,
            min_step: Decimal::ONE,
            lot_size: 1,
            point_cost: 1.0,
            clearing_price: 0.0,
            min_price: 0.0,
            max_price: 0.0,
            buy_deposit: 0.0,
            sell_deposit: 0.0,
            rates: None,
            requirements: Requirements::default(),
            last_price: None,
            last_trade_time: None,
            bars: Bars::new(1),
            margin_dirty_since: None,
        }
    }

    pub fn is_forts(&self) -> bool {
        self.market == MARKET_FORTS
    }

    pub fn mark_margin_dirty(&mut self) {
        self.margin_dirty_since = Some(Instant::now());
    }

    /// Reference price for requirement math: last trade, else last bar close.
    pub fn reference_price(&self) -> Option<f64> {
        self.last_price
            .map(|p| p.as_f64())
            .filter(|p| *p > 0.0)
            .or_else(|| self.bars.last_close())
    }

    /// Recompute per-lot requirements. `rate` converts the security's
    /// currency into the portfolio's base currency.
    pub fn recompute_requirements(&mut self, rate: f64) {
        if self.is_forts() {
            self.requirements = Requirements {
                init_long: self.buy_deposit,
                init_short: self.sell_deposit,
                min_long: self.buy_deposit * 0.8,
                min_short: self.sell_deposit * 0.8,
            };
        } else if let (Some(rates), Some(price)) = (self.rates, self.reference_price()) {
            let notional = price * self.lot_size as f64 * rate;
            self.requirements = Requirements {
                init_long: notional * (rates.riskrate_long + rates.reserate_long) / 100.0,
                init_short: notional * (rates.riskrate_short + rates.reserate_short) / 100.0,
                min_long: notional * rates.riskrate_long / 100.0,
                min_short: notional * rates.riskrate_short / 100.0,
            };
        }
        self.margin_dirty_since = None;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClientAccount {
    pub id: String,
    pub client_type: String,
    pub currency: String,
    pub market: u32,
    pub union: String,
    pub forts_acc: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleKind {
    pub id: u32,
    /// Seconds per candle
    pub period: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueMessage {
    pub date: Option<VenueTime>,
    pub urgent: bool,
    pub from: String,
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forts_requirements_from_deposits() {
        let mut sec = Security::new(Seccode::new("SiZ6"));
        sec.market = MARKET_FORTS;
        sec.buy_deposit = 12_000.0;
        sec.sell_deposit = 11_000.0;
        sec.recompute_requirements(1.0);
        assert_eq!(sec.requirements.init_long, 12_000.0);
        assert_eq!(sec.requirements.max_init(), 12_000.0);
    }

    #[test]
    fn test_stock_requirements_from_rates() {
        let mut sec = Security::new(Seccode::new("SBER"));
        sec.market = 1;
        sec.lot_size = 10;
        sec.last_price = Some(Price::from_f64(300.0));
        sec.rates = Some(RiskRates {
            riskrate_long: 20.0,
            reserate_long: 5.0,
            riskrate_short: 30.0,
            reserate_short: 5.0,
        });
        sec.recompute_requirements(1.0);
        assert!((sec.requirements.init_long - 750.0).abs() < 1e-9);
        assert!((sec.requirements.min_short - 900.0).abs() < 1e-9);
    }

    #[test]
    fn test_order_notes_are_tags() {
        let mut order = test_order();
        order.add_note("PartEx");
        order.add_note("PartEx");
        order.add_note("NM");
        assert_eq!(order.note, "PartEx NM");
        assert!(order.note_has("NM"));
    }

    pub(crate) fn test_order() -> Order {
        Order {
            transaction_id: 1,
            order_no: 0,
            seccode: Seccode::new("SiZ6"),
            board: "FUT".into(),
            client: String::new(),
            union: String::new(),
            status: OrderStatus::Forwarding,
            side: Side::Buy,
            price: Price::from_f64(100.0),
            quantity: 1,
            balance: 1,
            by_market: false,
            registered: None,
            withdrawn: None,
            condition: None,
            sender: String::new(),
            signal: String::new(),
            note: String::new(),
            result: String::new(),
            seen_session: 0,
        }
    }
}
