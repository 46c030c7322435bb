//! Core types - Strong typing for wire values

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Timestamps as the venue reports them (venue-local wall clock).
pub type VenueTime = NaiveDateTime;

/// Format used by every timestamp on the wire.
pub const VENUE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

/// Sender name for orders the engine issues on its own behalf.
pub const SYSTEM_SENDER: &str = "System";

pub fn parse_venue_time(raw: &str) -> Option<VenueTime> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "0" {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, VENUE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%d.%m.%Y %H:%M:%S%.f"))
        .ok()
}

pub fn format_venue_time(t: &VenueTime) -> String {
    t.format(VENUE_TIME_FORMAT).to_string()
}

/// Venue instrument code
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Seccode(String);

impl Seccode {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Seccode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Seccode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Price with arbitrary precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Price(Decimal);

impl Price {
    pub const ZERO: Price = Price(Decimal::ZERO);

    pub fn new(value: impl Into<Decimal>) -> Self {
        Self(value.into())
    }

    pub fn from_f64(value: f64) -> Self {
        Self(Decimal::try_from(value).unwrap_or(Decimal::ZERO))
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Decimal::from_str(raw.trim()).ok().map(Self)
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn as_f64(&self) -> f64 {
        self.0.to_f64().unwrap_or(0.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Snap to the instrument tick and render with its decimals.
    pub fn to_wire(&self, tick: Decimal, decimals: u32) -> String {
        let snapped = if tick > Decimal::ZERO {
            (self.0 / tick).round() * tick
        } else {
            self.0
        };
        format!("{:.*}", decimals as usize, snapped.round_dp(decimals))
    }

    /// Shift by a whole number of ticks.
    pub fn offset_ticks(&self, tick: Decimal, ticks: i64) -> Self {
        Self(self.0 + tick * Decimal::from(ticks))
    }
}

impl std::fmt::Display for Price {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_wire(raw: &str) -> Option<Self> {
        match raw.trim() {
            "B" => Some(Side::Buy),
            "S" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn wire(&self) -> &'static str {
        match self {
            Side::Buy => "B",
            Side::Sell => "S",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for buys, -1 for sells.
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// Side that moves a position by `delta`.
    pub fn for_delta(delta: i64) -> Option<Self> {
        match delta.signum() {
            1 => Some(Side::Buy),
            -1 => Some(Side::Sell),
            _ => None,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order status as reported by the venue, plus the locally assigned `Lost`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Forwarding,
    Inactive,
    Active,
    Watching,
    Matched,
    Cancelled,
    Disabled,
    Rejected,
    Expired,
    Denied,
    Refused,
    Removed,
    Lost,
}

impl OrderStatus {
    pub fn from_wire(raw: &str) -> Option<Self> {
        let status = match raw.trim() {
            "forwarding" => OrderStatus::Forwarding,
            "inactive" | "none" | "wait" => OrderStatus::Inactive,
            "active" => OrderStatus::Active,
            "watching" | "sl_guardtime" | "tp_guardtime" | "tp_correction"
            | "tp_correction_guardtime" | "sl_forwarding" | "tp_forwarding" => OrderStatus::Watching,
            "matched" | "sl_executed" | "tp_executed" => OrderStatus::Matched,
            "cancelled" => OrderStatus::Cancelled,
            "disabled" => OrderStatus::Disabled,
            "rejected" | "failed" => OrderStatus::Rejected,
            "expired" => OrderStatus::Expired,
            "denied" => OrderStatus::Denied,
            "refused" => OrderStatus::Refused,
            "removed" => OrderStatus::Removed,
            _ => return None,
        };
        Some(status)
    }

    /// Awaiting venue acknowledgement; the order may or may not be live.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, OrderStatus::Forwarding | OrderStatus::Inactive)
    }

    pub fn is_live(&self) -> bool {
        matches!(
            self,
            OrderStatus::Forwarding | OrderStatus::Inactive | OrderStatus::Active | OrderStatus::Watching
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_live()
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OrderStatus::Forwarding => "forwarding",
            OrderStatus::Inactive => "inactive",
            OrderStatus::Active => "active",
            OrderStatus::Watching => "watching",
            OrderStatus::Matched => "matched",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Disabled => "disabled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
            OrderStatus::Denied => "denied",
            OrderStatus::Refused => "refused",
            OrderStatus::Removed => "removed",
            OrderStatus::Lost => "lost",
        };
        f.write_str(s)
    }
}

/// Parse a numeric wire field, tolerating blanks.
pub fn parse_f64(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse().ok()
}

pub fn parse_i64(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().map(|v| v as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_to_wire_snaps_to_tick() {
        let price = Price::parse("101.237").unwrap();
        let tick = Decimal::from_str("0.05").unwrap();
        assert_eq!(price.to_wire(tick, 2), "101.25");
    }

    #[test]
    fn test_status_classes() {
        assert!(OrderStatus::from_wire("forwarding").unwrap().is_uncertain());
        assert!(OrderStatus::Watching.is_live());
        assert!(OrderStatus::Lost.is_terminal());
        assert_eq!(OrderStatus::from_wire("bogus"), None);
    }

    #[test]
    fn test_venue_time_zero_is_absent() {
        assert!(parse_venue_time("0").is_none());
        let t = parse_venue_time("14.10.2026 10:15:00").unwrap();
        assert_eq!(format_venue_time(&t), "14.10.2026 10:15:00");
    }
}
