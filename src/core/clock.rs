//! Wall clock in the venue's timezone

use chrono::{Datelike, Duration, FixedOffset, NaiveTime, Offset, Utc, Weekday};

use super::types::VenueTime;

/// Venue-local wall clock. The venue stamps everything in its own offset,
/// so comparisons against reported times must use the same one.
#[derive(Debug, Clone, Copy)]
pub struct VenueClock {
    offset: FixedOffset,
}

impl VenueClock {
    pub fn new(utc_offset_hours: i32) -> Self {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .unwrap_or_else(|| Utc.fix());
        Self { offset }
    }

    pub fn now(&self) -> VenueTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

impl Default for VenueClock {
    fn default() -> Self {
        Self::new(3)
    }
}

pub fn is_weekend(t: &VenueTime) -> bool {
    matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Daily trading window, `start..end` in venue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl TradingHours {
    pub fn contains(&self, t: &VenueTime) -> bool {
        if is_weekend(t) {
            return false;
        }
        let time = t.time();
        time >= self.start && time < self.end
    }
}

/// Next occurrence of `at` strictly after `now`.
pub fn next_daily(now: &VenueTime, at: NaiveTime) -> VenueTime {
    let today = now.date().and_time(at);
    if today > *now {
        today
    } else {
        today + Duration::days(1)
    }
}

pub fn parse_hhmm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}
