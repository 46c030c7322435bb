//! Risk engine - position bounds, readiness and balance normalization

pub mod derisk;

use chrono::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::clock::is_weekend;
use crate::core::config::RiskConfig;
use crate::core::{Seccode, Side, VenueTime};
use crate::state::StateStore;
use crate::state::models::{Order, Portfolio, Security};
use crate::state::tool::Tool;

/// How long a position may exceed its bound before trading is blocked.
const DEVIATION_GRACE_WEEKDAY: Duration = Duration::hours(4);
const DEVIATION_GRACE_WEEKEND: Duration = Duration::hours(12);

/// Accepted long/short requirement ratio.
const REQUIREMENT_RATIO: (f64, f64) = (0.5, 2.0);

/// A condition that keeps a tool from trading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskBreach {
    #[error("{0}: no security data")]
    UnknownSecurity(Seccode),

    #[error("{0}: no price and no bars")]
    NoPrice(Seccode),

    #[error("{seccode}: last trade is {age_secs}s old")]
    StalePrice { seccode: Seccode, age_secs: i64 },

    #[error("{0}: no bar history")]
    NoBars(Seccode),

    #[error("{seccode}: no conversion rate for {currency}")]
    NoCurrencyRate { seccode: Seccode, currency: String },

    #[error("{seccode}: requirement {requirement:.2} below floor {floor:.2}")]
    RequirementTooLow { seccode: Seccode, requirement: f64, floor: f64 },

    #[error("{seccode}: long/short requirement ratio {ratio:.2} out of range")]
    RequirementSkew { seccode: Seccode, ratio: f64 },

    #[error("portfolio equity is not positive")]
    NoEquity,

    #[error("equity {equity:.2} departs from average {average:.2}")]
    EquityOutOfBand { equity: f64, average: f64 },

    #[error("{seccode}: position {position} exceeds bound {bound} since {since}")]
    Deviation {
        seccode: Seccode,
        position: i64,
        bound: i64,
        since: VenueTime,
    },
}

/// Everything one assessment reads, captured at one point in time.
#[derive(Debug, Clone)]
pub struct RiskInputs {
    pub security: Option<Security>,
    pub currency_rate: Option<f64>,
    pub portfolio: Portfolio,
    pub equity_average: Option<f64>,
    /// Venue-reported signed position
    pub saldo: i64,
}

impl RiskInputs {
    pub fn gather(store: &StateStore, tool: &Tool) -> Self {
        let security = store.security(&tool.seccode);
        let currency_rate = security.as_ref().and_then(|s| store.currency_rate(&s.currency));
        Self {
            security,
            currency_rate,
            portfolio: store.portfolio(),
            equity_average: store.equity_average(),
            saldo: store.saldo(&tool.seccode),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assessment {
    pub long_volume: i64,
    pub short_volume: i64,
    /// Trading-blocking conditions
    pub blockers: Vec<RiskBreach>,
    /// Logged, not yet blocking
    pub warnings: Vec<RiskBreach>,
    /// Carried into `Tool::deviation_since`
    pub deviation_since: Option<VenueTime>,
}

impl Assessment {
    pub fn ready(&self) -> bool {
        self.blockers.is_empty()
    }

    /// Bound on the side a signed position sits on.
    pub fn bound_for(&self, position: i64) -> i64 {
        if position >= 0 { self.long_volume } else { self.short_volume }
    }
}

/// What balance normalization wants done this cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    InSync,
    /// Gap seen for the first time; wait one more cycle
    Observed { gap: i64 },
    /// A corrective or other order is already working
    Waiting { gap: i64 },
    Correct { side: Side, quantity: i64, by_market: bool },
}

/// Lots affordable for `equity * share_of_funds / 100`, capped at the
/// per-position ceiling and clamped into `[min_lots, max_lots]`.
pub fn position_volume(
    equity: f64,
    share_of_funds: f64,
    ceiling_share: f64,
    requirement: f64,
    min_lots: i64,
    max_lots: i64,
) -> i64 {
    if requirement <= 0.0 || equity <= 0.0 {
        return 0;
    }
    let optimal = equity * share_of_funds.min(ceiling_share) / 100.0;
    let lots = (optimal / requirement).floor() as i64;
    lots.clamp(min_lots, max_lots.max(min_lots))
}

/// Fixed lot count, cut back when `lots * requirement` breaks the ceiling.
pub fn fixed_volume(equity: f64, ceiling_share: f64, lots: i64, max_requirement: f64) -> i64 {
    if max_requirement <= 0.0 {
        return 0;
    }
    let ceiling = equity * ceiling_share / 100.0;
    if lots as f64 * max_requirement > ceiling {
        ((ceiling / max_requirement).floor() as i64).max(0)
    } else {
        lots
    }
}

pub struct RiskEngine {
    config: RiskConfig,
}

impl RiskEngine {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Bounds and readiness for one tool.
    pub fn assess(&self, tool: &Tool, inputs: &RiskInputs, now: VenueTime) -> Assessment {
        let mut out = Assessment::default();
        let seccode = &tool.seccode;

        let Some(sec) = inputs.security.as_ref() else {
            out.blockers.push(RiskBreach::UnknownSecurity(seccode.clone()));
            return out;
        };

        let price = sec.reference_price();
        if price.is_none() {
            out.blockers.push(RiskBreach::NoPrice(seccode.clone()));
        }
        if let Some(last) = sec.last_trade_time {
            let age = (now - last).num_seconds();
            if age > self.config.max_price_age_secs {
                out.blockers.push(RiskBreach::StalePrice {
                    seccode: seccode.clone(),
                    age_secs: age,
                });
            }
        }
        if sec.bars.is_empty() {
            out.blockers.push(RiskBreach::NoBars(seccode.clone()));
        }
        let Some(rate) = inputs.currency_rate else {
            out.blockers.push(RiskBreach::NoCurrencyRate {
                seccode: seccode.clone(),
                currency: sec.currency.clone(),
            });
            return out;
        };

        let equity = inputs.portfolio.equity;
        if equity <= 0.0 {
            out.blockers.push(RiskBreach::NoEquity);
        } else if let Some(average) = inputs.equity_average.filter(|a| *a > 0.0) {
            if ((equity - average) / average).abs() > self.config.equity_tolerance {
                out.blockers.push(RiskBreach::EquityOutOfBand { equity, average });
            }
        }

        let req = sec.requirements;
        let requirements_ok = match price {
            Some(price) => self.check_requirements(sec, price * rate, &mut out),
            None => false,
        };

        if requirements_ok {
            let ceiling = self.config.max_share_init_reqs_position;
            match tool.fixed_lots {
                Some(lots) => {
                    let lots = fixed_volume(equity, ceiling, lots, req.max_init());
                    out.long_volume = lots;
                    out.short_volume = lots;
                }
                None => {
                    out.long_volume =
                        position_volume(equity, tool.share_of_funds, ceiling, req.init_long, tool.min_lots, tool.max_lots);
                    out.short_volume =
                        position_volume(equity, tool.share_of_funds, ceiling, req.init_short, tool.min_lots, tool.max_lots);
                }
            }
        }

        self.check_deviation(tool, inputs.saldo, now, &mut out);
        debug!(
            tool = %tool.name,
            long = out.long_volume,
            short = out.short_volume,
            blockers = out.blockers.len(),
            "risk assessed"
        );
        out
    }

    fn check_requirements(&self, sec: &Security, price_in_base: f64, out: &mut Assessment) -> bool {
        let req = sec.requirements;
        let point_cost = if sec.is_forts() { sec.point_cost } else { 1.0 };
        let notional = price_in_base * sec.lot_size as f64 * point_cost;
        let floor = notional * self.config.min_req_share;

        for requirement in [req.init_long, req.init_short] {
            if requirement <= 0.0 || requirement < floor {
                out.blockers.push(RiskBreach::RequirementTooLow {
                    seccode: sec.seccode.clone(),
                    requirement,
                    floor,
                });
                return false;
            }
        }
        let ratio = req.init_long / req.init_short;
        if !(REQUIREMENT_RATIO.0..=REQUIREMENT_RATIO.1).contains(&ratio) {
            out.blockers.push(RiskBreach::RequirementSkew {
                seccode: sec.seccode.clone(),
                ratio,
            });
            return false;
        }
        true
    }

    fn check_deviation(&self, tool: &Tool, saldo: i64, now: VenueTime, out: &mut Assessment) {
        let bound = out.bound_for(saldo);
        let limit = (bound as f64 * self.config.deviation_multiple).max(1.0);
        if (saldo.abs() as f64) <= limit {
            out.deviation_since = None;
            return;
        }

        let since = tool.deviation_since.unwrap_or(now);
        out.deviation_since = Some(since);
        let breach = RiskBreach::Deviation {
            seccode: tool.seccode.clone(),
            position: saldo,
            bound,
            since,
        };
        let grace = if is_weekend(&now) {
            DEVIATION_GRACE_WEEKEND
        } else {
            DEVIATION_GRACE_WEEKDAY
        };
        if now - since > grace {
            out.blockers.push(breach);
        } else {
            warn!(tool = %tool.name, "{}", breach);
            out.warnings.push(breach);
        }
    }

    /// Reconcile the venue position with what the strategies intend.
    ///
    /// The gap has to survive a second cycle before anything is sent, and no
    /// correction goes out while any order on the instrument is live.
    pub fn normalization(&self, tool: &Tool, saldo: i64, live: &[Order], now: VenueTime) -> Normalization {
        let gap = tool.intended_position() - saldo;
        let Some(side) = Side::for_delta(gap) else {
            return Normalization::InSync;
        };
        if !live.is_empty() {
            return Normalization::Waiting { gap };
        }
        let Some(since) = tool.normalization_since else {
            return Normalization::Observed { gap };
        };
        let by_market = (now - since).num_seconds() >= self.config.normalization_market_after_secs;
        Normalization::Correct {
            side,
            quantity: gap.abs(),
            by_market,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderStatus, Price};
    use crate::state::bars::{Bar, Bars};
    use crate::state::models::{MARKET_FORTS, Trade};
    use crate::testing::{order, t, tool_config, trade};

    fn forts_security(init: f64) -> Security {
        let mut sec = Security::new(Seccode::new("SiZ6"));
        sec.market = MARKET_FORTS;
        sec.buy_deposit = init;
        sec.sell_deposit = init;
        sec.last_price = Some(Price::from_f64(90_000.0));
        sec.last_trade_time = Some(t("14.10.2026 11:59:00"));
        sec.bars = Bars::from_bars(
            1,
            [Bar {
                time: t("14.10.2026 11:59:00"),
                open: 90_000.0,
                high: 90_000.0,
                low: 90_000.0,
                close: 90_000.0,
                volume: 1.0,
            }],
        );
        sec.recompute_requirements(1.0);
        sec
    }

    fn inputs(equity: f64, init: f64, saldo: i64) -> RiskInputs {
        RiskInputs {
            security: Some(forts_security(init)),
            currency_rate: Some(1.0),
            portfolio: Portfolio {
                equity,
                ..Default::default()
            },
            equity_average: Some(equity),
            saldo,
        }
    }

    fn tool() -> Tool {
        let mut cfg = tool_config("si", "SiZ6", &["s1"]);
        cfg.share_of_funds = 5.0;
        cfg.min_lots = 0;
        cfg.max_lots = 10;
        Tool::from_config(&cfg)
    }

    #[test]
    fn test_position_volume_scenario() {
        assert_eq!(position_volume(1_000_000.0, 5.0, 15.0, 20_000.0, 0, 10), 2);
    }

    #[test]
    fn test_position_volume_clamps() {
        assert_eq!(position_volume(1_000_000.0, 15.0, 15.0, 1_000.0, 0, 10), 10);
        assert_eq!(position_volume(1_000_000.0, 1.0, 15.0, 50_000.0, 1, 10), 1);
        // share above the ceiling is capped at the ceiling
        assert_eq!(position_volume(1_000_000.0, 40.0, 15.0, 10_000.0, 0, 100), 15);
        assert_eq!(position_volume(1_000_000.0, 5.0, 15.0, 0.0, 0, 10), 0);
    }

    #[test]
    fn test_position_volume_matches_formula() {
        for share in [0.5, 1.0, 3.0, 7.5, 15.0] {
            for req in [900.0, 5_000.0, 33_333.0] {
                let expected = (1_234_567.0_f64 * share / 100.0 / req).floor() as i64;
                assert_eq!(
                    position_volume(1_234_567.0, share, 15.0, req, 0, 50),
                    expected.clamp(0, 50)
                );
            }
        }
    }

    #[test]
    fn test_fixed_lots_respect_ceiling() {
        assert_eq!(fixed_volume(1_000_000.0, 15.0, 5, 20_000.0), 5);
        assert_eq!(fixed_volume(1_000_000.0, 15.0, 10, 20_000.0), 7);
    }

    #[test]
    fn test_assess_ready() {
        let engine = RiskEngine::new(RiskConfig::default());
        let a = engine.assess(&tool(), &inputs(1_000_000.0, 20_000.0, 0), t("14.10.2026 12:00:00"));
        assert!(a.ready(), "{:?}", a.blockers);
        assert_eq!((a.long_volume, a.short_volume), (2, 2));
    }

    #[test]
    fn test_stale_price_blocks() {
        let engine = RiskEngine::new(RiskConfig::default());
        let a = engine.assess(&tool(), &inputs(1_000_000.0, 20_000.0, 0), t("14.10.2026 13:00:00"));
        assert!(matches!(a.blockers[0], RiskBreach::StalePrice { .. }));
    }

    #[test]
    fn test_missing_rate_blocks() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut inp = inputs(1_000_000.0, 20_000.0, 0);
        inp.currency_rate = None;
        let a = engine.assess(&tool(), &inp, t("14.10.2026 12:00:00"));
        assert!(matches!(a.blockers.last(), Some(RiskBreach::NoCurrencyRate { .. })));
    }

    #[test]
    fn test_requirement_sanity() {
        let engine = RiskEngine::new(RiskConfig::default());
        // 90_000 notional * 1% floor = 900; 100 is implausibly low
        let a = engine.assess(&tool(), &inputs(1_000_000.0, 100.0, 0), t("14.10.2026 12:00:00"));
        assert!(matches!(a.blockers[0], RiskBreach::RequirementTooLow { .. }));
        assert_eq!(a.long_volume, 0);

        let mut inp = inputs(1_000_000.0, 20_000.0, 0);
        if let Some(sec) = inp.security.as_mut() {
            sec.requirements.init_short = 50_000.0;
        }
        let a = engine.assess(&tool(), &inp, t("14.10.2026 12:00:00"));
        assert!(matches!(a.blockers[0], RiskBreach::RequirementSkew { .. }));
    }

    #[test]
    fn test_equity_band() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut inp = inputs(1_000_000.0, 20_000.0, 0);
        inp.equity_average = Some(2_000_000.0);
        let a = engine.assess(&tool(), &inp, t("14.10.2026 12:00:00"));
        assert!(matches!(a.blockers[0], RiskBreach::EquityOutOfBand { .. }));
    }

    #[test]
    fn test_deviation_grace_window() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut tool = tool();
        // bound 2, multiple 1.5 -> 5 lots is a deviation
        let first = engine.assess(&tool, &inputs(1_000_000.0, 20_000.0, 5), t("14.10.2026 12:00:00"));
        assert!(first.ready());
        assert_eq!(first.warnings.len(), 1);
        assert_eq!(first.deviation_since, Some(t("14.10.2026 12:00:00")));

        tool.deviation_since = first.deviation_since;
        let mut late = inputs(1_000_000.0, 20_000.0, 5);
        if let Some(sec) = late.security.as_mut() {
            sec.last_trade_time = Some(t("14.10.2026 16:30:00"));
        }
        let later = engine.assess(&tool, &late, t("14.10.2026 16:30:00"));
        assert!(matches!(later.blockers[0], RiskBreach::Deviation { .. }));

        let back = engine.assess(&tool, &inputs(1_000_000.0, 20_000.0, 1), t("14.10.2026 12:00:00"));
        assert_eq!(back.deviation_since, None);
    }

    #[test]
    fn test_weekend_grace_is_longer() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut tool = tool();
        tool.deviation_since = Some(t("17.10.2026 06:00:00"));
        let mut inp = inputs(1_000_000.0, 20_000.0, 5);
        if let Some(sec) = inp.security.as_mut() {
            sec.last_trade_time = Some(t("17.10.2026 12:00:00"));
        }
        // Saturday, 6h in: still within the 12h weekend grace
        let a = engine.assess(&tool, &inp, t("17.10.2026 12:00:00"));
        assert!(a.ready());
    }

    fn tool_holding(lots: i64) -> Tool {
        let mut tool = tool();
        let fill: Trade = trade(1, 10, Side::Buy, lots);
        tool.strategies[0].trades.push(fill);
        tool
    }

    #[test]
    fn test_normalization_waits_a_cycle() {
        let engine = RiskEngine::new(RiskConfig::default());
        let now = t("14.10.2026 12:00:00");
        let mut tool = tool_holding(2);

        assert_eq!(engine.normalization(&tool, 2, &[], now), Normalization::InSync);
        assert_eq!(engine.normalization(&tool, 0, &[], now), Normalization::Observed { gap: 2 });

        tool.normalization_since = Some(now);
        assert_eq!(
            engine.normalization(&tool, 0, &[], now + Duration::seconds(30)),
            Normalization::Correct {
                side: Side::Buy,
                quantity: 2,
                by_market: false
            }
        );
        assert_eq!(
            engine.normalization(&tool, 3, &[], now + Duration::seconds(400)),
            Normalization::Correct {
                side: Side::Sell,
                quantity: 1,
                by_market: true
            }
        );
    }

    #[test]
    fn test_normalization_never_stacks_orders() {
        let engine = RiskEngine::new(RiskConfig::default());
        let mut tool = tool_holding(2);
        tool.normalization_since = Some(t("14.10.2026 11:00:00"));
        let working = order(5, 55, OrderStatus::Active);
        assert_eq!(
            engine.normalization(&tool, 0, &[working], t("14.10.2026 12:00:00")),
            Normalization::Waiting { gap: 2 }
        );
    }
}
