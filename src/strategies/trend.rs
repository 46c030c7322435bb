//! Trend following strategy

use tracing::debug;

use super::traits::{Calculation, Strategy, StrategyParams, sma};
use crate::core::{Error, Result};
use crate::state::bars::Bars;

/// Trend following parameters
#[derive(Debug, Clone)]
pub struct TrendParams {
    /// RSI period
    pub rsi_period: usize,
    /// RSI oversold threshold
    pub rsi_oversold: f64,
    /// RSI overbought threshold
    pub rsi_overbought: f64,
    /// Moving average period
    pub ma_period: usize,
}

impl TrendParams {
    pub fn from_params(params: &StrategyParams) -> Result<Self> {
        let out = Self {
            rsi_period: params.period("rsi_period", 14)?,
            rsi_oversold: params.get("rsi_oversold", 30.0),
            rsi_overbought: params.get("rsi_overbought", 70.0),
            ma_period: params.period("ma_period", 50)?,
        };
        if out.rsi_oversold >= out.rsi_overbought {
            return Err(Error::Config(format!(
                "rsi_oversold {} must be below rsi_overbought {}",
                out.rsi_oversold, out.rsi_overbought
            )));
        }
        Ok(out)
    }
}

/// RSI + moving average.
///
/// Starts long above the MA and short below it; flips long on an oversold
/// RSI while price holds above the MA, and short on an overbought RSI while
/// price is below it.
pub struct TrendStrategy {
    params: TrendParams,
}

impl TrendStrategy {
    pub fn new(params: TrendParams) -> Self {
        Self { params }
    }

    pub fn from_params(params: &StrategyParams) -> Result<Self> {
        Ok(Self::new(TrendParams::from_params(params)?))
    }
}

/// Simple-average RSI over a trailing window; NaN during warm-up.
fn rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    for i in period..closes.len() {
        let mut gains = 0.0;
        let mut losses = 0.0;
        for j in (i + 1 - period)..=i {
            let change = closes[j] - closes[j - 1];
            if change > 0.0 {
                gains += change;
            } else {
                losses -= change;
            }
        }
        let avg_gain = gains / period as f64;
        let avg_loss = losses / period as f64;
        out[i] = if avg_loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        };
    }
    out
}

impl Strategy for TrendStrategy {
    fn name(&self) -> &str {
        "trend"
    }

    fn warmup(&self) -> usize {
        self.params.ma_period.max(self.params.rsi_period + 1)
    }

    fn calculate(&self, bars: &Bars) -> Result<Calculation> {
        let closes = bars.closes();
        let rsi = rsi(closes, self.params.rsi_period);
        let ma = sma(closes, self.params.ma_period);

        let mut trend = Vec::with_capacity(closes.len());
        let mut state: Option<bool> = None;
        for i in 0..closes.len() {
            let (price, r, m) = (closes[i], rsi[i], ma[i]);
            if !m.is_nan() {
                let current = *state.get_or_insert(price > m);
                if !r.is_nan() {
                    if r < self.params.rsi_oversold && price > m {
                        state = Some(true);
                    } else if r > self.params.rsi_overbought && price < m {
                        state = Some(false);
                    } else {
                        state = Some(current);
                    }
                }
            }
            trend.push(state.unwrap_or(false));
        }

        if let (Some(r), Some(m)) = (rsi.last(), ma.last()) {
            debug!(rsi = r, ma = m, long = ?state, "trend calculated");
        }
        Ok(Calculation {
            trend,
            aux: vec![rsi, ma],
            last_bar_time: bars.last_time(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::bars::Bar;
    use crate::testing::t;
    use chrono::Duration;
    use std::collections::HashMap;

    fn bars(closes: &[f64]) -> Bars {
        let start = t("14.10.2026 10:00:00");
        Bars::from_bars(
            1,
            closes.iter().enumerate().map(|(i, c)| Bar {
                time: start + Duration::minutes(i as i64),
                open: *c,
                high: *c,
                low: *c,
                close: *c,
                volume: 1.0,
            }),
        )
    }

    fn strategy(rsi: f64, ma: f64) -> TrendStrategy {
        TrendStrategy::from_params(&StrategyParams {
            timeframe: 1,
            values: HashMap::from([("rsi_period".to_string(), rsi), ("ma_period".to_string(), ma)]),
        })
        .unwrap()
    }

    #[test]
    fn test_rsi_extremes() {
        let up = rsi(&[1.0, 2.0, 3.0, 4.0], 3);
        assert_eq!(up[3], 100.0);
        let down = rsi(&[4.0, 3.0, 2.0, 1.0], 3);
        assert_eq!(down[3], 0.0);
    }

    #[test]
    fn test_series_lengths_match() {
        let calc = strategy(3.0, 4.0).calculate(&bars(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])).unwrap();
        assert_eq!(calc.trend.len(), 6);
        assert_eq!(calc.aux.len(), 2);
        assert!(calc.aux.iter().all(|a| a.len() == 6));
        assert_eq!(calc.last_bar_time, Some(t("14.10.2026 10:05:00")));
    }

    #[test]
    fn test_initial_state_follows_ma() {
        let rising = strategy(3.0, 3.0).calculate(&bars(&[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
        assert_eq!(rising.last_trend(), Some(true));
        let falling = strategy(3.0, 3.0).calculate(&bars(&[5.0, 4.0, 3.0, 2.0, 1.0])).unwrap();
        assert_eq!(falling.last_trend(), Some(false));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let params = StrategyParams {
            timeframe: 1,
            values: HashMap::from([("rsi_oversold".to_string(), 80.0)]),
        };
        assert!(TrendStrategy::from_params(&params).is_err());
    }
}
