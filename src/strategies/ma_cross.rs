//! Fast/slow moving average cross

use super::traits::{Calculation, Strategy, StrategyParams, sma};
use crate::core::{Error, Result};
use crate::state::bars::Bars;

pub struct MaCross {
    fast: usize,
    slow: usize,
}

impl MaCross {
    pub fn from_params(params: &StrategyParams) -> Result<Self> {
        let fast = params.period("fast", 10)?;
        let slow = params.period("slow", 30)?;
        if fast >= slow {
            return Err(Error::Config(format!("ma_cross: fast {} must be below slow {}", fast, slow)));
        }
        Ok(Self { fast, slow })
    }
}

impl Strategy for MaCross {
    fn name(&self) -> &str {
        "ma_cross"
    }

    fn warmup(&self) -> usize {
        self.slow
    }

    fn calculate(&self, bars: &Bars) -> Result<Calculation> {
        let fast = sma(bars.closes(), self.fast);
        let slow = sma(bars.closes(), self.slow);
        // NaN compares false, so warm-up bars read as short
        let trend = fast.iter().zip(&slow).map(|(f, s)| f > s).collect();
        Ok(Calculation {
            trend,
            aux: vec![fast, slow],
            last_bar_time: bars.last_time(),
        })
    }
}
