//! Strategy trait and registry

use std::collections::HashMap;

use crate::core::{Error, Result, VenueTime};
use crate::state::bars::Bars;

/// Output of one strategy run over a bar series.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calculation {
    /// Long (`true`) or short per bar
    pub trend: Vec<bool>,
    /// Indicator lines, one value per bar (NaN during warm-up)
    pub aux: Vec<Vec<f64>>,
    pub last_bar_time: Option<VenueTime>,
}

impl Calculation {
    pub fn last_trend(&self) -> Option<bool> {
        self.trend.last().copied()
    }
}

/// Per-instance parameters.
#[derive(Debug, Clone, Default)]
pub struct StrategyParams {
    /// Minutes per bar the strategy runs on
    pub timeframe: u32,
    pub values: HashMap<String, f64>,
}

impl StrategyParams {
    pub fn get(&self, name: &str, default: f64) -> f64 {
        self.values.get(name).copied().unwrap_or(default)
    }

    /// Positive integer parameter (periods, lengths).
    pub fn period(&self, name: &str, default: usize) -> Result<usize> {
        let raw = self.get(name, default as f64);
        if raw < 1.0 || raw.fract() != 0.0 {
            return Err(Error::Config(format!("parameter '{}' must be a positive integer, got {}", name, raw)));
        }
        Ok(raw as usize)
    }
}

pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    /// Bars needed before the first signal.
    fn warmup(&self) -> usize;

    fn calculate(&self, bars: &Bars) -> Result<Calculation>;
}

type Factory = Box<dyn Fn(&StrategyParams) -> Result<Box<dyn Strategy>> + Send + Sync>;

/// Algorithm name -> constructor.
pub struct StrategyRegistry {
    factories: HashMap<String, Factory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the bundled algorithms.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("trend", |p| Ok(Box::new(super::trend::TrendStrategy::from_params(p)?)));
        registry.register("ma_cross", |p| Ok(Box::new(super::ma_cross::MaCross::from_params(p)?)));
        registry
    }

    pub fn register<F>(&mut self, algorithm: &str, factory: F)
    where
        F: Fn(&StrategyParams) -> Result<Box<dyn Strategy>> + Send + Sync + 'static,
    {
        self.factories.insert(algorithm.to_string(), Box::new(factory));
    }

    pub fn build(&self, algorithm: &str, params: &StrategyParams) -> Result<Box<dyn Strategy>> {
        let factory = self
            .factories
            .get(algorithm)
            .ok_or_else(|| Error::Config(format!("unknown strategy algorithm '{}'", algorithm)))?;
        factory(params)
    }

    pub fn algorithms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Simple moving average per bar; NaN until `period` values are in.
pub fn sma(values: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; values.len()];
    if period == 0 {
        return out;
    }
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= period {
            sum -= values[i - period];
        }
        if i + 1 >= period {
            out[i] = sum / period as f64;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let out = sma(&[1.0, 2.0, 3.0, 4.0], 2);
        assert!(out[0].is_nan());
        assert_eq!(&out[1..], &[1.5, 2.5, 3.5]);
    }

    #[test]
    fn test_registry_builds_known_algorithms() {
        let registry = StrategyRegistry::builtin();
        assert_eq!(registry.algorithms(), vec!["ma_cross", "trend"]);
        let params = StrategyParams {
            timeframe: 5,
            values: HashMap::new(),
        };
        assert_eq!(registry.build("trend", &params).unwrap().name(), "trend");
        assert!(matches!(registry.build("zigzag", &params), Err(Error::Config(_))));
    }

    #[test]
    fn test_bad_period_rejected() {
        let params = StrategyParams {
            timeframe: 5,
            values: HashMap::from([("fast".to_string(), 2.5)]),
        };
        assert!(params.period("fast", 10).is_err());
        assert_eq!(params.period("slow", 30).unwrap(), 30);
    }
}
