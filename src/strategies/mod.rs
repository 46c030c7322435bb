//! Trading strategies - Strategy framework

pub mod ma_cross;
pub mod traits;
pub mod trend;

pub use ma_cross::MaCross;
pub use traits::{Calculation, Strategy, StrategyParams, StrategyRegistry};
pub use trend::TrendStrategy;
