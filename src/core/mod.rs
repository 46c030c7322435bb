//! Core module - Common types, configuration, and error handling

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::VenueClock;
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
