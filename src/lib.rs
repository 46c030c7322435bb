//! transaq-engine - Core Library
//! Automated trading engine for a tag-protocol brokerage connector

// Public modules
pub mod core;
pub mod engine;
pub mod execution;
pub mod logging;
pub mod notify;
pub mod protocol;
pub mod risk;
pub mod scheduler;
pub mod state;
pub mod strategies;
pub mod supervisor;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-exports
pub use core::{Config, Error, Result};
pub use engine::{Engine, Services};
