//! Error handling - one hierarchy for the whole engine

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine error hierarchy
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failures (socket closed, connector gone)
    #[error("Transport error: {0}")]
    Transport(String),

    /// A command exceeded its reply deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The venue answered with something we could not interpret
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A record lacked a field its section requires
    #[error("Missing field '{field}' in section '{section}'")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },

    /// Malformed markup
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Venue rejected a trading command
    #[error("Trading error: {0}")]
    Trading(String),

    /// Risk management errors
    #[error("Risk error: {0}")]
    Risk(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Filesystem errors (log rotation, config)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// `true` when the failure means the link itself is gone, not just one command.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}
