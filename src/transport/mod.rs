//! Connector transport seam
//!
//! The venue connector takes a command string and synchronously returns a
//! reply string; asynchronous data arrive through a registered callback.

pub mod ipc;

use crate::core::Result;

/// Callback for asynchronous inbound blobs. It must return quickly.
pub type InboundHandler = Box<dyn Fn(String) + Send + Sync>;

pub trait Transport: Send + Sync {
    /// Send one command and block until the connector answers.
    fn send(&self, command: &str) -> Result<String>;

    /// Install the inbound callback, replacing any previous one.
    fn register_inbound(&self, handler: InboundHandler);
}

pub use ipc::IpcTransport;
