// src/error.rs
use std::any::Any;

use thiserror::Error;

/// Errors surfaced by the streaming client.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The client was explicitly closed; it will never reconnect.
    #[error("stream client is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Failures of the underlying duplex transport.
///
/// These never reach `use_channel()` callers: the connection manager logs
/// them and lets the close path schedule a reconnect.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("invalid streaming endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),
}

/// Text of a caught panic payload, for logging.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
