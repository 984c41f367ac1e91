// src/lib.rs
// Export modules so they can be used in tests
pub mod api;
pub mod config;
pub mod connection;
pub mod error;
pub mod monitors;
pub mod orchestrator;

pub use connection::{ConnectionState, StreamClient, StreamOptions, Subscription};
pub use error::{StreamError, TransportError};
