//! Error types for the event relay
//!
//! This module defines all error types used throughout the relay and the
//! client session, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for relay operations
///
/// This enum encompasses every failure mode in the system: listener
/// startup, per-connection transport I/O, frame parsing, event dispatch,
/// and session protocol violations.
///
/// Propagation policy: per-connection failures never crash the listener,
/// and per-event failures never close the connection. Only [`RelayError::Bind`]
/// and an explicit `stop()` terminate the service.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The listener could not bind its port. Fatal to server start.
    #[error("Bind error: {0}")]
    Bind(String),

    /// The client transport could not establish a connection.
    #[error("Connect error: {0}")]
    Connect(String),

    /// A connection-level read or write failed. Recoverable by evicting
    /// the single affected connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A frame contained malformed JSON. Recoverable: answered with an
    /// error response, the connection stays open.
    #[error("Parse error: {0}")]
    Parse(String),

    /// An event could not be routed (missing or unknown discriminator).
    /// Recoverable: answered with an error response.
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// A session step was invoked out of order, or the peer rejected a
    /// step. The session remains in its prior valid state.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation was invoked from a state that can never accept it
    /// (e.g. `call_tool` while disconnected). Rejected before any I/O.
    #[error("Invalid state: {operation} is not allowed while {state}")]
    InvalidState {
        /// The operation that was attempted
        operation: &'static str,
        /// The session state at the time of the call
        state: String,
    },

    /// A cooperative abort. Expected, never logged as a failure.
    #[error("Cancelled: {0}")]
    Cancelled(&'static str),

    /// No correlated response arrived within the request deadline.
    #[error("Timeout waiting for response to {0}")]
    Timeout(&'static str),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RelayError {
    /// Whether this error represents a cooperative cancellation rather
    /// than a genuine failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled(_))
    }
}

/// Result type alias for relay operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
