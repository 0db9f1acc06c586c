//! Client transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that all client transport
//! implementations must satisfy. Concrete implementations live in
//! submodules:
//!
//! - [`tcp::TcpTransport`] -- connects a TCP socket and exchanges
//!   newline-delimited JSON messages (the reference transport).
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! The trait is intentionally minimal: callers `send` a serialized JSON
//! string and `receive` a stream of serialized JSON strings, one per
//! logical message. Framing is the responsibility of each concrete
//! implementation; the contract is ordered, reliable, byte-stream
//! delivery, so a process-pipe transport would satisfy it equally well.

use std::pin::Pin;

use futures::Stream;

use crate::error::Result;

/// Abstraction over client transport implementations.
///
/// All methods are `async` or return pinned [`Stream`]s so that
/// implementations can drive I/O without blocking the Tokio executor.
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON message string to the remote peer.
    ///
    /// The string MUST be a single, complete JSON object. The transport
    /// applies whatever framing the medium requires (a trailing newline
    /// for the TCP transport).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::RelayError::Transport`] if the underlying
    /// I/O operation fails or the transport has shut down.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound message strings.
    ///
    /// Each item is a single, complete JSON object with framing
    /// stripped. The stream ends when the transport closes or the
    /// remote peer disconnects.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;
}

pub mod tcp;

#[cfg(test)]
pub mod fake;
