//! Server side of the event relay
//!
//! The relay is layered leaf to root:
//!
//! - [`crate::frame::FrameDecoder`] -- byte stream to discrete events.
//! - [`connection::ConnectionHandler`] -- one accepted connection's read
//!   loop, write queue, and lifecycle.
//! - [`listener::RelayListener`] -- bind/accept plus the live-connection
//!   set; the single mutation point for that set.
//! - [`dispatcher::EventDispatcher`] -- routes decoded events to
//!   handlers and produces the response payload.
//!
//! The presentation layer (excluded from this crate) participates
//! through [`RelayObserver`], which receives every successfully parsed
//! event and every surfaced error.

pub mod connection;
pub mod dispatcher;
pub mod listener;

pub use connection::ConnectionState;
pub use dispatcher::EventDispatcher;
pub use listener::RelayListener;

use crate::error::RelayError;
use crate::protocol::Event;

/// External collaborator notified of relay activity.
///
/// Implemented by the embedding application (a UI layer in the original
/// deployment). Callbacks are invoked from relay tasks and MUST NOT
/// block; hand off to a channel or task if real work is needed.
/// Notification is decoupled from the response path: `on_event` fires
/// before the response is computed, and its outcome never shapes the
/// response.
pub trait RelayObserver: Send + Sync {
    /// Called for every successfully parsed event, on any connection.
    fn on_event(&self, event: &Event) {
        let _ = event;
    }

    /// Called for every surfaced error: bind failures, per-connection
    /// transport errors, and frame parse errors.
    fn on_error(&self, error: &RelayError) {
        let _ = error;
    }
}

/// Observer that forwards everything to `tracing`.
///
/// Stands in for the excluded presentation layer so that no error is
/// silently dropped.
#[derive(Debug, Default)]
pub struct LoggingObserver;

impl RelayObserver for LoggingObserver {
    fn on_event(&self, event: &Event) {
        tracing::info!(kind = ?event.kind(), id = ?event.id(), "event received");
    }

    fn on_error(&self, error: &RelayError) {
        if error.is_cancelled() {
            tracing::debug!(%error, "operation cancelled");
        } else {
            tracing::warn!(%error, "relay error");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observer_default_methods_are_noop() {
        struct Silent;
        impl RelayObserver for Silent {}

        let observer = Silent;
        let event: Event = serde_json::from_str(r#"{"type":"x"}"#).unwrap();
        observer.on_event(&event);
        observer.on_error(&RelayError::Transport("reset".into()));
    }

    #[test]
    fn test_logging_observer_is_object_safe() {
        let _: std::sync::Arc<dyn RelayObserver> = std::sync::Arc::new(LoggingObserver);
    }
}
