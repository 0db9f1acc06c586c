//! Per-connection lifecycle
//!
//! A [`ConnectionHandler`] owns one accepted connection: a sequential
//! read loop feeding the frame decoder, and an unbounded outbound queue
//! drained by a writer task. Exactly one read loop runs per connection;
//! responses are written back in dispatch order.
//!
//! Lifecycle: `Connecting -> Ready -> Closing -> Closed`. Transitions
//! are monotonic; a closed connection is never resurrected. Read errors
//! and peer EOF end the loop; write failures are logged but do not tear
//! the connection down on their own. When `run` returns, the listener
//! evicts the connection from its live set.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::frame::FrameDecoder;
use crate::protocol::Response;
use crate::relay::dispatcher::EventDispatcher;
use crate::relay::RelayObserver;

/// Lifecycle state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Accepted, loops not yet running
    Connecting,
    /// Read loop active
    Ready,
    /// Teardown requested, draining
    Closing,
    /// Terminal; eviction follows
    Closed,
}

/// Handler for a single accepted connection.
///
/// Created by the listener for each accepted socket and consumed by
/// [`ConnectionHandler::run`], which drives the connection to `Closed`.
pub struct ConnectionHandler {
    id: u64,
    state: ConnectionState,
    dispatcher: Arc<EventDispatcher>,
    observer: Arc<dyn RelayObserver>,
    cancel: CancellationToken,
}

impl ConnectionHandler {
    /// Create a handler in the `Connecting` state.
    pub(crate) fn new(
        id: u64,
        dispatcher: Arc<EventDispatcher>,
        observer: Arc<dyn RelayObserver>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            dispatcher,
            observer,
            cancel,
        }
    }

    /// This connection's identity within the listener's live set.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the connection until close, error, or cancellation.
    ///
    /// Generic over the stream so tests can exercise the full loop over
    /// an in-memory duplex instead of a TCP socket.
    pub(crate) async fn run<S>(mut self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        // Writer task: drains the outbound queue. Write failures are
        // logged, not escalated; the read side notices a dead socket on
        // its own.
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let id = self.id;
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let line = format!("{msg}\n");
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    tracing::warn!(connection = id, error = %e, "response write failed");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        self.state = ConnectionState::Ready;
        tracing::debug!(connection = self.id, "connection ready");

        let mut decoder = FrameDecoder::new();
        let mut buf = BytesMut::with_capacity(8192);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    self.state = ConnectionState::Closing;
                    tracing::debug!(connection = self.id, "connection cancelled");
                    break;
                }

                read = read_half.read_buf(&mut buf) => match read {
                    // Peer closed the stream.
                    Ok(0) => {
                        self.state = ConnectionState::Closing;
                        tracing::debug!(connection = self.id, "peer closed connection");
                        break;
                    }
                    Ok(_) => {
                        decoder.extend(&buf);
                        buf.clear();
                        self.drain_frames(&mut decoder, &outbound_tx);
                    }
                    Err(e) => {
                        let err = RelayError::Transport(e.to_string());
                        self.observer.on_error(&err);
                        self.state = ConnectionState::Closing;
                        break;
                    }
                }
            }
        }

        self.state = ConnectionState::Closed;
        decoder.clear();

        // Closing the queue lets the writer flush queued responses and exit.
        drop(outbound_tx);
        let _ = writer.await;
        tracing::debug!(connection = self.id, "connection closed");
    }

    /// Dispatch every complete frame currently buffered, in order.
    ///
    /// A parse failure answers with an error response and keeps the
    /// connection open; only transport-level failures end the loop.
    fn drain_frames(
        &self,
        decoder: &mut FrameDecoder,
        outbound_tx: &mpsc::UnboundedSender<String>,
    ) {
        while let Some(frame) = decoder.next_frame() {
            let response = match frame {
                Ok(event) => self.dispatcher.dispatch(&event),
                Err(err) => {
                    self.observer.on_error(&err);
                    Response::error("Invalid JSON data")
                }
            };

            match serde_json::to_string(&response) {
                Ok(serialized) => {
                    // The writer may already be gone on a dying socket;
                    // the read loop will observe that itself.
                    let _ = outbound_tx.send(serialized);
                }
                Err(e) => {
                    tracing::error!(connection = self.id, error = %e, "response serialization failed");
                }
            }
        }
    }
}

impl std::fmt::Debug for ConnectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandler")
            .field("id", &self.id)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
