//! In-process fake transport for session unit tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the session under test; from the test
//! side, use the handle to:
//!
//! - Read what the session sent: `handle.outbound_rx.recv().await`
//! - Inject server responses: `handle.inbound_tx.send(json_string)`
//!
//! From the **session** perspective:
//!
//! ```text
//! session send() ------> outbound_tx ----> outbound_rx (handle reads)
//! handle inbound_tx ---> inbound_rx  ----> session receive()
//! ```

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, Mutex};

use crate::error::Result;
use crate::session::transport::Transport;

/// In-process fake transport backed by unbounded channels.
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
}

/// Test-side handle complementing a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Messages the session sent, in order.
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Inject serialized responses for the session to receive.
    pub inbound_tx: mpsc::UnboundedSender<String>,
}

impl FakeTransport {
    /// Create a wired `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
        };
        (transport, handle)
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx.send(message).map_err(|_| {
            crate::error::RelayError::Transport("fake outbound channel closed".to_string())
                .into()
        })
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_outbound_visible_to_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport
            .send(r#"{"type":"ping"}"#.to_string())
            .await
            .unwrap();
        let sent = handle.outbound_rx.recv().await.unwrap();
        assert!(sent.contains("ping"));
    }

    #[tokio::test]
    async fn test_injected_response_arrives_on_receive() {
        let (transport, handle) = FakeTransport::new();
        handle
            .inbound_tx
            .send(r#"{"status":"success","message":"ok"}"#.to_string())
            .unwrap();
        let received = transport.receive().next().await.unwrap();
        assert!(received.contains("success"));
    }

    #[tokio::test]
    async fn test_send_fails_after_handle_dropped() {
        let (transport, handle) = FakeTransport::new();
        drop(handle);
        let result = transport.send("{}".to_string()).await;
        assert!(result.is_err());
    }
}
