//! TCP client transport
//!
//! [`TcpTransport`] connects a socket to a relay server and exchanges
//! newline-delimited JSON: outbound messages are written as one JSON
//! object plus `\n`, inbound lines are delivered whole with the newline
//! stripped.
//!
//! Two background Tokio tasks are started on connect: one drains the
//! outbound queue into the socket, one reads inbound lines into a
//! channel. Both exit when the transport is dropped (the channels
//! close) or the peer disconnects.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};

use crate::error::{RelayError, Result};
use crate::session::transport::Transport;

/// TCP-backed [`Transport`] for the client session.
///
/// # Examples
///
/// ```no_run
/// use evrelay::session::transport::tcp::TcpTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = TcpTransport::connect("127.0.0.1:8080").await?;
/// println!("connected to {}", transport.peer_addr());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct TcpTransport {
    /// Sender side of the outbound queue; `send()` writes here.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Shared receiver for inbound lines (one JSON message per line).
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Address of the connected peer.
    peer_addr: SocketAddr,
}

impl TcpTransport {
    /// Connect to `addr` and wire up the background I/O tasks.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Connect`] if the socket cannot be
    /// established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let peer_addr = stream
            .peer_addr()
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        let (read_half, mut write_half) = stream.into_split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        // Background task: outbound queue -> socket.
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let line = format!("{msg}\n");
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });

        // Background task: socket lines -> inbound channel.
        tokio::spawn(async move {
            let reader = BufReader::new(read_half);
            let mut lines = reader.lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if inbound_tx.send(line).is_err() {
                    break;
                }
            }
            tracing::debug!(%peer_addr, "tcp transport reader finished");
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            peer_addr,
        })
    }

    /// Address of the connected peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    /// Enqueue one JSON message for the background writer.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Transport`] if the writer task has exited
    /// (the socket is gone).
    async fn send(&self, message: String) -> Result<()> {
        self.outbound_tx
            .send(message)
            .map_err(|_| RelayError::Transport("outbound channel closed".to_string()).into())
    }

    /// Returns a stream of inbound messages, one JSON object per item.
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
