//! Listener and live-connection set
//!
//! [`RelayListener::start`] binds the port, reports bind failures to
//! both the caller and the observer, and runs the accept loop. Each
//! accepted socket is registered in the live set before its handler
//! starts, and deregistered exactly once when the handler finishes,
//! whether closure was peer-initiated, error-initiated, or forced by
//! [`RelayListener::stop`]. The listener is the single mutation point
//! for the set; removal is idempotent remove-by-identity.
//!
//! A successful return from `start` is the readiness signal: the socket
//! is bound and accepting, and [`RelayListener::local_addr`] is the
//! address clients should connect to. No startup delay is needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{RelayError, Result};
use crate::relay::connection::ConnectionHandler;
use crate::relay::dispatcher::EventDispatcher;
use crate::relay::RelayObserver;

/// Bookkeeping for one live connection.
#[derive(Debug)]
struct ConnectionEntry {
    peer: SocketAddr,
    cancel: CancellationToken,
}

type ConnectionSet = Arc<Mutex<HashMap<u64, ConnectionEntry>>>;

/// The accepting server: owns the bound socket and the live set.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use evrelay::protocol::ServerCapabilities;
/// use evrelay::relay::{EventDispatcher, LoggingObserver, RelayListener};
/// use evrelay::tools::ToolRegistry;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let dispatcher = Arc::new(EventDispatcher::new(
///     Arc::new(ToolRegistry::new()),
///     ServerCapabilities::full(),
///     Arc::new(LoggingObserver),
/// ));
/// let listener = RelayListener::start(0, dispatcher, Arc::new(LoggingObserver)).await?;
/// println!("listening on {}", listener.local_addr());
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct RelayListener {
    local_addr: SocketAddr,
    connections: ConnectionSet,
    cancel: CancellationToken,
}

impl RelayListener {
    /// Bind `port` and begin accepting connections.
    ///
    /// Port `0` asks the OS for an ephemeral port; read it back with
    /// [`RelayListener::local_addr`]. The accept loop runs as a
    /// background task and never blocks on connection I/O.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Bind`] if the port is unavailable. The
    /// error is also reported through the observer before returning.
    pub async fn start(
        port: u16,
        dispatcher: Arc<EventDispatcher>,
        observer: Arc<dyn RelayObserver>,
    ) -> Result<Self> {
        let socket = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(socket) => socket,
            Err(e) => {
                let err = RelayError::Bind(format!("port {port}: {e}"));
                observer.on_error(&err);
                return Err(err.into());
            }
        };

        let local_addr = socket.local_addr().map_err(RelayError::Io)?;
        tracing::info!(%local_addr, "relay listening");

        let connections: ConnectionSet = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        tokio::spawn(Self::accept_loop(
            socket,
            Arc::clone(&connections),
            cancel.clone(),
            dispatcher,
            observer,
        ));

        Ok(Self {
            local_addr,
            connections,
            cancel,
        })
    }

    /// The bound address; the client-facing readiness signal.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of connections currently tracked.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Whether `stop` has been requested.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel the accept loop, force-close every tracked connection,
    /// and clear the set. Safe to call more than once.
    pub async fn stop(&self) {
        if self.cancel.is_cancelled() {
            tracing::debug!("stop requested on already-stopped listener");
            return;
        }

        tracing::info!(local_addr = %self.local_addr, "stopping relay");
        self.cancel.cancel();

        let mut connections = self.connections.lock().await;
        for (id, entry) in connections.drain() {
            tracing::debug!(connection = id, peer = %entry.peer, "force-closing connection");
            entry.cancel.cancel();
        }
    }

    /// Accept loop: registers each connection, then hands it to its
    /// handler. All per-connection work happens in the handler task.
    async fn accept_loop(
        socket: TcpListener,
        connections: ConnectionSet,
        cancel: CancellationToken,
        dispatcher: Arc<EventDispatcher>,
        observer: Arc<dyn RelayObserver>,
    ) {
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!("accept loop cancelled");
                    break;
                }

                accepted = socket.accept() => match accepted {
                    Ok((stream, peer)) => {
                        next_id += 1;
                        let id = next_id;
                        let conn_cancel = cancel.child_token();

                        // Register before the handler starts so stop()
                        // can always reach the connection.
                        {
                            let mut set = connections.lock().await;
                            set.insert(
                                id,
                                ConnectionEntry {
                                    peer,
                                    cancel: conn_cancel.clone(),
                                },
                            );
                        }
                        tracing::debug!(connection = id, %peer, "connection accepted");

                        let handler = ConnectionHandler::new(
                            id,
                            Arc::clone(&dispatcher),
                            Arc::clone(&observer),
                            conn_cancel,
                        );
                        let connections = Arc::clone(&connections);
                        tokio::spawn(async move {
                            handler.run(stream).await;
                            Self::evict(&connections, id).await;
                        });
                    }
                    Err(e) => {
                        // Transient accept failures do not stop the server.
                        observer.on_error(&RelayError::Transport(format!(
                            "accept failed: {e}"
                        )));
                    }
                }
            }
        }
    }

    /// Remove a connection by identity. Idempotent: eviction after
    /// `stop` already drained the set is a no-op.
    async fn evict(connections: &ConnectionSet, id: u64) {
        let removed = connections.lock().await.remove(&id);
        if removed.is_some() {
            tracing::debug!(connection = id, "connection evicted");
        }
    }
}

impl Drop for RelayListener {
    fn drop(&mut self) {
        // Tasks observe the token; the set is drained by stop() when
        // the caller wants deterministic teardown.
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RelayListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayListener")
            .field("local_addr", &self.local_addr)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ServerCapabilities;
    use crate::relay::LoggingObserver;
    use crate::tools::ToolRegistry;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    async fn started_listener() -> RelayListener {
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(ToolRegistry::new()),
            ServerCapabilities::full(),
            Arc::new(LoggingObserver),
        ));
        RelayListener::start(0, dispatcher, Arc::new(LoggingObserver))
            .await
            .expect("bind failed")
    }

    /// Poll until the condition holds or the deadline passes.
    async fn wait_for<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within deadline");
    }

    #[tokio::test]
    async fn test_start_on_ephemeral_port_is_ready_immediately() {
        let listener = started_listener().await;
        assert_ne!(listener.local_addr().port(), 0);

        // Readiness signal: a client can connect as soon as start returns.
        let stream = TcpStream::connect(listener.local_addr()).await;
        assert!(stream.is_ok());
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let first = started_listener().await;
        let port = first.local_addr().port();

        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(ToolRegistry::new()),
            ServerCapabilities::default(),
            Arc::new(LoggingObserver),
        ));
        let second = RelayListener::start(port, dispatcher, Arc::new(LoggingObserver)).await;
        assert!(second.is_err());
        let msg = second.err().unwrap().to_string();
        assert!(msg.contains("Bind error"), "unexpected error: {msg}");
        first.stop().await;
    }

    #[tokio::test]
    async fn test_connections_tracked_and_evicted_on_peer_close() {
        let listener = started_listener().await;

        let stream = TcpStream::connect(listener.local_addr()).await.unwrap();
        wait_for(|| async { listener.connection_count().await == 1 }).await;

        drop(stream);
        wait_for(|| async { listener.connection_count().await == 0 }).await;
        listener.stop().await;
    }

    #[tokio::test]
    async fn test_stop_evicts_all_connections_and_is_idempotent() {
        let listener = started_listener().await;

        let c1 = TcpStream::connect(listener.local_addr()).await.unwrap();
        let c2 = TcpStream::connect(listener.local_addr()).await.unwrap();
        let c3 = TcpStream::connect(listener.local_addr()).await.unwrap();
        wait_for(|| async { listener.connection_count().await == 3 }).await;

        listener.stop().await;
        assert_eq!(listener.connection_count().await, 0);
        assert!(listener.is_stopped());

        // Second stop is safe.
        listener.stop().await;
        assert_eq!(listener.connection_count().await, 0);

        drop((c1, c2, c3));
    }

    #[tokio::test]
    async fn test_two_connections_served_independently() {
        let dispatcher = Arc::new(EventDispatcher::new(
            Arc::new(ToolRegistry::new()),
            ServerCapabilities::default(),
            Arc::new(LoggingObserver),
        ));
        let listener = RelayListener::start(0, dispatcher, Arc::new(LoggingObserver))
            .await
            .unwrap();

        let mut replies = Vec::new();
        for id in [1u64, 2u64] {
            let mut stream = TcpStream::connect(listener.local_addr()).await.unwrap();
            stream
                .write_all(format!("{{\"type\":\"initialize\",\"id\":{id}}}\n").as_bytes())
                .await
                .unwrap();
            let (read, _write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            replies.push(value["id"].as_u64().unwrap());
        }

        assert_eq!(replies, vec![1, 2]);
        listener.stop().await;
    }
}
