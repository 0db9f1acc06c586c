//! Client session state machine
//!
//! A [`Session`] drives the client side of the relay protocol:
//! `connect -> initialize -> call_tool* -> close`, as an explicit state
//! machine. Each step is only legal from the right state; out-of-order
//! calls are rejected immediately, before any I/O, leaving the session
//! in its prior valid state.
//!
//! # Correlation
//!
//! Every request carries a monotonically increasing numeric `id`; the
//! server echoes it on the response. In-flight requests are tracked in
//! a `pending` map of `oneshot` senders, resolved by a background read
//! loop. Cancelling an operation removes its pending entry, so a late
//! response for that id is discarded by the read loop rather than
//! corrupting a later call.
//!
//! # Cancellation
//!
//! Every long-running operation takes a
//! [`tokio_util::sync::CancellationToken`] and observes it at its
//! suspension points. Cancelling `connect` or `initialize` leaves the
//! session `Disconnected`; cancelling `call_tool` abandons the in-flight
//! request and returns the session to `Ready`.

pub mod transport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_stream::StreamExt;

use crate::error::{RelayError, Result};
use crate::protocol::{ClientInfo, Event, Response, ServerCapabilities, ToolCallResult};
use crate::session::transport::tcp::TcpTransport;
use crate::session::transport::Transport;

/// Default deadline applied to every request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The pending-response map: request id to the oneshot resolving it.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Response>>>>;

/// Lifecycle state of a [`Session`].
///
/// `Disconnected -> Connecting -> Initialized -> Ready -> CallInFlight
/// -> Ready … -> Disconnected` (terminal until reconnected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport attached
    Disconnected,
    /// Transport attached, handshake not yet performed
    Connecting,
    /// Handshake accepted, capabilities being captured
    Initialized,
    /// Ready to issue tool calls
    Ready,
    /// One tool call awaiting its correlated response
    CallInFlight,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Disconnected => "Disconnected",
            SessionState::Connecting => "Connecting",
            SessionState::Initialized => "Initialized",
            SessionState::Ready => "Ready",
            SessionState::CallInFlight => "CallInFlight",
        };
        f.write_str(name)
    }
}

/// Client-side session over a [`Transport`].
///
/// One `Session` per logical connection. Operations take `&mut self`,
/// so at most one protocol step is in flight at a time; the correlated
/// read loop runs as a background task.
///
/// # Examples
///
/// ```no_run
/// use evrelay::protocol::ClientInfo;
/// use evrelay::session::Session;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let mut session = Session::new(ClientInfo {
///     name: "demo-client".into(),
///     version: "1.0.0".into(),
/// });
/// let cancel = CancellationToken::new();
///
/// session.connect("127.0.0.1:8080", &cancel).await?;
/// let capabilities = session.initialize(&cancel).await?;
/// println!("server capabilities: {capabilities:?}");
///
/// let result = session
///     .call_tool("example-tool", serde_json::Map::new(), &cancel)
///     .await?;
/// println!("is_error: {}", result.is_error);
/// session.close();
/// # Ok(())
/// # }
/// ```
pub struct Session {
    client_info: ClientInfo,
    state: SessionState,
    capabilities: Option<ServerCapabilities>,
    transport: Option<Arc<dyn Transport>>,
    pending: PendingMap,
    next_id: u64,
    read_cancel: Option<CancellationToken>,
    request_timeout: Duration,
}

impl Session {
    /// Create a disconnected session for the given client identity.
    pub fn new(client_info: ClientInfo) -> Self {
        Self {
            client_info,
            state: SessionState::Disconnected,
            capabilities: None,
            transport: None,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: 0,
            read_cancel: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the per-request deadline (default 30 s).
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Capabilities captured during initialize, if the handshake has
    /// completed.
    pub fn capabilities(&self) -> Option<&ServerCapabilities> {
        self.capabilities.as_ref()
    }

    /// Connect a TCP transport to `addr`.
    ///
    /// Only legal while `Disconnected`. On transport failure the
    /// session stays `Disconnected` and a [`RelayError::Connect`] is
    /// returned; on cancellation it stays `Disconnected` with
    /// [`RelayError::Cancelled`].
    pub async fn connect(&mut self, addr: &str, cancel: &CancellationToken) -> Result<()> {
        self.require_state("connect", SessionState::Disconnected)?;

        let transport = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RelayError::Cancelled("connect").into());
            }
            connected = TcpTransport::connect(addr) => connected?,
        };

        self.attach(Arc::new(transport))
    }

    /// Attach an already-established transport.
    ///
    /// This is the transport-agnostic form of [`Session::connect`]:
    /// anything satisfying [`Transport`] (a process pipe, an in-memory
    /// fake) can carry the session. Starts the correlated read loop and
    /// transitions `Disconnected -> Connecting`.
    pub fn attach(&mut self, transport: Arc<dyn Transport>) -> Result<()> {
        self.require_state("connect", SessionState::Disconnected)?;

        let read_cancel = CancellationToken::new();
        tokio::spawn(read_loop(
            Arc::clone(&transport),
            Arc::clone(&self.pending),
            read_cancel.clone(),
        ));

        self.transport = Some(transport);
        self.read_cancel = Some(read_cancel);
        self.state = SessionState::Connecting;
        tracing::debug!("session connecting");
        Ok(())
    }

    /// Perform the initialize handshake and capture server capabilities.
    ///
    /// Only legal while `Connecting`; transitions through `Initialized`
    /// to `Ready` on success. If the peer rejects the handshake a
    /// [`RelayError::Protocol`] is returned and the session stays
    /// `Connecting`. Cancellation tears the session down to
    /// `Disconnected`.
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> Result<ServerCapabilities> {
        if self.state != SessionState::Connecting {
            return Err(RelayError::Protocol(format!(
                "initialize invoked out of order in state {}",
                self.state
            ))
            .into());
        }

        let id = self.take_id();
        let event = Event::initialize(id, &self.client_info);
        let outcome = self.request("initialize", id, &event, cancel).await;

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                if e.downcast_ref::<RelayError>()
                    .is_some_and(RelayError::is_cancelled)
                {
                    self.close();
                }
                return Err(e);
            }
        };

        if !response.is_success() {
            return Err(RelayError::Protocol(format!(
                "peer rejected initialization: {}",
                response.message
            ))
            .into());
        }

        self.state = SessionState::Initialized;
        let capabilities = response.capabilities.unwrap_or_default();
        self.capabilities = Some(capabilities);
        self.state = SessionState::Ready;
        tracing::debug!(?capabilities, "session ready");
        Ok(capabilities)
    }

    /// Invoke a named remote tool and await its correlated result.
    ///
    /// Only legal while `Ready`; transitions to `CallInFlight` for the
    /// duration of the request and back to `Ready` afterwards --
    /// including on cancellation, where the in-flight request is
    /// abandoned and its eventual late response discarded.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<ToolCallResult> {
        self.require_state("call_tool", SessionState::Ready)?;
        self.state = SessionState::CallInFlight;

        let id = self.take_id();
        let event = Event::call_tool(id, name, arguments);
        let outcome = self.request("call_tool", id, &event, cancel).await;

        // Whatever happened, the call is no longer in flight.
        self.state = SessionState::Ready;

        let response = outcome?;
        if !response.is_success() {
            return Err(RelayError::Dispatch(response.message).into());
        }
        response.result.ok_or_else(|| {
            RelayError::Protocol("call-tool response carried no result".to_string()).into()
        })
    }

    /// Tear the session down: stop the read loop, drop the transport,
    /// return to `Disconnected`. Safe to call in any state; a closed
    /// session may be reconnected with a fresh transport.
    pub fn close(&mut self) {
        if let Some(cancel) = self.read_cancel.take() {
            cancel.cancel();
        }
        self.transport = None;
        self.capabilities = None;
        self.state = SessionState::Disconnected;
        tracing::debug!("session closed");
    }

    fn take_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn require_state(&self, operation: &'static str, expected: SessionState) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(RelayError::InvalidState {
                operation,
                state: self.state.to_string(),
            }
            .into())
        }
    }

    /// Send one event and await its correlated response.
    ///
    /// Registers the pending slot before sending so the response can
    /// never arrive before we are ready to receive it. Cancellation and
    /// timeout both remove the slot, so a late response is discarded by
    /// the read loop.
    async fn request(
        &self,
        operation: &'static str,
        id: u64,
        event: &Event,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let transport = self
            .transport
            .as_ref()
            .cloned()
            .ok_or_else(|| RelayError::Transport("no active transport".to_string()))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            pending.insert(id, tx);
        }

        let message = match serde_json::to_string(event) {
            Ok(message) => message,
            Err(e) => {
                self.pending.lock().await.remove(&id);
                return Err(RelayError::Serialization(e).into());
            }
        };

        if let Err(e) = transport.send(message).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                self.pending.lock().await.remove(&id);
                Err(RelayError::Cancelled(operation).into())
            }

            outcome = tokio::time::timeout(self.request_timeout, rx) => match outcome {
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    Err(RelayError::Timeout(operation).into())
                }
                Ok(Err(_)) => Err(RelayError::Transport(
                    "read loop exited before response arrived".to_string(),
                )
                .into()),
                Ok(Ok(response)) => Ok(response),
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_info", &self.client_info)
            .field("state", &self.state)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

/// Background read loop: resolves correlated responses.
///
/// Responses whose id has no pending slot -- late arrivals for
/// cancelled or timed-out requests -- are discarded with a diagnostic.
/// On cancellation or stream end, every pending sender is dropped so
/// awaiting callers fail fast instead of hanging.
async fn read_loop(
    transport: Arc<dyn Transport>,
    pending: PendingMap,
    cancel: CancellationToken,
) {
    let mut stream = transport.receive();

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                pending.lock().await.clear();
                break;
            }

            item = stream.next() => {
                let Some(raw) = item else {
                    // Transport closed; fail any in-flight requests.
                    pending.lock().await.clear();
                    break;
                };

                let response: Response = match serde_json::from_str(&raw) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(error = %e, "discarding unparseable inbound message");
                        continue;
                    }
                };

                let Some(id) = response.id else {
                    tracing::debug!("discarding response without correlation id");
                    continue;
                };

                let slot = pending.lock().await.remove(&id);
                match slot {
                    // The requester may have timed out in the meantime.
                    Some(tx) => {
                        let _ = tx.send(response);
                    }
                    None => {
                        tracing::debug!(id, "discarding late response");
                    }
                }
            }
        }
    }
    tracing::debug!("session read loop finished");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::transport::fake::{FakeTransport, FakeTransportHandle};

    fn session() -> Session {
        Session::new(ClientInfo {
            name: "test-client".to_string(),
            version: "1.0.0".to_string(),
        })
        .with_request_timeout(Duration::from_secs(5))
    }

    fn attached_session() -> (Session, FakeTransportHandle) {
        let mut session = session();
        let (transport, handle) = FakeTransport::new();
        session.attach(Arc::new(transport)).unwrap();
        (session, handle)
    }

    /// Reply to the next outbound event with a success response echoing
    /// its id, optionally with capabilities or a result payload.
    async fn answer_next(handle: &mut FakeTransportHandle, extra: serde_json::Value) {
        let raw = handle.outbound_rx.recv().await.expect("nothing sent");
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let mut response = serde_json::json!({
            "status": "success",
            "message": "ok",
            "id": event["id"],
        });
        if let (Some(response_obj), Some(extra_obj)) =
            (response.as_object_mut(), extra.as_object())
        {
            for (key, value) in extra_obj {
                response_obj.insert(key.clone(), value.clone());
            }
        }
        handle
            .inbound_tx
            .send(serde_json::to_string(&response).unwrap())
            .unwrap();
    }

    async fn ready_session() -> (Session, FakeTransportHandle) {
        let (mut session, mut handle) = attached_session();
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(session.initialize(&cancel), async {
            answer_next(
                &mut handle,
                serde_json::json!({ "capabilities": { "tools": { "listChanged": true } } }),
            )
            .await;
        });
        outcome.expect("initialize failed");
        (session, handle)
    }

    #[test]
    fn test_new_session_is_disconnected() {
        let session = session();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.capabilities().is_none());
    }

    #[tokio::test]
    async fn test_call_tool_while_disconnected_is_invalid_state() {
        let mut session = session();
        let cancel = CancellationToken::new();

        let result = session
            .call_tool("example-tool", Map::new(), &cancel)
            .await;
        let err = result.err().expect("expected InvalidState");
        assert!(err.to_string().contains("Invalid state"));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_initialize_before_connect_is_protocol_error() {
        let mut session = session();
        let cancel = CancellationToken::new();

        let result = session.initialize(&cancel).await;
        let err = result.err().expect("expected ProtocolError");
        assert!(err.to_string().contains("out of order"));
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_attach_transitions_to_connecting() {
        let (session, _handle) = attached_session();
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_double_connect_rejected() {
        let (mut session, _handle) = attached_session();
        let (transport, _second_handle) = FakeTransport::new();
        let result = session.attach(Arc::new(transport));
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_initialize_captures_capabilities() {
        let (session, _handle) = ready_session().await;
        assert_eq!(session.state(), SessionState::Ready);
        let caps = session.capabilities().expect("capabilities not captured");
        assert!(caps.tools.is_some_and(|t| t.list_changed));
    }

    #[tokio::test]
    async fn test_initialize_rejected_by_peer_keeps_connecting_state() {
        let (mut session, mut handle) = attached_session();
        let cancel = CancellationToken::new();

        let (outcome, ()) = tokio::join!(session.initialize(&cancel), async {
            let raw = handle.outbound_rx.recv().await.unwrap();
            let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
            handle
                .inbound_tx
                .send(
                    serde_json::json!({
                        "status": "error",
                        "message": "unsupported client",
                        "id": event["id"],
                    })
                    .to_string(),
                )
                .unwrap();
        });

        let err = outcome.err().expect("expected rejection");
        assert!(err.to_string().contains("peer rejected"));
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_call_tool_before_initialize_is_rejected() {
        let (mut session, _handle) = attached_session();
        let cancel = CancellationToken::new();

        let result = session.call_tool("example-tool", Map::new(), &cancel).await;
        assert!(result.is_err());
        // State unchanged: still Connecting, not CallInFlight.
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_call_tool_round_trip() {
        let (mut session, mut handle) = ready_session().await;
        let cancel = CancellationToken::new();

        let mut args = Map::new();
        args.insert("key".into(), Value::String("value".into()));

        let (outcome, ()) = tokio::join!(session.call_tool("example-tool", args, &cancel), async {
            answer_next(
                &mut handle,
                serde_json::json!({
                    "result": {
                        "content": [{ "type": "text", "text": "工具调用成功" }],
                        "isError": false,
                    }
                }),
            )
            .await;
        });

        let result = outcome.expect("call failed");
        assert!(!result.is_error);
        assert_eq!(
            result.content,
            vec![crate::protocol::ContentItem::text("工具调用成功")]
        );
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn test_cancelled_call_returns_to_ready_and_discards_late_response() {
        let (mut session, mut handle) = ready_session().await;

        // Cancel shortly after the call goes out; nothing answers it.
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = session.call_tool("slow-tool", Map::new(), &cancel).await;
        let err = outcome.err().expect("expected cancellation");
        assert!(err
            .downcast_ref::<RelayError>()
            .is_some_and(RelayError::is_cancelled));
        assert_eq!(session.state(), SessionState::Ready);

        // The abandoned request is still visible on the wire; answer it
        // late. The read loop must discard it.
        let raw = handle.outbound_rx.recv().await.unwrap();
        let abandoned: serde_json::Value = serde_json::from_str(&raw).unwrap();
        handle
            .inbound_tx
            .send(
                serde_json::json!({
                    "status": "success",
                    "message": "too late",
                    "id": abandoned["id"],
                    "result": { "content": [{ "type": "text", "text": "stale" }], "isError": false },
                })
                .to_string(),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The next call is unaffected by the stale response.
        let fresh = CancellationToken::new();
        let (outcome, ()) = tokio::join!(
            session.call_tool("example-tool", Map::new(), &fresh),
            async {
                answer_next(
                    &mut handle,
                    serde_json::json!({
                        "result": {
                            "content": [{ "type": "text", "text": "fresh" }],
                            "isError": false,
                        }
                    }),
                )
                .await;
            }
        );
        let result = outcome.expect("follow-up call failed");
        assert_eq!(
            result.content,
            vec![crate::protocol::ContentItem::text("fresh")]
        );
    }

    #[tokio::test]
    async fn test_cancelled_initialize_tears_down_to_disconnected() {
        let (mut session, _handle) = attached_session();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = session.initialize(&cancel).await;
        assert!(outcome.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_request_timeout_when_nothing_answers() {
        let mut session = session().with_request_timeout(Duration::from_millis(50));
        let (transport, _handle) = FakeTransport::new();
        session.attach(Arc::new(transport)).unwrap();

        let cancel = CancellationToken::new();
        let outcome = session.initialize(&cancel).await;
        let err = outcome.err().expect("expected timeout");
        assert!(err.to_string().contains("Timeout"), "got: {err}");
        // Timeout is not cancellation; the session is not torn down.
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_close_is_terminal_until_reconnected() {
        let (mut session, _handle) = ready_session().await;
        session.close();
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.capabilities().is_none());

        let cancel = CancellationToken::new();
        let result = session.call_tool("example-tool", Map::new(), &cancel).await;
        assert!(result.is_err());

        // A fresh transport may be attached after close.
        let (transport, _second) = FakeTransport::new();
        session.attach(Arc::new(transport)).unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_connect_refused_leaves_disconnected() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let mut session = session();
        let cancel = CancellationToken::new();
        let result = session.connect(&addr, &cancel).await;
        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Disconnected);
    }
}
