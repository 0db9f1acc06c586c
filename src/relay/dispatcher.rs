//! Event dispatch
//!
//! [`EventDispatcher::dispatch`] turns one decoded [`Event`] into one
//! [`Response`]. Dispatch never fails outward: a missing or unknown
//! discriminator, or a malformed event shape, becomes an error response
//! so the connection that carried the event stays open.
//!
//! Two event kinds are built in: `initialize` answers with the declared
//! server capabilities, and `call-tool` resolves through the
//! [`ToolRegistry`]. Further kinds can be registered with
//! [`EventDispatcher::on_event_kind`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::protocol::{
    Event, Response, ServerCapabilities, EVENT_CALL_TOOL, EVENT_INITIALIZE,
};
use crate::relay::RelayObserver;
use crate::tools::ToolRegistry;

/// A registered handler for one event kind.
pub type EventHandler = Arc<dyn Fn(&Event) -> Response + Send + Sync>;

/// Routes decoded events to handlers and produces response payloads.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use evrelay::protocol::ServerCapabilities;
/// use evrelay::relay::{EventDispatcher, LoggingObserver};
/// use evrelay::tools::ToolRegistry;
///
/// let dispatcher = EventDispatcher::new(
///     Arc::new(ToolRegistry::new()),
///     ServerCapabilities::full(),
///     Arc::new(LoggingObserver),
/// );
/// let event = serde_json::from_str(r#"{"type":"initialize","id":1}"#).unwrap();
/// let response = dispatcher.dispatch(&event);
/// assert!(response.is_success());
/// ```
pub struct EventDispatcher {
    tools: Arc<ToolRegistry>,
    capabilities: ServerCapabilities,
    handlers: RwLock<HashMap<String, EventHandler>>,
    observer: Arc<dyn RelayObserver>,
}

impl EventDispatcher {
    /// Create a dispatcher over the given registry and capability set.
    pub fn new(
        tools: Arc<ToolRegistry>,
        capabilities: ServerCapabilities,
        observer: Arc<dyn RelayObserver>,
    ) -> Self {
        Self {
            tools,
            capabilities,
            handlers: RwLock::new(HashMap::new()),
            observer,
        }
    }

    /// The tool registry this dispatcher resolves `call-tool` against.
    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Register a handler for an additional event kind. Last
    /// registration for a kind wins. The built-in `initialize` and
    /// `call-tool` kinds cannot be overridden.
    pub fn on_event_kind<F>(&self, kind: impl Into<String>, handler: F)
    where
        F: Fn(&Event) -> Response + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .expect("dispatcher handler lock poisoned")
            .insert(kind.into(), Arc::new(handler));
    }

    /// Route one event to its handler and produce the response.
    ///
    /// The observer is notified of the event first, independent of the
    /// response path. All failure modes are converted into an error
    /// response; this method never returns an error to the caller.
    pub fn dispatch(&self, event: &Event) -> Response {
        self.observer.on_event(event);
        let id = event.id();

        let Some(kind) = event.kind() else {
            return Response::error("event missing type discriminator").with_id(id);
        };

        match kind {
            EVENT_INITIALIZE => Response::success("initialized")
                .with_id(id)
                .with_capabilities(self.capabilities),
            EVENT_CALL_TOOL => self.dispatch_call_tool(event).with_id(id),
            other => {
                let handler = {
                    let handlers = self
                        .handlers
                        .read()
                        .expect("dispatcher handler lock poisoned");
                    handlers.get(other).cloned()
                };
                match handler {
                    Some(handler) => handler(event).with_id(id),
                    None => Response::error(format!("no handler for event type `{other}`"))
                        .with_id(id),
                }
            }
        }
    }

    fn dispatch_call_tool(&self, event: &Event) -> Response {
        let Some(name) = event.field("name").and_then(Value::as_str) else {
            return Response::error("call-tool event missing tool name");
        };

        let empty = Map::new();
        let arguments = event
            .field("arguments")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let result = self.tools.resolve(name, arguments);
        Response::success("tool call completed").with_result(result)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("tools", &self.tools)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
