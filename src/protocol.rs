//! Wire types for the relay protocol
//!
//! Every message on the wire is one UTF-8 JSON object per line
//! (newline-delimited framing; see [`crate::frame`]).
//!
//! Client -> server messages are [`Event`]s: JSON objects carrying at
//! least a `type` discriminator and, when the sender wants a correlated
//! reply, a numeric `id`. Server -> client messages are [`Response`]s:
//! a `status`/`message` envelope that echoes the request `id` and may
//! carry negotiated [`ServerCapabilities`] (initialize) or a
//! [`ToolCallResult`] (call-tool).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Event kind for the session handshake.
pub const EVENT_INITIALIZE: &str = "initialize";
/// Event kind for a remote tool invocation.
pub const EVENT_CALL_TOOL: &str = "call-tool";

/// Discriminator field present on every event.
pub const FIELD_TYPE: &str = "type";
/// Correlation id field, echoed back on the response.
pub const FIELD_ID: &str = "id";

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A parsed inbound message: a JSON object keyed by strings.
///
/// Events are immutable once parsed; their lifetime is bounded to one
/// dispatch cycle. The `type` field selects the handler; a missing
/// discriminator is a dispatch error, not a parse error.
///
/// # Examples
///
/// ```
/// use evrelay::protocol::Event;
///
/// let event: Event = serde_json::from_str(r#"{"type":"ping","id":7}"#).unwrap();
/// assert_eq!(event.kind(), Some("ping"));
/// assert_eq!(event.id(), Some(7));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(pub Map<String, Value>);

impl Event {
    /// The `type` discriminator, if present and a string.
    pub fn kind(&self) -> Option<&str> {
        self.0.get(FIELD_TYPE).and_then(Value::as_str)
    }

    /// The correlation `id`, if present and numeric.
    pub fn id(&self) -> Option<u64> {
        self.0.get(FIELD_ID).and_then(Value::as_u64)
    }

    /// Look up an arbitrary field by key.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Build an `initialize` event for the given client identity.
    pub fn initialize(id: u64, client_info: &ClientInfo) -> Self {
        let mut map = Map::new();
        map.insert(FIELD_TYPE.into(), Value::String(EVENT_INITIALIZE.into()));
        map.insert(FIELD_ID.into(), Value::from(id));
        map.insert(
            "clientInfo".into(),
            serde_json::to_value(client_info).unwrap_or(Value::Null),
        );
        Event(map)
    }

    /// Build a `call-tool` event for the given tool name and arguments.
    pub fn call_tool(id: u64, name: &str, arguments: Map<String, Value>) -> Self {
        let mut map = Map::new();
        map.insert(FIELD_TYPE.into(), Value::String(EVENT_CALL_TOOL.into()));
        map.insert(FIELD_ID.into(), Value::from(id));
        map.insert("name".into(), Value::String(name.to_string()));
        map.insert("arguments".into(), Value::Object(arguments));
        Event(map)
    }
}

/// Name and version of a client implementation, sent during initialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// Envelope status of a [`Response`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// The event was parsed and dispatched.
    Success,
    /// The event could not be parsed or dispatched; `message` explains why.
    Error,
}

/// One response, produced exactly once per received event and written
/// back on the originating connection.
///
/// The `status`/`message` pair is always present; `id` echoes the
/// request's correlation id when the event carried one. Tool-level
/// failure travels inside [`ToolCallResult::is_error`], not in `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Envelope status
    pub status: ResponseStatus,
    /// Human-readable outcome description
    pub message: String,
    /// Correlation id echoed from the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Server capabilities (initialize responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<ServerCapabilities>,
    /// Tool call result (call-tool responses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolCallResult>,
}

impl Response {
    /// Create a success response with the given message.
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: message.into(),
            id: None,
            capabilities: None,
            result: None,
        }
    }

    /// Create an error response with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: message.into(),
            id: None,
            capabilities: None,
            result: None,
        }
    }

    /// Attach the correlation id echoed from the request, if any.
    pub fn with_id(mut self, id: Option<u64>) -> Self {
        self.id = id;
        self
    }

    /// Attach negotiated server capabilities.
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Attach a tool call result.
    pub fn with_result(mut self, result: ToolCallResult) -> Self {
        self.result = Some(result);
        self
    }

    /// Whether the envelope reports success.
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

// ---------------------------------------------------------------------------
// Tool call payloads
// ---------------------------------------------------------------------------

/// One item of tool output.
///
/// On the wire each item is an object with a `type` tag. Only `text` is
/// rendered; any other tag deserializes to [`ContentItem::Unhandled`] so
/// unknown kinds survive a round trip without failing the parse.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentItem {
    /// Plain text output
    Text(String),
    /// An item of a kind this implementation does not render
    Unhandled(String),
}

impl ContentItem {
    /// Convenience constructor for a text item.
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text(text.into())
    }
}

#[derive(Serialize, Deserialize)]
struct ContentItemWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

impl Serialize for ContentItem {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = match self {
            ContentItem::Text(text) => ContentItemWire {
                kind: "text".to_string(),
                text: Some(text.clone()),
            },
            ContentItem::Unhandled(kind) => ContentItemWire {
                kind: kind.clone(),
                text: None,
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentItem {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let wire = ContentItemWire::deserialize(deserializer)?;
        Ok(match (wire.kind.as_str(), wire.text) {
            ("text", Some(text)) => ContentItem::Text(text),
            ("text", None) => ContentItem::Text(String::new()),
            (_, _) => ContentItem::Unhandled(wire.kind),
        })
    }
}

/// The result of resolving one tool call: ordered content items plus an
/// error flag. A tool-level failure sets `is_error` without touching the
/// response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    /// Ordered output items
    pub content: Vec<ContentItem>,
    /// Whether the tool reported a failure
    #[serde(rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A successful result with a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: false,
        }
    }

    /// A failed result with a single explanatory text item.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            is_error: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// Change-notification flags for the server's prompt surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptCapabilities {
    /// Server emits prompt list-changed notifications
    #[serde(default)]
    pub list_changed: bool,
}

/// Subscription and change-notification flags for the resource surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCapabilities {
    /// Clients may subscribe to individual resources
    #[serde(default)]
    pub subscribe: bool,
    /// Server emits resource list-changed notifications
    #[serde(default)]
    pub list_changed: bool,
}

/// Change-notification flags for the tool surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCapabilities {
    /// Server emits tool list-changed notifications
    #[serde(default)]
    pub list_changed: bool,
}

/// The capability set a server declares and a session captures during
/// initialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Prompt surface flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptCapabilities>,
    /// Resource surface flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceCapabilities>,
    /// Tool surface flags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolCapabilities>,
}

impl ServerCapabilities {
    /// The full capability set declared by the demo server: prompts,
    /// resources (with subscribe), and tools, all with change
    /// notifications enabled.
    pub fn full() -> Self {
        Self {
            prompts: Some(PromptCapabilities { list_changed: true }),
            resources: Some(ResourceCapabilities {
                subscribe: true,
                list_changed: true,
            }),
            tools: Some(ToolCapabilities { list_changed: true }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
