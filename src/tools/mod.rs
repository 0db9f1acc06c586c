//! Tool registry
//!
//! Maps a tool name to a handler function. Handlers are pure: they take
//! the call arguments and return a [`ToolCallResult`]. Registration is
//! last-wins; resolving an unknown name yields an `is_error` result
//! rather than a hard failure, so the connection that carried the call
//! always gets an answer.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{Map, Value};

use crate::protocol::ToolCallResult;

/// A registered tool handler: arguments in, result out.
pub type ToolHandler = Arc<dyn Fn(&Map<String, Value>) -> ToolCallResult + Send + Sync>;

/// Registry of named tools available to `call-tool` events.
///
/// # Examples
///
/// ```
/// use evrelay::protocol::ToolCallResult;
/// use evrelay::tools::ToolRegistry;
///
/// let registry = ToolRegistry::new();
/// registry.register("example-tool", |_args| ToolCallResult::text("工具调用成功"));
///
/// let result = registry.resolve("example-tool", &serde_json::Map::new());
/// assert!(!result.is_error);
/// ```
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolHandler>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry preloaded with the built-in demo tool.
    ///
    /// `example-tool` ignores its arguments and returns the canonical
    /// success text.
    pub fn with_builtin_tools() -> Self {
        let registry = Self::new();
        registry.register("example-tool", |_args| ToolCallResult::text("工具调用成功"));
        registry
    }

    /// Register a handler under `name`.
    ///
    /// The last registration for a given name wins; there is no
    /// duplicate-detection error.
    pub fn register<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Map<String, Value>) -> ToolCallResult + Send + Sync + 'static,
    {
        let name = name.into();
        tracing::debug!(tool = %name, "registering tool");
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(name, Arc::new(handler));
    }

    /// Resolve a call against the registry.
    ///
    /// An unknown name yields `is_error = true` with an explanatory text
    /// item; it is never a hard failure.
    pub fn resolve(&self, name: &str, arguments: &Map<String, Value>) -> ToolCallResult {
        let handler = {
            let tools = self.tools.read().expect("tool registry lock poisoned");
            tools.get(name).cloned()
        };

        match handler {
            Some(handler) => handler(arguments),
            None => {
                tracing::debug!(tool = %name, "call for unregistered tool");
                ToolCallResult::error(format!("未知工具: {name}"))
            }
        }
    }

    /// Names of all registered tools, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .expect("tool registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}
