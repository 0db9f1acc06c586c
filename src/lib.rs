//! evrelay - TCP event relay and client session library
//!
//! This library provides both halves of a newline-delimited JSON event
//! relay: a TCP server that accepts connections, dispatches typed events
//! to registered tools, and answers each event with exactly one
//! response; and a client session state machine that connects,
//! negotiates capabilities, and invokes remote tools with correlated,
//! cancellable requests.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `relay`: Listener, per-connection handlers, event dispatch, observers
//! - `session`: Client session state machine and transports
//! - `tools`: Tool registry and handlers
//! - `protocol`: Wire types (events, responses, capabilities)
//! - `frame`: Newline-delimited JSON frame decoding
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use evrelay::protocol::{ClientInfo, ServerCapabilities};
//! use evrelay::relay::{EventDispatcher, LoggingObserver, RelayListener};
//! use evrelay::session::Session;
//! use evrelay::tools::ToolRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let tools = Arc::new(ToolRegistry::with_builtin_tools());
//!     let dispatcher = Arc::new(EventDispatcher::new(
//!         tools,
//!         ServerCapabilities::full(),
//!         Arc::new(LoggingObserver),
//!     ));
//!     let listener = RelayListener::start(0, dispatcher, Arc::new(LoggingObserver)).await?;
//!
//!     let mut session = Session::new(ClientInfo {
//!         name: "demo-client".into(),
//!         version: "1.0.0".into(),
//!     });
//!     let cancel = CancellationToken::new();
//!     session.connect(&listener.local_addr().to_string(), &cancel).await?;
//!     session.initialize(&cancel).await?;
//!     let result = session
//!         .call_tool("example-tool", serde_json::Map::new(), &cancel)
//!         .await?;
//!     println!("{result:?}");
//!
//!     session.close();
//!     listener.stop().await;
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod relay;
pub mod session;
pub mod tools;

// Re-export commonly used types
pub use config::Config;
pub use error::{RelayError, Result};
pub use protocol::{ClientInfo, Event, Response, ServerCapabilities, ToolCallResult};
pub use relay::{EventDispatcher, LoggingObserver, RelayListener, RelayObserver};
pub use session::{Session, SessionState};
pub use tools::ToolRegistry;
