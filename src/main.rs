//! evrelay - TCP event relay and client session CLI
//!
//! Main entry point: runs the relay server, calls a tool on a running
//! relay, or exercises both halves in-process with the demo command.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use evrelay::cli::{Cli, Commands};
use evrelay::config::Config;
use evrelay::protocol::{ClientInfo, ContentItem};
use evrelay::relay::{EventDispatcher, LoggingObserver, RelayListener};
use evrelay::session::Session;
use evrelay::tools::ToolRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments first so --verbose can shape logging
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load and validate configuration
    let config = Config::load(&cli.config, &cli)?;
    config.validate()?;

    match cli.command.clone() {
        Commands::Serve { .. } => run_serve(config).await,
        Commands::Call { addr, tool, args } => run_call(config, &addr, &tool, &args).await,
        Commands::Demo { .. } => run_demo(config).await,
    }
}

/// Run the relay server until Ctrl-C.
async fn run_serve(config: Config) -> Result<()> {
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::new(ToolRegistry::with_builtin_tools()),
        config.server.capabilities.to_capabilities(),
        Arc::new(LoggingObserver),
    ));

    let listener =
        RelayListener::start(config.server.port, dispatcher, Arc::new(LoggingObserver)).await?;
    println!("relay listening on {}", listener.local_addr());

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    listener.stop().await;
    Ok(())
}

/// Connect to a running relay, initialize, and invoke one tool.
async fn run_call(config: Config, addr: &str, tool: &str, args: &str) -> Result<()> {
    let arguments: serde_json::Map<String, serde_json::Value> = serde_json::from_str(args)?;

    let mut session = Session::new(ClientInfo {
        name: config.client.name.clone(),
        version: config.client.version.clone(),
    })
    .with_request_timeout(config.client.request_timeout());

    let cancel = CancellationToken::new();
    session.connect(addr, &cancel).await?;
    let capabilities = session.initialize(&cancel).await?;
    tracing::info!(?capabilities, "session initialized");

    let result = session.call_tool(tool, arguments, &cancel).await?;
    print_result(&result.content, result.is_error);

    session.close();
    Ok(())
}

/// Start a relay on the configured port, drive a session against it,
/// and print the tool result. The listener's successful start is the
/// readiness signal; no delay is needed before connecting.
async fn run_demo(config: Config) -> Result<()> {
    let dispatcher = Arc::new(EventDispatcher::new(
        Arc::new(ToolRegistry::with_builtin_tools()),
        config.server.capabilities.to_capabilities(),
        Arc::new(LoggingObserver),
    ));
    let listener =
        RelayListener::start(config.server.port, dispatcher, Arc::new(LoggingObserver)).await?;
    println!("relay listening on {}", listener.local_addr());

    let mut session = Session::new(ClientInfo {
        name: config.client.name.clone(),
        version: config.client.version.clone(),
    })
    .with_request_timeout(config.client.request_timeout());

    let cancel = CancellationToken::new();
    session
        .connect(&listener.local_addr().to_string(), &cancel)
        .await?;
    let capabilities = session.initialize(&cancel).await?;
    println!("server capabilities: {capabilities:?}");

    let mut arguments = serde_json::Map::new();
    arguments.insert("key".into(), serde_json::Value::String("value".into()));
    let result = session.call_tool("example-tool", arguments, &cancel).await?;
    print_result(&result.content, result.is_error);

    // Deterministic teardown: close the session first, then give the
    // server a moment to evict the connection before stopping.
    session.close();
    tokio::time::sleep(Duration::from_millis(50)).await;
    listener.stop().await;
    Ok(())
}

fn print_result(content: &[ContentItem], is_error: bool) {
    if is_error {
        println!("tool reported an error:");
    }
    for item in content {
        match item {
            ContentItem::Text(text) => println!("{text}"),
            ContentItem::Unhandled(kind) => println!("[unhandled content: {kind}]"),
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "evrelay=debug" } else { "evrelay=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
