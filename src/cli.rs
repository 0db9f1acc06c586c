//! Command-line interface definition for the event relay
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands to run the server, call a tool from the client
//! side, and run the self-contained demo.

use clap::{Parser, Subcommand};

/// evrelay - TCP event relay and client session
///
/// Run the relay server, invoke tools on a running relay, or exercise
/// both halves end to end with the demo command.
#[derive(Parser, Debug, Clone)]
#[command(name = "evrelay")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for the relay
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run the relay server until interrupted
    Serve {
        /// Override the configured bind port (0 = ephemeral)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Connect to a running relay and invoke one tool
    Call {
        /// Server address to connect to
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,

        /// Name of the tool to invoke
        #[arg(short, long, default_value = "example-tool")]
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,
    },

    /// Run server and client in-process and print the tool result
    Demo {
        /// Override the configured bind port (0 = ephemeral)
        #[arg(short, long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The port override carried by the active command, if any.
    pub fn port_override(&self) -> Option<u16> {
        match &self.command {
            Commands::Serve { port } | Commands::Demo { port } => *port,
            Commands::Call { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_with_port_override() {
        let cli = Cli::parse_from(["evrelay", "serve", "--port", "0"]);
        assert!(matches!(cli.command, Commands::Serve { port: Some(0) }));
        assert_eq!(cli.port_override(), Some(0));
    }

    #[test]
    fn test_call_defaults() {
        let cli = Cli::parse_from(["evrelay", "call"]);
        // Check the override before the match consumes `cli.command`.
        assert_eq!(cli.port_override(), None);
        match cli.command {
            Commands::Call { addr, tool, args } => {
                assert_eq!(addr, "127.0.0.1:8080");
                assert_eq!(tool, "example-tool");
                assert_eq!(args, "{}");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_demo_without_port() {
        let cli = Cli::parse_from(["evrelay", "demo"]);
        assert!(matches!(cli.command, Commands::Demo { port: None }));
        // The config path always carries the clap default.
        assert_eq!(cli.config, "config/config.yaml");
    }

    #[test]
    fn test_verbose_and_config_flags() {
        let cli = Cli::parse_from(["evrelay", "-v", "-c", "relay.yaml", "serve"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, "relay.yaml");
    }
}
