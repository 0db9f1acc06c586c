//! Configuration management for the event relay
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{RelayError, Result};
use crate::protocol::{
    PromptCapabilities, ResourceCapabilities, ServerCapabilities, ToolCapabilities,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for the relay
///
/// Holds everything both halves of the binary need: the server's bind
/// port and declared capabilities, and the client session's identity
/// and deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Relay server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Client session configuration
    #[serde(default)]
    pub client: ClientConfig,
}

/// Relay server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// TCP port to bind; `0` asks the OS for an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Capability surfaces the server declares during initialize
    #[serde(default)]
    pub capabilities: CapabilityConfig,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            capabilities: CapabilityConfig::default(),
        }
    }
}

/// Capability flags declared by the server
///
/// Each flag gates one surface of [`ServerCapabilities`]; everything is
/// on by default, matching the demo server's full declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapabilityConfig {
    /// Declare the prompt surface (with list-changed notifications)
    #[serde(default = "default_true")]
    pub prompts: bool,

    /// Declare the resource surface (with list-changed notifications)
    #[serde(default = "default_true")]
    pub resources: bool,

    /// Allow per-resource subscriptions (requires `resources`)
    #[serde(default = "default_true")]
    pub resource_subscribe: bool,

    /// Declare the tool surface (with list-changed notifications)
    #[serde(default = "default_true")]
    pub tools: bool,
}

fn default_true() -> bool {
    true
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            prompts: true,
            resources: true,
            resource_subscribe: true,
            tools: true,
        }
    }
}

impl CapabilityConfig {
    /// Build the wire-level capability set from the configured flags.
    pub fn to_capabilities(&self) -> ServerCapabilities {
        ServerCapabilities {
            prompts: self
                .prompts
                .then_some(PromptCapabilities { list_changed: true }),
            resources: self.resources.then_some(ResourceCapabilities {
                subscribe: self.resource_subscribe,
                list_changed: true,
            }),
            tools: self
                .tools
                .then_some(ToolCapabilities { list_changed: true }),
        }
    }
}

/// Client session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client name announced during initialize
    #[serde(default = "default_client_name")]
    pub name: String,

    /// Client version announced during initialize
    #[serde(default = "default_client_version")]
    pub version: String,

    /// Per-request deadline (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_client_name() -> String {
    "evrelay-client".to_string()
}

fn default_client_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_client_name(),
            version: default_client_version(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl ClientConfig {
    /// The configured request deadline as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            client: ClientConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with the full precedence chain:
    /// file, then environment variables, then CLI overrides.
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - Parsed CLI arguments supplying overrides
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| RelayError::Config(format!("Failed to parse config: {}", e)).into())
    }

    /// Apply environment variable overrides.
    ///
    /// Recognized variables:
    /// - `EVRELAY_PORT` - server bind port
    /// - `EVRELAY_CLIENT_NAME` - client name for initialize
    fn apply_env_vars(&mut self) {
        if let Ok(port) = std::env::var("EVRELAY_PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid EVRELAY_PORT value: {}", port),
            }
        }
        if let Ok(name) = std::env::var("EVRELAY_CLIENT_NAME") {
            if !name.is_empty() {
                self.client.name = name;
            }
        }
    }

    /// Apply CLI overrides (highest precedence).
    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(port) = cli.port_override() {
            self.server.port = port;
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Config`] describing the first violated
    /// constraint.
    pub fn validate(&self) -> Result<()> {
        if self.client.name.is_empty() {
            return Err(RelayError::Config("client name cannot be empty".to_string()).into());
        }

        if self.client.version.is_empty() {
            return Err(RelayError::Config("client version cannot be empty".to_string()).into());
        }

        if self.client.request_timeout_seconds == 0 {
            return Err(RelayError::Config(
                "request_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.request_timeout_seconds > 3600 {
            return Err(RelayError::Config(
                "request_timeout_seconds must be less than or equal to 3600".to_string(),
            )
            .into());
        }

        if self.server.capabilities.resource_subscribe && !self.server.capabilities.resources {
            return Err(RelayError::Config(
                "resource_subscribe requires resources to be enabled".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
