//! Configuration module for the lineport server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "lineport")]
#[command(author = "lineport authors")]
#[command(version = "0.1.0")]
#[command(about = "A TCP + UDP line protocol server", long_about = None)]
pub struct CliArgs {
    /// Port shared by the TCP listener and the UDP socket
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Maximum readiness events handled per wait
    #[arg(long)]
    pub max_events: Option<usize>,

    /// TCP listen backlog
    #[arg(long)]
    pub backlog: Option<u32>,

    /// Maximum concurrent TCP clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Initial per-client receive buffer size in bytes
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[server]` table. Missing keys fall back to the built-in defaults.
#[derive(Debug, Deserialize, Default)]
pub struct ServerSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_events: Option<usize>,
    pub backlog: Option<u32>,
    pub max_clients: Option<usize>,
}

/// `[session]` table.
#[derive(Debug, Deserialize, Default)]
pub struct SessionSection {
    pub buffer_size: Option<usize>,
}

/// `[logging]` table.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_MAX_EVENTS: usize = 64;
pub const DEFAULT_BACKLOG: u32 = 128;
pub const DEFAULT_MAX_CLIENTS: usize = 1024;
pub const DEFAULT_BUFFER_SIZE: usize = 4096;

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    /// Port 0 binds an ephemeral port; only reachable when built in code.
    pub port: u16,
    pub max_events: usize,
    pub listen_backlog: u32,
    pub max_clients: usize,
    pub client_buffer_size: usize,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            max_events: DEFAULT_MAX_EVENTS,
            listen_backlog: DEFAULT_BACKLOG,
            max_clients: DEFAULT_MAX_CLIENTS,
            client_buffer_size: DEFAULT_BUFFER_SIZE,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Resolve parsed CLI args, reading the TOML file they name (if any),
    /// and validate the result.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|source| ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    /// Merge CLI args over TOML values over defaults.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let server = toml_config.server;
        Config {
            host: cli.host.or(server.host).unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(server.port).unwrap_or(DEFAULT_PORT),
            max_events: cli
                .max_events
                .or(server.max_events)
                .unwrap_or(DEFAULT_MAX_EVENTS),
            listen_backlog: cli.backlog.or(server.backlog).unwrap_or(DEFAULT_BACKLOG),
            max_clients: cli
                .max_clients
                .or(server.max_clients)
                .unwrap_or(DEFAULT_MAX_CLIENTS),
            client_buffer_size: cli
                .buffer_size
                .or(toml_config.session.buffer_size)
                .unwrap_or(DEFAULT_BUFFER_SIZE),
            // clap always fills log_level, so only a non-default value overrides the file
            log_level: if cli.log_level != "info" && !cli.log_level.is_empty() {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Invalid("port must be in 1-65535"));
        }
        if self.max_events == 0 {
            return Err(ConfigError::Invalid("max_events must be positive"));
        }
        if self.listen_backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be positive"));
        }
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid("max_clients must be positive"));
        }
        if self.client_buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be positive"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", path.display())]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{}': {source}", path.display())]
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
