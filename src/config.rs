//! Configuration module for socks.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the built-in defaults.

use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "socks")]
#[command(author = "socks authors")]
#[command(version = "0.1.0")]
#[command(about = "Socks is a very fast tcp server", long_about = None)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Address to listen on (server) or dial (client), e.g. 127.0.0.1:4000
    #[arg(short, long, global = true)]
    pub address: Option<String>,

    /// Number of concurrent client workers
    #[arg(short = 'n', long, global = true)]
    pub max_clients: Option<usize>,

    /// Read buffer capacity in bytes
    #[arg(short, long, global = true)]
    pub buffer_size: Option<usize>,

    /// Delay between dial attempts in milliseconds
    #[arg(short, long, global = true)]
    pub retry_delay_ms: Option<u64>,

    /// Listen backlog for the server socket
    #[arg(long, global = true)]
    pub backlog: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

/// What the process runs as.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start tcp server (the default)
    Server,
    /// Start tcp client
    Client,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to; clients dial the same address
    #[serde(default = "default_address")]
    pub address: String,
    /// Pending connection queue length
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Capacity of the single read performed per connection
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Number of workers launched by the pool
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Delay between dial attempts in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_clients: default_max_clients(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_socket_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4000))
}

fn default_address() -> String {
    default_socket_addr().to_string()
}

fn default_backlog() -> u32 {
    1024
}

fn default_buffer_size() -> usize {
    1024
}

// Empirical ceiling on the machine the pool was first tuned on; not a
// server-side limit.
fn default_max_clients() -> usize {
    150
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub address: SocketAddr,
    pub backlog: u32,
    pub buffer_size: usize,
    pub max_clients: usize,
    pub retry_delay: Duration,
    pub log_level: String,
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Config {
            command: Command::Server,
            address: default_socket_addr(),
            backlog: default_backlog(),
            buffer_size: default_buffer_size(),
            max_clients: default_max_clients(),
            retry_delay: Duration::from_millis(default_retry_delay_ms()),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::resolve(cli, toml_config)
    }

    /// Merge CLI args over TOML values.
    fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let address = cli.address.unwrap_or(toml_config.server.address);
        let address = address
            .parse()
            .map_err(|e| ConfigError::InvalidAddress(address.clone(), e))?;

        // A zero-capacity read is indistinguishable from end of stream.
        let buffer_size = cli.buffer_size.unwrap_or(toml_config.server.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::ZeroBufferSize);
        }

        Ok(Config {
            command: cli.command.unwrap_or(Command::Server),
            address,
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            buffer_size,
            max_clients: cli.max_clients.unwrap_or(toml_config.client.max_clients),
            retry_delay: Duration::from_millis(
                cli.retry_delay_ms
                    .unwrap_or(toml_config.client.retry_delay_ms),
            ),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidAddress(String, std::net::AddrParseError),
    ZeroBufferSize,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidAddress(addr, e) => {
                write!(f, "Invalid address '{}': {}", addr, e)
            }
            ConfigError::ZeroBufferSize => write!(f, "buffer_size must be at least 1 byte"),
        }
    }
}

impl std::error::Error for ConfigError {}
