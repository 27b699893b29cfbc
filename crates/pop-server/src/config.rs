//! Server configuration: a TOML file with `POP_*` environment overrides.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub protocol: ProtocolConfig,

    /// Peer servers to dial at startup.
    #[serde(default)]
    pub federation: FederationConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL (`ws://host:port`). Clients connect to
    /// `<public_address>/client`, peers to `<public_address>/server`.
    #[serde(default)]
    pub public_address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "pop_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Protocol configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolConfig {
    /// When set, only this key may create LAOs.
    #[serde(default)]
    pub owner_public_key: Option<String>,

    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    #[serde(default = "default_rumor_interval_secs")]
    pub rumor_interval_secs: u64,

    /// Lifetime of a minted federation challenge.
    #[serde(default = "default_challenge_ttl_secs")]
    pub challenge_ttl_secs: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FederationConfig {
    /// Server endpoints (`ws://host:port/server`) to connect to at startup.
    #[serde(default)]
    pub peers: Vec<String>,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    9000
}

fn default_db_path() -> String {
    "pop.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_heartbeat_interval_secs() -> u64 {
    30
}

fn default_rumor_interval_secs() -> u64 {
    2
}

fn default_challenge_ttl_secs() -> i64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_address: None,
        }
    }
}

impl ServerConfig {
    /// The base URL advertised to clients and peers.
    pub fn public_address(&self) -> String {
        self.public_address
            .clone()
            .unwrap_or_else(|| format!("ws://{}:{}", self.host, self.port))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            owner_public_key: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            rumor_interval_secs: default_rumor_interval_secs(),
            challenge_ttl_secs: default_challenge_ttl_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl Config {
    fn apply_env(&mut self) {
        if let Some(host) = env_var("POP_HOST").and_then(|v| v.parse().ok()) {
            self.server.host = host;
        }
        if let Some(port) = env_var("POP_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(address) = env_var("POP_PUBLIC_ADDRESS") {
            self.server.public_address = Some(address);
        }
        if let Some(path) = env_var("POP_DB_PATH") {
            self.database.path = path;
        }
        if let Some(level) = env_var("POP_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = env_var("POP_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "true" | "1");
        }
        if let Some(owner) = env_var("POP_OWNER_KEY") {
            self.protocol.owner_public_key = Some(owner);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.pool_max_size == 0 {
            return Err(ConfigError::Invalid(
                "database.pool_max_size must be at least 1".to_string(),
            ));
        }
        if self.protocol.challenge_ttl_secs <= 0 {
            return Err(ConfigError::Invalid(
                "protocol.challenge_ttl_secs must be positive".to_string(),
            ));
        }
        if let Some(owner) = &self.protocol.owner_public_key {
            pop_crypto::decode_public_key(owner).map_err(|e| {
                ConfigError::Invalid(format!("protocol.owner_public_key: {e}"))
            })?;
        }
        Ok(())
    }
}

/// Non-blank value of an environment variable.
fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Reads the TOML file at `path` (defaults when absent), then applies the
/// `POP_HOST`, `POP_PORT`, `POP_PUBLIC_ADDRESS`, `POP_DB_PATH`,
/// `POP_LOG_LEVEL`, `POP_LOG_JSON` and `POP_OWNER_KEY` overrides.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path.map(|p| (p, std::fs::read_to_string(p))) {
        None => Config::default(),
        Some((_, Ok(contents))) => toml::from_str(&contents)?,
        Some((p, Err(e))) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!(path = p, "no config file, using defaults");
            Config::default()
        }
        Some((_, Err(e))) => return Err(e.into()),
    };
    config.apply_env();
    config.validate()?;
    Ok(config)
}
