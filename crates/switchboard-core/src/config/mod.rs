//! Gateway configuration with layered loading.
//!
//! # Configuration Hierarchy
//!
//! Configuration is loaded in this order (later overrides earlier):
//!
//! 1. **Compiled defaults**: serde defaults on every section
//! 2. **Config file**: TOML file specified by `SWITCHBOARD_CONFIG` env var
//! 3. **Environment variables**: `SWITCHBOARD__*` env vars override specific fields
//!
//! # Configuration Sections
//!
//! - [`ServerConfig`]: HTTP listener
//! - [`HttpClientConfig`]: outbound connection pool
//! - [`RelayConfig`]: retries, time budgets, fallback endpoints
//! - [`SelectionConfig`]: shelving thresholds and quality-record TTLs
//! - [`SyncConfig`]: sync filter cache and lock TTLs
//! - [`MetricsConfig`]: batch flushing and durable storage
//! - [`LoggingConfig`]: log level and format
//! - `blockchains`, `applications`, `load_balancers`, `sessions`: static
//!   registry and session entries
//!
//! # Example
//!
//! ```toml
//! [server]
//! bind_port = 8080
//!
//! [relay]
//! relay_retries = 2
//! fallback_urls = ["https://fallback.example.org"]
//!
//! [[blockchains]]
//! id = "eth-mainnet"
//! hash = "0021"
//! enforce_result = "JSON"
//!
//! [[sessions]]
//! blockchain = "0021"
//! nodes = [{ public_key = "node-a", service_url = "https://node-a.example.org" }]
//! ```

use crate::{
    client::HttpClientConfig,
    metrics::MetricsConfig,
    relay::{RelayConfig, SecretKeyCipher},
    selection::SelectionConfig,
    sync::SyncConfig,
    types::{Application, Blockchain, LoadBalancer, Node},
};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

/// HTTP server configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind the server to. Defaults to `127.0.0.1`.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port number to listen on. Must be greater than 0. Defaults to `3030`.
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,

    /// Maximum number of relays served concurrently. Defaults to `1000`.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,

    /// Maximum accepted request body in bytes. Defaults to 1 MiB.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_bind_port() -> u16 {
    3030
}

fn default_max_concurrent_requests() -> usize {
    1000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
            max_concurrent_requests: default_max_concurrent_requests(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// In-process quality store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How often expired entries are purged, in seconds. Defaults to `60`.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { sweep_interval_seconds: default_sweep_interval() }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset. Defaults to `"info"`.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// `"json"` or `"pretty"`. Defaults to `"pretty"`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

/// Nodes serving one blockchain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Blockchain hash.
    pub blockchain: String,
    pub nodes: Vec<Node>,
}

/// Root gateway configuration.
///
/// Loaded with the `SWITCHBOARD` prefix for environment overrides using `__`
/// as a separator (e.g. `SWITCHBOARD__RELAY__RELAY_RETRIES=5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Deployment environment (e.g., "development", "production"). Defaults to `"development"`.
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub http: HttpClientConfig,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub selection: SelectionConfig,

    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub blockchains: Vec<Blockchain>,

    #[serde(default)]
    pub applications: Vec<Application>,

    #[serde(default)]
    pub load_balancers: Vec<LoadBalancer>,

    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
}

fn default_environment() -> String {
    "development".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            server: ServerConfig::default(),
            http: HttpClientConfig::default(),
            relay: RelayConfig::default(),
            selection: SelectionConfig::default(),
            sync: SyncConfig::default(),
            metrics: MetricsConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
            blockchains: Vec::new(),
            applications: Vec::new(),
            load_balancers: Vec::new(),
            sessions: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file with environment variable overrides.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed, or deserialized.
    pub fn from_file<P: AsRef<Path>>(config_path: P) -> Result<Self, ConfigError> {
        let config_builder = Config::builder()
            .set_default("environment", "development")?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")?
            .add_source(File::with_name(&config_path.as_ref().to_string_lossy()).required(false))
            .add_source(Environment::with_prefix("SWITCHBOARD").separator("__"))
            .build()?;

        config_builder.try_deserialize()
    }

    /// Loads configuration from `config/config.toml`, or the path in
    /// `SWITCHBOARD_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the configuration cannot be loaded or parsed.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path =
            std::env::var("SWITCHBOARD_CONFIG").unwrap_or_else(|_| "config/config.toml".to_string());
        Self::from_file(&config_path)
    }

    /// Returns the parsed socket address for the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns an error string if the address cannot be parsed.
    pub fn socket_addr(&self) -> Result<std::net::SocketAddr, String> {
        format!("{}:{}", self.server.bind_address, self.server.bind_port)
            .parse()
            .map_err(|_| {
                format!(
                    "Invalid socket address: {}:{}",
                    self.server.bind_address, self.server.bind_port
                )
            })
    }

    /// Session node lists keyed by blockchain hash.
    #[must_use]
    pub fn sessions_by_blockchain(&self) -> HashMap<String, Vec<Node>> {
        let mut sessions: HashMap<String, Vec<Node>> = HashMap::new();
        for session in &self.sessions {
            sessions.entry(session.blockchain.clone()).or_default().extend(session.nodes.iter().cloned());
        }
        sessions
    }

    /// Validates the configuration for correctness and consistency.
    ///
    /// # Errors
    ///
    /// Returns a descriptive error string if validation fails.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_port == 0 {
            return Err("Bind port must be greater than 0".to_string());
        }
        if self.server.max_concurrent_requests == 0 {
            return Err("Max concurrent requests must be greater than 0".to_string());
        }
        if self.http.concurrent_limit == 0 {
            return Err("HTTP client concurrent limit must be greater than 0".to_string());
        }

        if self.relay.request_timeout_ms == 0 || self.relay.attempt_timeout_ms == 0 {
            return Err("Relay timeouts must be greater than 0".to_string());
        }
        if self.relay.fallback_timeout_ms == 0 {
            return Err("Fallback timeout must be greater than 0".to_string());
        }
        for url in &self.relay.fallback_urls {
            if !url.starts_with("http") {
                return Err(format!("Invalid fallback URL: {url}"));
            }
        }
        if let Some(key) = self.relay.secret_key_cipher.as_deref().filter(|k| !k.is_empty()) {
            SecretKeyCipher::from_hex(key).map_err(|e| format!("Invalid secret key cipher: {e}"))?;
        }

        if self.selection.application_max_failures == 0 || self.selection.node_max_failures == 0 {
            return Err("Max failures per period must be greater than 0".to_string());
        }
        if self.sync.cache_ttl_seconds == 0 || self.sync.lock_ttl_seconds == 0 {
            return Err("Sync TTLs must be greater than 0".to_string());
        }
        if self.metrics.process_id.is_empty() {
            return Err("Metrics process id must not be empty".to_string());
        }
        if self.store.sweep_interval_seconds == 0 {
            return Err("Store sweep interval must be greater than 0".to_string());
        }

        if !["json", "pretty"].contains(&self.logging.format.as_str()) {
            return Err("Logging format must be 'json' or 'pretty'".to_string());
        }

        self.validate_entities()
    }

    fn validate_entities(&self) -> Result<(), String> {
        let mut hashes = HashSet::new();
        for blockchain in &self.blockchains {
            if blockchain.hash.is_empty() {
                return Err(format!("Empty hash for blockchain: {}", blockchain.id));
            }
            if !hashes.insert(blockchain.hash.as_str()) {
                return Err(format!("Duplicate blockchain hash: {}", blockchain.hash));
            }
        }

        let application_ids: HashSet<&str> = self.applications.iter().map(|a| a.id.as_str()).collect();
        if application_ids.len() != self.applications.len() {
            return Err("Duplicate application id".to_string());
        }

        for lb in &self.load_balancers {
            if lb.application_ids.is_empty() {
                return Err(format!("Load balancer {} has no applications", lb.id));
            }
            if let Some(missing) = lb.application_ids.iter().find(|id| !application_ids.contains(id.as_str())) {
                return Err(format!("Load balancer {} references unknown application {missing}", lb.id));
            }
        }

        for session in &self.sessions {
            if !hashes.contains(session.blockchain.as_str()) {
                return Err(format!("Session references unknown blockchain: {}", session.blockchain));
            }
            for node in &session.nodes {
                if !node.service_url.starts_with("http") {
                    return Err(format!(
                        "Invalid service URL for node {}: {}",
                        node.public_key, node.service_url
                    ));
                }
            }
        }

        Ok(())
    }
}
