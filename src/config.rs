//! Configuration management for cdn-proxy

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Public proxy listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Admin API listen address
    #[serde(default = "default_api_addr")]
    pub api_addr: String,

    /// Serve the admin API (health, readiness, metrics)
    #[serde(default = "default_true")]
    pub api_enabled: bool,
}

/// Object store backend configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendConfig {
    /// Backend endpoint URL, e.g. `http://minio:9000`
    #[serde(default)]
    pub endpoint: String,

    /// Bucket holding all media objects
    #[serde(default)]
    pub bucket: String,
}

/// Fast cache (Redis/Valkey) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// `host:port` or a full `redis://` URL
    #[serde(default = "default_cache_address")]
    pub address: String,

    /// Write `audio_name:<user>:<hash>` after a durable store lookup
    #[serde(default = "default_true")]
    pub repopulate: bool,

    /// TTL of the secondary audio name entry
    #[serde(default = "default_audio_name_ttl")]
    pub audio_name_ttl_seconds: u64,
}

/// Durable store (PostgreSQL) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Connection string
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

/// Filename resolution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResolverConfig {
    /// Upper bound for a single filename lookup (cache + store)
    #[serde(default = "default_resolver_timeout")]
    pub timeout_ms: u64,
}

/// Response transform configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransformConfig {
    /// Largest XML body buffered for metadata scrubbing
    #[serde(default = "default_max_scrub_bytes")]
    pub max_scrub_bytes: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, text)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load the TOML file if it exists, then apply environment overrides.
    ///
    /// A missing file is only tolerated when `required` is false, so an
    /// explicit `CONFIG_PATH` that points nowhere still fails startup.
    pub fn load_with_env<P: AsRef<Path>>(path: P, required: bool) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() || required {
            Self::load(path)?
        } else {
            Config::default()
        };
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override file values with the deployment's environment variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = get("MINIO_ENDPOINT") {
            self.backend.endpoint = endpoint;
        }
        if let Some(bucket) = get("MINIO_BUCKET") {
            self.backend.bucket = bucket;
        }
        if let Some(addr) = get("LISTEN_ADDR") {
            self.server.listen_addr = normalize_listen_addr(&addr);
        }
        if let Some(addr) = get("VALKEY_ADDR") {
            self.cache.address = addr;
        }
        if let Some(url) = get("POSTGRES_CONN") {
            self.database.url = url;
        }
    }

    /// Reject configurations the proxy cannot serve traffic with
    pub fn validate(&self) -> Result<()> {
        if self.backend.endpoint.trim().is_empty() {
            bail!("backend endpoint is not set (MINIO_ENDPOINT)");
        }
        let endpoint = url::Url::parse(&self.backend.endpoint)
            .with_context(|| format!("invalid backend endpoint: {}", self.backend.endpoint))?;
        if endpoint.host_str().is_none() {
            bail!("backend endpoint has no host: {}", self.backend.endpoint);
        }
        if self.backend.bucket.trim().is_empty() {
            bail!("backend bucket is not set (MINIO_BUCKET)");
        }
        if self.backend.bucket.contains('/') {
            bail!("backend bucket must not contain '/': {}", self.backend.bucket);
        }
        if self.database.url.trim().is_empty() {
            bail!("database connection string is not set (POSTGRES_CONN)");
        }
        Ok(())
    }

    /// Redis connection URL derived from the cache address
    pub fn cache_url(&self) -> String {
        let address = self.cache.address.trim();
        if address.starts_with("redis://") || address.starts_with("rediss://") {
            address.to_string()
        } else {
            format!("redis://{}", address)
        }
    }

    pub fn audio_name_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.audio_name_ttl_seconds)
    }

    pub fn resolver_timeout(&self) -> Duration {
        Duration::from_millis(self.resolver.timeout_ms)
    }
}

/// Accept Go-style `:5000` addresses
fn normalize_listen_addr(addr: &str) -> String {
    let addr = addr.trim();
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_addr: default_api_addr(),
            api_enabled: true,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            address: default_cache_address(),
            repopulate: true,
            audio_name_ttl_seconds: default_audio_name_ttl(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self { timeout_ms: default_resolver_timeout() }
    }
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self { max_scrub_bytes: default_max_scrub_bytes() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_listen_addr() -> String { "0.0.0.0:5000".to_string() }
fn default_api_addr() -> String { "0.0.0.0:14000".to_string() }
fn default_true() -> bool { true }
fn default_cache_address() -> String { "127.0.0.1:6379".to_string() }
fn default_audio_name_ttl() -> u64 { 600 } // 10 minutes
fn default_max_connections() -> u32 { 10 }
fn default_connect_timeout() -> u64 { 5 }
fn default_resolver_timeout() -> u64 { 2000 }
fn default_max_scrub_bytes() -> usize { 1024 * 1024 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
