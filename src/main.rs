//! cdn-proxy - media CDN proxy
//!
//! Built on Cloudflare Pingora; serves avatars, banners and songs out of an
//! S3-compatible bucket.

use anyhow::Result;
use cdn_proxy::config::{Config, LoggingConfig};
use cdn_proxy::{metrics, proxy};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

fn main() -> Result<()> {
    // An explicit CONFIG_PATH must exist; the default file is optional
    let (config_path, required) = match std::env::var("CONFIG_PATH") {
        Ok(path) => (path, true),
        Err(_) => (DEFAULT_CONFIG_PATH.to_string(), false),
    };

    let config = Config::load_with_env(&config_path, required)?;

    init_logging(&config.logging);

    info!("Starting cdn-proxy v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded configuration from {}", config_path);

    config.validate()?;

    // Initialize metrics
    metrics::init();

    // Serves until the process is told to stop
    proxy::run(config)
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(filter);

    if logging.format.eq_ignore_ascii_case("json") {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}
