//! Proxy module - rewrites media requests onto the object store

mod media_proxy;
pub mod router;
pub mod transform;

pub use media_proxy::{Backend, MediaProxyCtx, MediaProxyHandler};
pub use router::{ObjectKey, ResourceClass, Rewrite, Router};
pub use transform::ResponseTransformer;

use crate::api;
use crate::config::Config;
use crate::resolver::{FilenameResolver, PgProfileStore, RedisProfileCache};
use anyhow::{Context, Result};
use pingora_core::server::Server;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Check the durable store is reachable before serving.
///
/// Runs on a throwaway runtime since the server owns its own.
fn verify_store(config: &Config) -> Result<()> {
    let timeout = Duration::from_secs(config.database.connect_timeout_seconds);
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        tokio::time::timeout(timeout, PgProfileStore::verify_connection(&config.database.url))
            .await
            .context("timed out connecting to the profile database")?
            .context("failed to connect to the profile database")
    })?;

    info!("Profile database is reachable");
    Ok(())
}

/// Build all services and serve until shutdown
pub fn run(config: Config) -> Result<()> {
    verify_store(&config)?;

    let backend = Backend::from_endpoint(&config.backend.endpoint)?;
    let cache = Arc::new(
        RedisProfileCache::new(&config.cache_url()).context("invalid cache address")?,
    );
    let store = Arc::new(
        PgProfileStore::connect_lazy(
            &config.database.url,
            config.database.max_connections,
            Duration::from_secs(config.database.connect_timeout_seconds),
        )
        .context("invalid database url")?,
    );
    let resolver = Arc::new(FilenameResolver::new(
        cache,
        store,
        config.cache.repopulate,
        config.audio_name_ttl(),
    ));

    let transformer = ResponseTransformer::new(
        config.backend.bucket.clone(),
        resolver.clone(),
        config.resolver_timeout(),
        config.transform.max_scrub_bytes,
    );
    let handler = MediaProxyHandler::new(
        backend,
        Router::new(config.backend.bucket.clone()),
        transformer,
    );

    // Create Pingora server
    let mut server = Server::new(None)?;
    server.bootstrap();

    let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, handler);
    proxy_service.add_tcp(&config.server.listen_addr);
    server.add_service(proxy_service);

    info!(
        "Proxying {} to {} bucket {}",
        config.server.listen_addr, config.backend.endpoint, config.backend.bucket
    );

    if config.server.api_enabled {
        server.add_service(api::service(Arc::new(config.clone()), resolver));
        info!("Admin API enabled on {}", config.server.api_addr);
    }

    server.run_forever();
}
