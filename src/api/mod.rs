//! Admin API for health checks and monitoring

mod handlers;
mod routes;

use crate::config::Config;
use crate::resolver::FilenameResolver;
use async_trait::async_trait;
use axum::Router;
use pingora_core::server::ShutdownWatch;
use pingora_core::services::background::{background_service, BackgroundService, GenBackgroundService};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// How long a readiness probe waits on each dependency
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared application state
pub struct AppState {
    pub config: Arc<Config>,
    pub resolver: Arc<FilenameResolver>,
}

/// Admin HTTP server run alongside the proxy
pub struct AdminApi {
    addr: String,
    state: Arc<AppState>,
}

#[async_trait]
impl BackgroundService for AdminApi {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let listener = match tokio::net::TcpListener::bind(&self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind admin API on {}: {}", self.addr, e);
                return;
            }
        };

        info!("Admin API listening on {}", self.addr);

        let app = create_router(self.state.clone());
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await;

        if let Err(e) = result {
            error!("Admin API error: {}", e);
        }
    }
}

/// Wrap the admin API as a server background service
pub fn service(config: Arc<Config>, resolver: Arc<FilenameResolver>) -> GenBackgroundService<AdminApi> {
    let addr = config.server.api_addr.clone();
    let state = Arc::new(AppState { config, resolver });
    background_service("admin api", AdminApi { addr, state })
}

/// Create the API router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::health_routes())
        .merge(routes::config_routes())
        .merge(routes::metrics_routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::testing::{MemoryProfileCache, MemoryProfileStore};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state(cache: Arc<MemoryProfileCache>, store: Arc<MemoryProfileStore>) -> Arc<AppState> {
        let mut config = Config::default();
        config.backend.endpoint = "http://minio:9000".to_string();
        config.backend.bucket = "media".to_string();
        config.database.url = "postgres://app:secret@db/app".to_string();

        Arc::new(AppState {
            config: Arc::new(config),
            resolver: Arc::new(FilenameResolver::new(
                cache,
                store,
                true,
                Duration::from_secs(600),
            )),
        })
    }

    async fn get(state: Arc<AppState>, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = create_router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let state = test_state(Arc::new(MemoryProfileCache::new()), Arc::new(MemoryProfileStore::new()));
        let (status, body) = get(state, "/api/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_when_dependencies_respond() {
        let state = test_state(Arc::new(MemoryProfileCache::new()), Arc::new(MemoryProfileStore::new()));
        let (status, body) = get(state, "/api/ready").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ready"], true);
    }

    #[tokio::test]
    async fn test_not_ready_when_store_is_down() {
        let store = Arc::new(MemoryProfileStore::new());
        store.fail_queries(true);
        let state = test_state(Arc::new(MemoryProfileCache::new()), store);

        let (status, body) = get(state, "/api/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["ready"], false);
        assert_eq!(body["cache"], true);
        assert_eq!(body["store"], false);
    }

    #[tokio::test]
    async fn test_not_ready_when_cache_is_down() {
        let cache = Arc::new(MemoryProfileCache::new());
        cache.fail_reads(true);
        let state = test_state(cache, Arc::new(MemoryProfileStore::new()));

        let (status, body) = get(state, "/api/ready").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["cache"], false);
    }

    #[tokio::test]
    async fn test_config_redacts_database_url() {
        let state = test_state(Arc::new(MemoryProfileCache::new()), Arc::new(MemoryProfileStore::new()));
        let (status, body) = get(state, "/api/config").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backend"]["bucket"], "media");
        assert_eq!(body["database"]["url"], "[redacted]");
        assert!(!body.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        crate::metrics::init();
        let state = test_state(Arc::new(MemoryProfileCache::new()), Arc::new(MemoryProfileStore::new()));
        let response = create_router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("requests_total"));
    }
}
