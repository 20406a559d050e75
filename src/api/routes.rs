//! API route definitions

use super::handlers;
use super::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;

/// Health check routes
pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/version", get(handlers::get_version))
        .route("/api/ready", get(handlers::readiness_check))
}

/// Configuration routes
pub fn config_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/config", get(handlers::get_config))
}

/// Prometheus scrape endpoint
pub fn metrics_routes() -> Router<Arc<AppState>> {
    Router::new().route("/metrics", get(handlers::get_metrics))
}
