//! API request handlers

use super::{AppState, PROBE_TIMEOUT};
use crate::metrics;
use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tracing::warn;

const REDACTED: &str = "[redacted]";

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: String,
    pub build_time: String,
    pub git_commit: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub cache: bool,
    pub store: bool,
}

/// Health check endpoint
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Version information
pub async fn get_version() -> Json<VersionResponse> {
    Json(VersionResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        build_time: option_env!("BUILD_TIME").unwrap_or("unknown").to_string(),
        git_commit: option_env!("GIT_COMMIT").unwrap_or("unknown").to_string(),
    })
}

/// Run a dependency probe, treating errors and timeouts as unhealthy
async fn probe<F, E>(name: &str, check: F) -> bool
where
    F: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(PROBE_TIMEOUT, check).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!("Readiness probe for {} failed: {}", name, e);
            false
        }
        Err(_) => {
            warn!("Readiness probe for {} timed out", name);
            false
        }
    }
}

/// Readiness check (for Kubernetes)
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (cache, store) = tokio::join!(
        probe("cache", state.resolver.cache().ping()),
        probe("store", state.resolver.store().ping()),
    );

    let ready = cache && store;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(ReadinessResponse { ready, cache, store }))
}

/// Strip userinfo from a connection address
fn redact_credentials(addr: &str) -> String {
    match addr.rsplit_once('@') {
        Some((prefix, host)) => match prefix.split_once("://") {
            Some((scheme, _)) => format!("{}://{}@{}", scheme, REDACTED, host),
            None => format!("{}@{}", REDACTED, host),
        },
        None => addr.to_string(),
    }
}

/// Get current configuration (sensitive data redacted)
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = &state.config;

    Json(serde_json::json!({
        "server": {
            "listen_addr": config.server.listen_addr,
            "api_addr": config.server.api_addr,
            "api_enabled": config.server.api_enabled
        },
        "backend": {
            "endpoint": config.backend.endpoint,
            "bucket": config.backend.bucket
        },
        "cache": {
            "address": redact_credentials(&config.cache.address),
            "repopulate": config.cache.repopulate,
            "audio_name_ttl_seconds": config.cache.audio_name_ttl_seconds
        },
        "database": {
            "url": REDACTED,
            "max_connections": config.database.max_connections,
            "connect_timeout_seconds": config.database.connect_timeout_seconds
        },
        "resolver": {
            "timeout_ms": config.resolver.timeout_ms
        },
        "transform": {
            "max_scrub_bytes": config.transform.max_scrub_bytes
        },
        "logging": {
            "level": config.logging.level,
            "format": config.logging.format
        }
    }))
}

/// Prometheus metrics in text exposition format
pub async fn get_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::encode(),
    )
}
