//! Metrics module for Prometheus monitoring

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

static REGISTRY: OnceLock<Metrics> = OnceLock::new();

/// Application metrics
pub struct Metrics {
    pub registry: Registry,

    // Request metrics
    pub requests_total: IntCounter,
    pub requests_by_status: IntCounterVec,
    pub request_duration_seconds: Histogram,

    // Backend metrics
    pub upstream_errors_total: IntCounter,

    // Response transform metrics
    pub filename_lookups_total: IntCounterVec,
    pub scrubbed_responses_total: IntCounter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        // Request metrics
        let requests_total = IntCounter::new("requests_total", "Total number of requests")
            .expect("metric can be created");
        registry.register(Box::new(requests_total.clone())).unwrap();

        let requests_by_status = IntCounterVec::new(
            Opts::new("requests_by_status_total", "Requests by HTTP status code"),
            &["status"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(requests_by_status.clone()))
            .unwrap();

        let request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "Request duration in seconds")
                .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .expect("metric can be created");
        registry
            .register(Box::new(request_duration_seconds.clone()))
            .unwrap();

        // Backend metrics
        let upstream_errors_total =
            IntCounter::new("upstream_errors_total", "Requests that failed while proxying")
                .expect("metric can be created");
        registry
            .register(Box::new(upstream_errors_total.clone()))
            .unwrap();

        // Response transform metrics
        let filename_lookups_total = IntCounterVec::new(
            Opts::new("filename_lookups_total", "Audio filename lookups by outcome"),
            &["source"],
        )
        .expect("metric can be created");
        registry
            .register(Box::new(filename_lookups_total.clone()))
            .unwrap();

        let scrubbed_responses_total = IntCounter::new(
            "scrubbed_responses_total",
            "XML responses stripped of bucket metadata",
        )
        .expect("metric can be created");
        registry
            .register(Box::new(scrubbed_responses_total.clone()))
            .unwrap();

        Self {
            registry,
            requests_total,
            requests_by_status,
            request_duration_seconds,
            upstream_errors_total,
            filename_lookups_total,
            scrubbed_responses_total,
        }
    }
}

/// Initialize metrics (call once at startup)
pub fn init() {
    REGISTRY.get_or_init(Metrics::new);
}

/// Get the global metrics instance
pub fn get() -> &'static Metrics {
    REGISTRY.get_or_init(Metrics::new)
}

/// Encode metrics in Prometheus text format
pub fn encode() -> String {
    let metrics = get();
    let encoder = TextEncoder::new();
    let metric_families = metrics.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Record a completed request
pub fn record_request(status: u16, duration_seconds: f64) {
    let m = get();
    m.requests_total.inc();
    m.requests_by_status
        .with_label_values(&[&status.to_string()])
        .inc();
    m.request_duration_seconds.observe(duration_seconds);
}

/// Record a request that failed against the backend
pub fn record_upstream_error() {
    get().upstream_errors_total.inc();
}

/// Record a filename lookup outcome (`profile_cache`, `name_cache`, `store`, `not_found`, `error`)
pub fn record_filename_lookup(source: &str) {
    get().filename_lookups_total.with_label_values(&[source]).inc();
}

/// Record a scrubbed XML response
pub fn record_scrubbed_response() {
    get().scrubbed_responses_total.inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init();
        let names: Vec<String> = get()
            .registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for name in ["requests_total", "request_duration_seconds", "upstream_errors_total"] {
            assert!(names.iter().any(|n| n == name), "{name} is not registered");
        }
    }

    #[test]
    fn test_record_request() {
        init();
        record_request(200, 0.1);
        let m = get();
        assert!(m.requests_total.get() >= 1);
        assert!(m.requests_by_status.with_label_values(&["200"]).get() >= 1);
    }

    #[test]
    fn test_record_filename_lookup() {
        record_filename_lookup("store");
        assert!(get().filename_lookups_total.with_label_values(&["store"]).get() >= 1);
    }

    #[test]
    fn test_encode_metrics() {
        init();
        record_scrubbed_response();
        let output = encode();
        assert!(output.contains("requests_total"));
        assert!(output.contains("scrubbed_responses_total"));
    }
}
