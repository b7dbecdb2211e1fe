//! # Metrics
//!
//! Prometheus metrics for secret operations and the provider APIs behind them.
//!
//! ## Metrics Exposed
//!
//! - `berglas_operations_total` - Secret operations by operation and backend
//! - `berglas_operation_errors_total` - Failed secret operations by operation and error kind
//! - `berglas_operation_duration_seconds` - Duration of secret operations
//! - `berglas_api_requests_total` - Provider API requests by service, method and outcome
//! - `berglas_api_request_duration_seconds` - Duration of provider API requests
//! - `berglas_retries_total` - Retried attempts by operation
//! - `berglas_objects_deleted_total` - Object generations removed by the deletion engine

use anyhow::Result;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "berglas_operations_total",
            "Total number of secret operations by operation and backend",
        ),
        &["operation", "backend"],
    )
    .expect("Failed to create OPERATIONS_TOTAL metric - this should never happen")
});

static OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "berglas_operation_errors_total",
            "Total number of failed secret operations by operation and error kind",
        ),
        &["operation", "kind"],
    )
    .expect("Failed to create OPERATION_ERRORS_TOTAL metric - this should never happen")
});

static OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "berglas_operation_duration_seconds",
            "Duration of secret operations in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["operation"],
    )
    .expect("Failed to create OPERATION_DURATION metric - this should never happen")
});

static API_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "berglas_api_requests_total",
            "Total number of provider API requests by service, method and outcome",
        ),
        &["service", "method", "outcome"],
    )
    .expect("Failed to create API_REQUESTS_TOTAL metric - this should never happen")
});

static API_REQUEST_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "berglas_api_request_duration_seconds",
            "Duration of provider API requests in seconds",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["service"],
    )
    .expect("Failed to create API_REQUEST_DURATION metric - this should never happen")
});

static RETRIES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("berglas_retries_total", "Total number of retried attempts"),
        &["operation"],
    )
    .expect("Failed to create RETRIES_TOTAL metric - this should never happen")
});

static OBJECTS_DELETED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "berglas_objects_deleted_total",
        "Total number of object generations deleted",
    )
    .expect("Failed to create OBJECTS_DELETED_TOTAL metric - this should never happen")
});

/// Register all metrics with the crate registry
///
/// # Errors
/// Fails if a metric is already registered.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(API_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(API_REQUEST_DURATION.clone()))?;
    REGISTRY.register(Box::new(RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_DELETED_TOTAL.clone()))?;
    Ok(())
}

/// Render every registered metric in the Prometheus text format
#[must_use]
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_operation(operation: &str, backend: &str, duration: f64) {
    OPERATIONS_TOTAL
        .with_label_values(&[operation, backend])
        .inc();
    OPERATION_DURATION
        .with_label_values(&[operation])
        .observe(duration);
}

pub fn increment_operation_errors(operation: &str, kind: &str) {
    OPERATION_ERRORS_TOTAL
        .with_label_values(&[operation, kind])
        .inc();
}

pub fn record_api_request(service: &str, method: &str, outcome: &str, duration: f64) {
    API_REQUESTS_TOTAL
        .with_label_values(&[service, method, outcome])
        .inc();
    API_REQUEST_DURATION
        .with_label_values(&[service])
        .observe(duration);
}

pub fn increment_retries(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_objects_deleted(count: u64) {
    OBJECTS_DELETED_TOTAL.inc_by(count);
}
