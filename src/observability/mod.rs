//! # Observability
//!
//! - `logging`: tracing subscriber setup (text or JSON)
//! - `metrics`: Prometheus metrics collection
//! - [`OperationTracker`]: span fields plus metrics for one secret operation

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::{gather_metrics, register_metrics};

use crate::error::Error;
use std::time::Instant;
use tracing::Span;

/// Helper struct for tracking operation state
///
/// The span must declare the `operation.success`, `operation.duration_ms`
/// and `error.kind` fields for them to be recorded.
#[derive(Debug)]
pub struct OperationTracker {
    operation: &'static str,
    backend: &'static str,
    start: Instant,
    span: Span,
}

impl OperationTracker {
    pub fn new(operation: &'static str, backend: &'static str, span: Span) -> Self {
        Self {
            operation,
            backend,
            start: Instant::now(),
            span,
        }
    }

    /// Record success metrics
    pub fn record_success(&self) {
        let duration = self.start.elapsed();
        self.span.record("operation.success", true);
        self.span
            .record("operation.duration_ms", duration.as_millis() as u64);
        metrics::record_operation(self.operation, self.backend, duration.as_secs_f64());
    }

    /// Record error metrics
    pub fn record_error(&self, error: &Error) {
        let kind = error.kind().as_str();
        self.span.record("operation.success", false);
        self.span.record("error.kind", kind);
        self.span
            .record("operation.duration_ms", self.start.elapsed().as_millis() as u64);
        metrics::increment_operation_errors(self.operation, kind);
    }

    /// Record the outcome of `result` and hand it back
    pub fn finish<T>(&self, result: crate::Result<T>) -> crate::Result<T> {
        match &result {
            Ok(_) => self.record_success(),
            Err(e) => self.record_error(e),
        }
        result
    }
}
