use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Counters for guarded operations across every workflow in the process
#[derive(Debug, Default)]
pub struct OperationMetrics {
    pub started: AtomicU64,
    pub succeeded: AtomicU64,
    pub failed: AtomicU64,
    pub panicked: AtomicU64,
    pub rejected: AtomicU64,
}

impl OperationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panicked(&self) {
        self.panicked.fetch_add(1, Ordering::Relaxed);
        warn!("Guarded operation panicked");
    }

    /// An operation refused before it started (busy or illegal first transition)
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> OperationStats {
        OperationStats {
            started: self.started.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Operation metrics: started={}, succeeded={}, failed={}, panicked={}, rejected={}",
            stats.started, stats.succeeded, stats.failed, stats.panicked, stats.rejected
        );
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub rejected: u64,
}

/// Global metrics instance
static OPERATION_METRICS: std::sync::LazyLock<OperationMetrics> =
    std::sync::LazyLock::new(OperationMetrics::new);

pub fn operation_metrics() -> &'static OperationMetrics {
    &OPERATION_METRICS
}

/// Create the span every guarded operation runs in
pub fn create_operation_span(operation: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "guarded_operation",
        operation.name = operation,
        correlation.id = correlation_id,
    )
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
