//! Storage operation metrics.
//!
//! Enable the `metrics` feature to record them; otherwise every function here
//! compiles to nothing.
//!
//! - `qcache_storage_operations_total{storage,operation,result}`
//! - `qcache_storage_operation_duration_seconds{storage,operation}`

use std::time::Duration;

#[cfg(feature = "metrics")]
use std::time::Instant;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;
use qcache_core::CacheResult;

/// Timer for one operation; zero-sized when metrics are disabled.
pub struct Timer {
    #[cfg(feature = "metrics")]
    start: Instant,
}

impl Timer {
    /// Starts the timer.
    #[inline]
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "metrics")]
            start: Instant::now(),
        }
    }

    /// Time since [`Timer::new`], or zero when metrics are disabled.
    #[inline]
    pub fn elapsed(&self) -> Duration {
        #[cfg(feature = "metrics")]
        {
            self.start.elapsed()
        }
        #[cfg(not(feature = "metrics"))]
        {
            Duration::ZERO
        }
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for the operations counter.
    pub static ref STORAGE_OPERATIONS_TOTAL: &'static str = {
        metrics::describe_counter!(
            "qcache_storage_operations_total",
            "Total number of completed storage operations by outcome."
        );
        "qcache_storage_operations_total"
    };

    /// Metric name for the operation duration histogram.
    pub static ref STORAGE_OPERATION_DURATION: &'static str = {
        metrics::describe_histogram!(
            "qcache_storage_operation_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of storage operations on the pool, in seconds."
        );
        "qcache_storage_operation_duration_seconds"
    };
}

/// Records one completed operation.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_operation(storage: &str, operation: &'static str, result: CacheResult, duration: Duration) {
    metrics::counter!(
        *STORAGE_OPERATIONS_TOTAL,
        "storage" => storage.to_string(),
        "operation" => operation,
        "result" => result.as_str()
    )
    .increment(1);
    metrics::histogram!(
        *STORAGE_OPERATION_DURATION,
        "storage" => storage.to_string(),
        "operation" => operation
    )
    .record(duration.as_secs_f64());
}

/// Records one completed operation (no-op when `metrics` feature disabled).
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_operation(
    _storage: &str,
    _operation: &'static str,
    _result: CacheResult,
    _duration: Duration,
) {
}
