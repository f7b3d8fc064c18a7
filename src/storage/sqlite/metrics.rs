//! Shared metrics recording for storage operations.

use std::time::Instant;

/// Records operation metrics for storage operations.
///
/// Two metrics per operation:
/// 1. `storage_operations_total` - counter by operation and status
/// 2. `storage_operation_duration_ms` - latency histogram
///
/// # Examples
///
/// ```ignore
/// use std::time::Instant;
/// use statehouse::storage::sqlite::record_operation_metrics;
///
/// let start = Instant::now();
/// // ... perform operation ...
/// let status = if result.is_ok() { "success" } else { "error" };
/// record_operation_metrics("save", start, status);
/// ```
pub fn record_operation_metrics(operation: &'static str, start: Instant, status: &'static str) {
    metrics::counter!(
        "storage_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
    metrics::histogram!(
        "storage_operation_duration_ms",
        "operation" => operation,
        "status" => status
    )
    .record(start.elapsed().as_secs_f64() * 1000.0);
}
