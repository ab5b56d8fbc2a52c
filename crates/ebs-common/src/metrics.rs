//! OpenTelemetry instruments for reconciler observability
//!
//! Instruments are no-ops until a meter provider is installed by
//! [`crate::telemetry::init_telemetry`], so library code can record
//! unconditionally.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for reconciler metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("ebs"));

// ============================================================================
// Volume Operation Metrics
// ============================================================================

/// Counter of attach/detach operations
///
/// Labels:
/// - `operation`: attach, detach
/// - `result`: success, noop, error
/// - `error_type`: error kind when `result` is error
pub static VOLUME_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ebs_volume_operations_total")
        .with_description("Total number of volume attach/detach operations by outcome")
        .with_unit("{operations}")
        .build()
});

/// Histogram of a full reconciliation pass
pub static RECONCILE_PASS_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("ebs_reconcile_pass_duration_seconds")
        .with_description("Duration of a reconciliation pass in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Node Liveness Metrics
// ============================================================================

/// Counter of nodes removed because their instance no longer exists
pub static NODES_REMOVED: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("ebs_nodes_removed_total")
        .with_description("Total number of nodes removed after their instance disappeared")
        .with_unit("{nodes}")
        .build()
});

/// Outcome label for [`VOLUME_OPERATIONS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationResult {
    /// A provider mutation was issued and recorded
    Success,
    /// The provider already held the desired state
    Noop,
    /// The operation failed for this pass
    Error(&'static str),
}

/// Record one attach/detach outcome
pub fn record_volume_operation(operation: &'static str, result: OperationResult) {
    let mut attrs = vec![KeyValue::new("operation", operation)];
    match result {
        OperationResult::Success => attrs.push(KeyValue::new("result", "success")),
        OperationResult::Noop => attrs.push(KeyValue::new("result", "noop")),
        OperationResult::Error(kind) => {
            attrs.push(KeyValue::new("result", "error"));
            attrs.push(KeyValue::new("error_type", kind));
        }
    }
    VOLUME_OPERATIONS.add(1, &attrs);
}
