//! Metrics registry for Kubexpose observability
//!
//! OpenTelemetry instruments for the event-to-convergence pipeline. They are
//! no-ops until a meter provider is installed by [`crate::telemetry`].

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};

/// Global meter for Kubexpose metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("kubexpose"));

// ============================================================================
// Event intake
// ============================================================================

/// Counter of store notifications received
///
/// Labels:
/// - `kind`: added, updated, deleted
pub static EVENTS_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kubexpose_events_total")
        .with_description("Total number of Kubexpose store notifications")
        .with_unit("{events}")
        .build()
});

/// Gauge of keys waiting in the work queue
pub static QUEUE_DEPTH: Lazy<Gauge<u64>> = Lazy::new(|| {
    METER
        .u64_gauge("kubexpose_queue_depth")
        .with_description("Number of keys waiting in the work queue")
        .with_unit("{keys}")
        .build()
});

// ============================================================================
// Reconciliation
// ============================================================================

/// Counter of processed work items
///
/// Labels:
/// - `result`: converged, absent, requeued, gave_up, dropped
pub static RECONCILE_TOTAL: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kubexpose_reconcile_total")
        .with_description("Total number of processed work items by outcome")
        .with_unit("{items}")
        .build()
});

/// Histogram of reconcile duration
///
/// Labels:
/// - `result`: converged, absent, requeued, gave_up, dropped
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("kubexpose_reconcile_duration_seconds")
        .with_description("Duration of a single reconcile attempt in seconds")
        .with_unit("s")
        .build()
});

/// Counter of errors handed to the error reporter
///
/// Labels:
/// - `category`: error category (kube, store, conflict, ...)
pub static REPORTED_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("kubexpose_reported_errors_total")
        .with_description("Total number of errors reported as terminal")
        .with_unit("{errors}")
        .build()
});

/// Outcome label values for [`RECONCILE_TOTAL`] and [`RECONCILE_DURATION`]
pub mod result {
    /// Dependent exists and matches
    pub const CONVERGED: &str = "converged";
    /// Kubexpose no longer exists
    pub const ABSENT: &str = "absent";
    /// Transient failure, requeued with backoff
    pub const REQUEUED: &str = "requeued";
    /// Retries exhausted
    pub const GAVE_UP: &str = "gave_up";
    /// Structural failure, not retried
    pub const DROPPED: &str = "dropped";
}
