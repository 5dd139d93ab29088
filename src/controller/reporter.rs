//! Process-wide sink for errors the controller gives up on

use opentelemetry::KeyValue;
use tracing::error;

#[cfg(test)]
use mockall::automock;

use crate::metrics;
use crate::Error;

/// Receives terminal errors: exhausted retries, malformed keys, invalid
/// specs, conflicts and caught panics
///
/// There is no synchronous caller to hand these to, so reporting is the only
/// place they surface.
#[cfg_attr(test, automock)]
pub trait ErrorReporter: Send + Sync {
    /// Report that processing `key` failed terminally with `error`
    fn report(&self, key: &str, error: &Error);
}

/// Logs terminal errors and counts them by category
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, key: &str, error: &Error) {
        let category = error.category();
        error!(key = %key, category, error = %error, "Dropping key after terminal error");
        metrics::REPORTED_ERRORS.add(1, &[KeyValue::new("category", category)]);
    }
}
