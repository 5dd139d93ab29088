//! Per-key reconciliation and retry policy
//!
//! ```text
//! LOOKUP --malformed key-----------------------> report, forget   (dropped)
//! LOOKUP --not found---------------------------> forget           (absent)
//! LOOKUP --found--> VALIDATE --> DESIRED --> APPLY --ok--> forget (converged)
//! any step --transient error, attempts left----> add_rate_limited (requeued)
//! any step --transient error, none left--------> report, forget   (gave up)
//! any step --structural error------------------> report, forget   (dropped)
//! ```

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tracing::{debug, error, info, instrument, warn};

use super::reporter::{ErrorReporter, TracingErrorReporter};
use crate::dependent::{apply_dependent, desired_deployment, ApplyOutcome, DependentClient};
use crate::metrics;
use crate::queue::WorkQueue;
use crate::store::{split_key, ResourceStore};
use crate::DEFAULT_MAX_ATTEMPTS;

/// Shared dependencies of the reconcile workers
pub struct Context {
    /// Local mirror of Kubexpose objects (trait object for testability)
    pub store: Arc<dyn ResourceStore>,
    /// Client creating dependent Deployments (trait object for testability)
    pub dependents: Arc<dyn DependentClient>,
    /// Sink for terminal errors
    pub reporter: Arc<dyn ErrorReporter>,
    /// Queue of keys waiting for reconciliation
    pub queue: WorkQueue<String>,
    /// Processing attempts per key before giving up
    pub max_attempts: u32,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(
        store: Arc<dyn ResourceStore>,
        dependents: Arc<dyn DependentClient>,
        queue: WorkQueue<String>,
    ) -> ContextBuilder {
        ContextBuilder {
            store,
            dependents,
            queue,
            reporter: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Builder for [`Context`]
pub struct ContextBuilder {
    store: Arc<dyn ResourceStore>,
    dependents: Arc<dyn DependentClient>,
    queue: WorkQueue<String>,
    reporter: Option<Arc<dyn ErrorReporter>>,
    max_attempts: u32,
}

impl ContextBuilder {
    /// Override the error reporter (defaults to [`TracingErrorReporter`])
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Set the number of processing attempts per key
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            store: self.store,
            dependents: self.dependents,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(TracingErrorReporter)),
            queue: self.queue,
            max_attempts: self.max_attempts,
        }
    }
}

/// Successful end state of a reconcile
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The dependent Deployment exists and matches
    Converged(ApplyOutcome),
    /// The Kubexpose no longer exists; nothing was done
    Absent,
}

/// What happened to a key after one processing attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemOutcome {
    /// Reconciled successfully
    Converged,
    /// The Kubexpose was gone
    Absent,
    /// Failed transiently and was requeued with backoff
    Requeued,
    /// Failed on its last allowed attempt
    GaveUp,
    /// Failed structurally and was not retried
    Dropped,
}

impl ItemOutcome {
    /// Metric label value
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemOutcome::Converged => metrics::result::CONVERGED,
            ItemOutcome::Absent => metrics::result::ABSENT,
            ItemOutcome::Requeued => metrics::result::REQUEUED,
            ItemOutcome::GaveUp => metrics::result::GAVE_UP,
            ItemOutcome::Dropped => metrics::result::DROPPED,
        }
    }
}

/// Reconcile a single key against the store
///
/// Pure with respect to the queue: retry bookkeeping happens in
/// [`process_item`].
#[instrument(skip(ctx))]
pub async fn reconcile(key: &str, ctx: &Context) -> crate::Result<Outcome> {
    split_key(key)?;

    let Some(kx) = ctx.store.get_by_key(key)? else {
        info!("Kubexpose deleted; its deployment is garbage collected via the owner reference");
        return Ok(Outcome::Absent);
    };

    kx.spec.validate(key)?;
    let desired = desired_deployment(&kx)?;
    debug!(
        deployment = %kx.spec.dependent_name(),
        target = %kx.spec.target(),
        "Computed desired deployment"
    );

    let applied = apply_dependent(ctx.dependents.as_ref(), &desired).await?;
    Ok(Outcome::Converged(applied))
}

/// Reconcile `key` once and apply the retry policy to the result
///
/// The caller must hold `key` from [`WorkQueue::get`] and call `done` afterwards.
pub async fn process_item(ctx: &Context, key: &String) -> ItemOutcome {
    let start = Instant::now();
    let result = reconcile(key, ctx).await;
    let outcome = handle_result(ctx, key, result);
    record_outcome(outcome, start);
    outcome
}

/// Count a processed item and its duration under its outcome label
pub(crate) fn record_outcome(outcome: ItemOutcome, start: Instant) {
    let labels = [KeyValue::new("result", outcome.as_str())];
    metrics::RECONCILE_TOTAL.add(1, &labels);
    metrics::RECONCILE_DURATION.record(start.elapsed().as_secs_f64(), &labels);
}

fn handle_result(ctx: &Context, key: &String, result: crate::Result<Outcome>) -> ItemOutcome {
    match result {
        Ok(Outcome::Converged(applied)) => {
            debug!(key = %key, ?applied, "Reconciled");
            ctx.queue.forget(key);
            ItemOutcome::Converged
        }
        Ok(Outcome::Absent) => {
            ctx.queue.forget(key);
            ItemOutcome::Absent
        }
        Err(e) if !e.is_retryable() => {
            ctx.queue.forget(key);
            ctx.reporter.report(key, &e);
            ItemOutcome::Dropped
        }
        Err(e) => {
            let attempt = ctx.queue.num_requeues(key) + 1;
            if attempt < ctx.max_attempts {
                warn!(
                    key = %key,
                    attempt,
                    max_attempts = ctx.max_attempts,
                    error = %e,
                    "Reconcile failed, retrying"
                );
                ctx.queue.add_rate_limited(key.clone());
                ItemOutcome::Requeued
            } else {
                error!(
                    key = %key,
                    attempt,
                    error = %e,
                    "Reconcile failed, no more retries"
                );
                ctx.queue.forget(key);
                ctx.reporter.report(key, &e);
                ItemOutcome::GaveUp
            }
        }
    }
}
