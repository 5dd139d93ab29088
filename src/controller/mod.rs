//! Reconcile loop for Kubexpose resources
//!
//! Workers pull keys from the [`WorkQueue`](crate::queue::WorkQueue), look the
//! Kubexpose up in the store, compute the desired ngrok Deployment and create
//! it. Failures are retried with per-key backoff up to a bounded number of
//! attempts; terminal failures go to the [`ErrorReporter`].

mod reconciler;
mod reporter;
mod worker;

pub use reconciler::{process_item, reconcile, Context, ContextBuilder, ItemOutcome, Outcome};
pub use reporter::{ErrorReporter, TracingErrorReporter};
pub use worker::{process_next_item, run_workers};

#[cfg(test)]
pub use reporter::MockErrorReporter;
