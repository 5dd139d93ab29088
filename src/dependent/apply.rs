//! Idempotent create of the dependent Deployment

use k8s_openapi::api::apps::v1::Deployment;
use tracing::{debug, info};

use super::client::{CreateOutcome, DependentClient};
use super::owned_field_diff;
use crate::Error;

/// What applying the desired Deployment did
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The Deployment was created
    Created,
    /// A matching Deployment already existed
    Unchanged,
}

/// Converge the cluster toward `desired`
///
/// Reads first and creates only when the Deployment is absent, so a reconcile
/// of an already-converged Kubexpose issues no write. An existing Deployment
/// is success when it matches on every owned field and [`Error::Conflict`]
/// when it does not. "Already exists" from the create (lost race with another
/// writer) falls back to the same comparison.
pub async fn apply_dependent(
    client: &dyn DependentClient,
    desired: &Deployment,
) -> crate::Result<ApplyOutcome> {
    let namespace = desired.metadata.namespace.as_deref().unwrap_or_default();
    let name = desired.metadata.name.as_deref().unwrap_or_default();

    if let Some(existing) = client.get_dependent(namespace, name).await? {
        return compare_existing(&existing, desired, namespace, name);
    }

    match client.create_dependent(desired).await? {
        CreateOutcome::Created => {
            info!(deployment = %name, namespace = %namespace, "Created ngrok deployment");
            Ok(ApplyOutcome::Created)
        }
        CreateOutcome::AlreadyExists => {
            let existing = client.get_dependent(namespace, name).await?.ok_or_else(|| {
                // Deleted between the create and the get; the next attempt recreates it
                Error::internal_with_context(
                    "apply",
                    format!("deployment {namespace}/{name} vanished after create conflict"),
                )
            })?;
            compare_existing(&existing, desired, namespace, name)
        }
    }
}

fn compare_existing(
    existing: &Deployment,
    desired: &Deployment,
    namespace: &str,
    name: &str,
) -> crate::Result<ApplyOutcome> {
    match owned_field_diff(existing, desired) {
        None => {
            debug!(deployment = %name, namespace = %namespace, "Deployment already up to date");
            Ok(ApplyOutcome::Unchanged)
        }
        Some(diff) => Err(Error::conflict("Deployment", namespace, name, diff)),
    }
}
