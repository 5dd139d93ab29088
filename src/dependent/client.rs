//! Cluster API seam for dependent Deployments

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::{Error, FIELD_MANAGER};

/// Result of a create call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The Deployment was created
    Created,
    /// A Deployment with that name already exists
    AlreadyExists,
}

/// Trait abstracting dependent Deployment operations
///
/// This trait allows mocking the Kubernetes client in tests while using the
/// real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependentClient: Send + Sync {
    /// Create the Deployment in its own namespace
    ///
    /// An "already exists" response is reported as
    /// [`CreateOutcome::AlreadyExists`], not as an error.
    async fn create_dependent(&self, deployment: &Deployment) -> crate::Result<CreateOutcome>;

    /// Fetch a Deployment, `None` if it does not exist
    async fn get_dependent(&self, namespace: &str, name: &str)
        -> crate::Result<Option<Deployment>>;
}

/// Real Kubernetes client implementation
pub struct KubeDependentClient {
    client: Client,
}

impl KubeDependentClient {
    /// Create a new KubeDependentClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependentClient for KubeDependentClient {
    async fn create_dependent(&self, deployment: &Deployment) -> crate::Result<CreateOutcome> {
        let namespace = deployment.metadata.namespace.as_deref().ok_or_else(|| {
            Error::internal_with_context("create_dependent", "deployment has no namespace")
        })?;
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        match api.create(&params, deployment).await {
            Ok(created) => {
                debug!(
                    deployment = %created.metadata.name.unwrap_or_default(),
                    namespace = %namespace,
                    "Created deployment"
                );
                Ok(CreateOutcome::Created)
            }
            Err(kube::Error::Api(ae)) if is_already_exists(ae.code, &ae.reason) => {
                Ok(CreateOutcome::AlreadyExists)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_dependent(
        &self,
        namespace: &str,
        name: &str,
    ) -> crate::Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Whether an API error response means "object already exists"
fn is_already_exists(code: u16, reason: &str) -> bool {
    code == 409 && reason == "AlreadyExists"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_exists_detection() {
        assert!(is_already_exists(409, "AlreadyExists"));
        // 409 is also used for optimistic-concurrency conflicts
        assert!(!is_already_exists(409, "Conflict"));
        assert!(!is_already_exists(422, "Invalid"));
    }
}
