//! Dependent ngrok Deployment
//!
//! The Deployment is a pure function of the Kubexpose spec plus its identity
//! (namespace and uid for the owner reference). Maps are `BTreeMap`s so the
//! serialized form is byte-stable across recomputations.

mod apply;
mod client;

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::{Resource, ResourceExt};

use crate::crd::Kubexpose;
use crate::{Error, LABEL_MANAGED_BY, LABEL_MANAGED_BY_KUBEXPOSE};

pub use apply::{apply_dependent, ApplyOutcome};
pub use client::{CreateOutcome, DependentClient, KubeDependentClient};

#[cfg(test)]
pub use client::MockDependentClient;

/// Container image running the tunnel
pub const NGROK_IMAGE: &str = "wernight/ngrok";

/// Name of the tunnel container
pub const NGROK_CONTAINER: &str = "ngrok";

/// Entrypoint of the tunnel container
pub const NGROK_COMMAND: &str = "ngrok";

/// ngrok inspection UI port
pub const NGROK_INSPECT_PORT: i32 = 4040;

/// Selector label key
pub const LABEL_APP: &str = "app";

/// Compute the desired Deployment for a Kubexpose
///
/// Fails only when the Kubexpose lacks the identity needed for the owner
/// reference (name, namespace or uid).
pub fn desired_deployment(kx: &Kubexpose) -> crate::Result<Deployment> {
    let key = format!(
        "{}/{}",
        kx.namespace().unwrap_or_default(),
        kx.name_any()
    );
    let namespace = kx
        .namespace()
        .ok_or_else(|| Error::validation_for_field(&key, "metadata.namespace", "missing"))?;
    let mut owner = kx
        .controller_owner_ref(&())
        .ok_or_else(|| Error::validation_for_field(&key, "metadata.uid", "missing"))?;
    // Foreground deletion of the Kubexpose waits for the Deployment
    owner.block_owner_deletion = Some(true);

    let name = kx.spec.dependent_name();
    let selector = BTreeMap::from([(LABEL_APP.to_string(), name.clone())]);
    let mut labels = selector.clone();
    labels.insert(
        LABEL_MANAGED_BY.to_string(),
        LABEL_MANAGED_BY_KUBEXPOSE.to_string(),
    );

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(namespace),
            labels: Some(labels),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: NGROK_CONTAINER.to_string(),
                        image: Some(NGROK_IMAGE.to_string()),
                        command: Some(vec![NGROK_COMMAND.to_string()]),
                        args: Some(vec!["http".to_string(), kx.spec.target()]),
                        ports: Some(vec![ContainerPort {
                            container_port: NGROK_INSPECT_PORT,
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Compare the fields this controller owns
///
/// The API server fills in defaults (strategy, pull policy, ...) so a
/// whole-object comparison would always differ. Returns a description of the
/// first owned field that diverges, or `None` when `existing` matches.
pub fn owned_field_diff(existing: &Deployment, desired: &Deployment) -> Option<String> {
    let desired_owner = desired
        .metadata
        .owner_references
        .as_ref()
        .and_then(|refs| refs.first());
    if let Some(owner) = desired_owner {
        let owned = existing
            .metadata
            .owner_references
            .iter()
            .flatten()
            .any(|r| r.uid == owner.uid && r.controller == Some(true));
        if !owned {
            return Some(format!("not controlled by {} {}", owner.kind, owner.name));
        }
    }

    let (Some(existing_spec), Some(desired_spec)) = (&existing.spec, &desired.spec) else {
        return Some("missing deployment spec".to_string());
    };

    if existing_spec.replicas != desired_spec.replicas {
        return Some(format!(
            "replicas {:?} != {:?}",
            existing_spec.replicas, desired_spec.replicas
        ));
    }

    if existing_spec.selector.match_labels != desired_spec.selector.match_labels {
        return Some("selector differs".to_string());
    }

    let desired_pod_labels = desired_spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.as_ref());
    let existing_pod_labels = existing_spec
        .template
        .metadata
        .as_ref()
        .and_then(|m| m.labels.as_ref());
    if let Some(want) = desired_pod_labels {
        let have_all = want.iter().all(|(k, v)| {
            existing_pod_labels
                .and_then(|labels| labels.get(k))
                .is_some_and(|have| have == v)
        });
        if !have_all {
            return Some("pod template labels differ".to_string());
        }
    }

    let containers = |spec: &DeploymentSpec| {
        spec.template
            .spec
            .as_ref()
            .map(|pod| pod.containers.clone())
            .unwrap_or_default()
    };
    let existing_containers = containers(existing_spec);
    for want in containers(desired_spec) {
        let Some(have) = existing_containers.iter().find(|c| c.name == want.name) else {
            return Some(format!("container {} missing", want.name));
        };
        if have.image != want.image {
            return Some(format!("container {} image differs", want.name));
        }
        if have.command != want.command {
            return Some(format!("container {} command differs", want.name));
        }
        if have.args != want.args {
            return Some(format!("container {} args differ", want.name));
        }
        if container_ports(have) != container_ports(&want) {
            return Some(format!("container {} ports differ", want.name));
        }
    }

    None
}

fn container_ports(container: &Container) -> Vec<i32> {
    let mut ports: Vec<i32> = container
        .ports
        .iter()
        .flatten()
        .map(|p| p.container_port)
        .collect();
    ports.sort_unstable();
    ports
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::KubexposeSpec;

    fn kubexpose(service_name: &str, port: i32) -> Kubexpose {
        Kubexpose {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                uid: Some("0f4c9a6e-1111-2222-3333-444455556666".to_string()),
                ..Default::default()
            },
            spec: KubexposeSpec {
                service_name: service_name.to_string(),
                port,
            },
        }
    }

    fn container(deployment: &Deployment) -> &Container {
        &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers[0]
    }

    #[test]
    fn desired_deployment_shape() {
        let dep = desired_deployment(&kubexpose("web", 8080)).unwrap();

        assert_eq!(dep.metadata.name.as_deref(), Some("web-8080"));
        assert_eq!(dep.metadata.namespace.as_deref(), Some("default"));

        let spec = dep.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(1));
        assert_eq!(
            spec.selector.match_labels.as_ref().unwrap().get(LABEL_APP),
            Some(&"web-8080".to_string())
        );

        let c = container(&dep);
        assert_eq!(c.name, "ngrok");
        assert_eq!(c.image.as_deref(), Some("wernight/ngrok"));
        assert_eq!(c.command, Some(vec!["ngrok".to_string()]));
        assert_eq!(
            c.args,
            Some(vec!["http".to_string(), "web:8080".to_string()])
        );
        assert_eq!(c.ports.as_ref().unwrap()[0].container_port, 4040);
    }

    #[test]
    fn owner_reference_points_at_the_kubexpose() {
        let dep = desired_deployment(&kubexpose("web", 8080)).unwrap();
        let owners = dep.metadata.owner_references.unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].kind, "Kubexpose");
        assert_eq!(owners[0].api_version, "kubexpose.io/v1");
        assert_eq!(owners[0].name, "web");
        assert_eq!(owners[0].uid, "0f4c9a6e-1111-2222-3333-444455556666");
        assert_eq!(owners[0].controller, Some(true));
        assert_eq!(owners[0].block_owner_deletion, Some(true));
    }

    /// Story: recomputation is byte-identical, so repeated reconciles of an
    /// unchanged Kubexpose never look like drift
    #[test]
    fn desired_deployment_is_deterministic() {
        for (svc, port) in [("web", 8080), ("api", 1), ("db-proxy", 65535)] {
            let kx = kubexpose(svc, port);
            let a = serde_json::to_vec(&desired_deployment(&kx).unwrap()).unwrap();
            let b = serde_json::to_vec(&desired_deployment(&kx).unwrap()).unwrap();
            assert_eq!(a, b, "{svc}:{port}");
        }
    }

    #[test]
    fn missing_uid_is_a_validation_error() {
        let mut kx = kubexpose("web", 8080);
        kx.metadata.uid = None;
        let err = desired_deployment(&kx).unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(err.key(), Some("default/web"));
    }

    #[test]
    fn identical_deployment_has_no_diff() {
        let dep = desired_deployment(&kubexpose("web", 8080)).unwrap();
        assert_eq!(owned_field_diff(&dep, &dep), None);
    }

    #[test]
    fn server_defaults_are_ignored() {
        let desired = desired_deployment(&kubexpose("web", 8080)).unwrap();
        let mut existing = desired.clone();
        existing.metadata.resource_version = Some("12345".to_string());
        let spec = existing.spec.as_mut().unwrap();
        spec.revision_history_limit = Some(10);
        let pod = spec.template.spec.as_mut().unwrap();
        pod.restart_policy = Some("Always".to_string());
        pod.containers[0].image_pull_policy = Some("Always".to_string());
        pod.containers[0].ports.as_mut().unwrap()[0].protocol = Some("TCP".to_string());

        assert_eq!(owned_field_diff(&existing, &desired), None);
    }

    #[test]
    fn divergent_args_are_reported() {
        let desired = desired_deployment(&kubexpose("web", 8080)).unwrap();
        let mut existing = desired.clone();
        let pod = existing.spec.as_mut().unwrap().template.spec.as_mut().unwrap();
        pod.containers[0].args = Some(vec!["http".to_string(), "web:9090".to_string()]);
        let diff = owned_field_diff(&existing, &desired).expect("diff");
        assert_eq!(diff, "container ngrok args differ");
    }

    #[test]
    fn foreign_owner_is_reported() {
        let desired = desired_deployment(&kubexpose("web", 8080)).unwrap();
        let mut existing = desired.clone();
        existing.metadata.owner_references = None;
        let diff = owned_field_diff(&existing, &desired).expect("diff");
        assert!(diff.contains("not controlled by Kubexpose web"), "{diff}");
    }

    #[test]
    fn scaled_deployment_is_reported() {
        let desired = desired_deployment(&kubexpose("web", 8080)).unwrap();
        let mut existing = desired.clone();
        existing.spec.as_mut().unwrap().replicas = Some(3);
        let diff = owned_field_diff(&existing, &desired).expect("diff");
        assert!(diff.contains("replicas"), "{diff}");
    }
}
