//! Custom Resource Definitions for Kubexpose

mod kubexpose;

use kube::CustomResourceExt;

use crate::Error;

pub use kubexpose::{Kubexpose, KubexposeSpec};

/// Name of the Kubexpose CRD object
pub const CRD_NAME: &str = "kubexposes.kubexpose.io";

/// Render the Kubexpose CRD as a YAML manifest
pub fn crd_yaml() -> crate::Result<String> {
    serde_yaml::to_string(&Kubexpose::crd())
        .map_err(|e| Error::serialization_for_kind("CustomResourceDefinition", e.to_string()))
}
