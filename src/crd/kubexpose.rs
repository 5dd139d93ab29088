//! Kubexpose Custom Resource Definition
//!
//! A Kubexpose asks the controller to tunnel an in-cluster service through ngrok.
//!
//! ```yaml
//! apiVersion: kubexpose.io/v1
//! kind: Kubexpose
//! metadata:
//!   name: web
//!   namespace: default
//! spec:
//!   serviceName: web
//!   port: 8080
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Maximum length of a DNS-1123 label
const MAX_LABEL_LEN: usize = 63;

/// Specification for a Kubexpose resource
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "kubexpose.io",
    version = "v1",
    kind = "Kubexpose",
    plural = "kubexposes",
    shortname = "kxp",
    namespaced,
    printcolumn = r#"{"name":"Service","type":"string","jsonPath":".spec.serviceName"}"#,
    printcolumn = r#"{"name":"Port","type":"integer","jsonPath":".spec.port"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KubexposeSpec {
    /// Name of the Service to expose, in the Kubexpose's namespace
    pub service_name: String,

    /// Service port the tunnel forwards to
    pub port: i32,
}

impl KubexposeSpec {
    /// Name of the dependent Deployment: `<serviceName>-<port>`
    pub fn dependent_name(&self) -> String {
        format!("{}-{}", self.service_name, self.port)
    }

    /// Tunnel target in `host:port` form
    pub fn target(&self) -> String {
        format!("{}:{}", self.service_name, self.port)
    }

    /// Validate the spec
    ///
    /// `key` is only used to give the error context.
    pub fn validate(&self, key: &str) -> crate::Result<()> {
        if !is_dns_label(&self.service_name) {
            return Err(crate::Error::validation_for_field(
                key,
                "spec.serviceName",
                format!(
                    "'{}' is not a valid DNS-1123 label",
                    self.service_name
                ),
            ));
        }

        if !(1..=65535).contains(&self.port) {
            return Err(crate::Error::validation_for_field(
                key,
                "spec.port",
                format!("port {} is outside 1-65535", self.port),
            ));
        }

        let name = self.dependent_name();
        if name.len() > MAX_LABEL_LEN {
            return Err(crate::Error::validation_for_field(
                key,
                "spec.serviceName",
                format!(
                    "derived deployment name '{}' exceeds {} characters",
                    name, MAX_LABEL_LEN
                ),
            ));
        }

        Ok(())
    }
}

/// Check a string against the DNS-1123 label rules
fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_LABEL_LEN {
        return false;
    }
    let edge_ok = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    edge_ok(bytes[0])
        && edge_ok(bytes[bytes.len() - 1])
        && bytes
            .iter()
            .all(|&b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    fn spec(service_name: &str, port: i32) -> KubexposeSpec {
        KubexposeSpec {
            service_name: service_name.to_string(),
            port,
        }
    }

    #[test]
    fn kubexpose_from_yaml() {
        let yaml = r#"
apiVersion: kubexpose.io/v1
kind: Kubexpose
metadata:
  name: web
  namespace: default
spec:
  serviceName: web
  port: 8080
"#;
        let kx: Kubexpose = serde_yaml::from_str(yaml).expect("parse");
        assert_eq!(kx.spec.service_name, "web");
        assert_eq!(kx.spec.port, 8080);
        assert_eq!(kx.metadata.namespace.as_deref(), Some("default"));
    }

    #[test]
    fn missing_port_is_rejected_by_schema() {
        let yaml = r#"
apiVersion: kubexpose.io/v1
kind: Kubexpose
metadata:
  name: web
spec:
  serviceName: web
"#;
        assert!(serde_yaml::from_str::<Kubexpose>(yaml).is_err());
    }

    #[test]
    fn derived_names() {
        let s = spec("web", 8080);
        assert_eq!(s.dependent_name(), "web-8080");
        assert_eq!(s.target(), "web:8080");
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec("web", 8080).validate("default/web").is_ok());
        assert!(spec("api-v2", 1).validate("default/api").is_ok());
        assert!(spec("x", 65535).validate("default/x").is_ok());
    }

    #[test]
    fn invalid_service_names_fail() {
        for bad in ["", "Web", "-web", "web-", "web_svc", "web.svc"] {
            let err = spec(bad, 80).validate("default/bad").unwrap_err();
            match err {
                crate::Error::Validation { field, .. } => {
                    assert_eq!(field.as_deref(), Some("spec.serviceName"), "{bad}")
                }
                other => panic!("expected validation error for {bad:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn out_of_range_ports_fail() {
        for port in [0, -1, 65536] {
            let err = spec("web", port).validate("default/web").unwrap_err();
            assert!(err.to_string().contains("outside 1-65535"));
        }
    }

    #[test]
    fn overlong_derived_name_fails() {
        let name = "a".repeat(60);
        let err = spec(&name, 8080).validate("default/long").unwrap_err();
        assert!(err.to_string().contains("exceeds 63"));
    }

    #[test]
    fn crd_metadata() {
        let crd = Kubexpose::crd();
        assert_eq!(crd.metadata.name.as_deref(), Some("kubexposes.kubexpose.io"));
        assert_eq!(crd.spec.scope, "Namespaced");
        assert_eq!(crd.spec.names.kind, "Kubexpose");
    }
}
