//! Validated, immutable descriptions of the resources a cluster is made of.
//!
//! Every spec is checked when it is constructed, so an invalid description is
//! rejected before anything is submitted to the platform.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

/// Longest name the platform accepts for a label value or a DNS-1123 label.
const MAX_LABEL_LEN: usize = 63;
/// Longest name the platform accepts for a named port (IANA service name).
const MAX_PORT_NAME_LEN: usize = 15;

/// Reasons a spec is rejected before reaching the platform.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpecError {
    #[error("{field} `{value}` is not a valid resource name (lowercase alphanumerics and '-', at most 63 chars)")]
    InvalidName { field: &'static str, value: String },

    #[error("port name `{name}` is invalid (lowercase alphanumerics and '-', at most 15 chars, at least one letter)")]
    InvalidPortName { name: String },

    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("{resource} declares no ports")]
    NoPorts { resource: String },

    #[error("{resource} declares port {port} more than once")]
    DuplicatePort { resource: String, port: u16 },

    #[error("port 0 is not a valid port for {resource}")]
    ZeroPort { resource: String },

    #[error("service {service} targets port {target_port} which pod {pod} does not expose")]
    UnknownTargetPort {
        service: String,
        pod: String,
        target_port: u16,
    },

    #[error("service {service} lives in namespace {service_namespace} but its pod lives in {pod_namespace}")]
    NamespaceMismatch {
        service: String,
        service_namespace: String,
        pod_namespace: String,
    },

    #[error("a cluster needs at least one node")]
    NoNodes,

    #[error("at least one external IP is required")]
    MissingExternalIps,

    #[error("either an SSH password or SSH authorized keys are required")]
    MissingCredentials,

    #[error("port block for {nodes} nodes of {ports_per_node} ports starting at {base} overflows the port range")]
    PortRangeOverflow {
        base: u16,
        nodes: usize,
        ports_per_node: usize,
    },
}

pub(crate) fn validate_label(field: &'static str, value: &str) -> Result<(), SpecError> {
    let valid = !value.is_empty()
        && value.len() <= MAX_LABEL_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !value.starts_with('-')
        && !value.ends_with('-');

    if valid {
        Ok(())
    } else {
        Err(SpecError::InvalidName {
            field,
            value: value.to_string(),
        })
    }
}

fn validate_port_name(name: &str) -> Result<(), SpecError> {
    let valid = !name.is_empty()
        && name.len() <= MAX_PORT_NAME_LEN
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && name.bytes().any(|b| b.is_ascii_lowercase())
        && !name.starts_with('-')
        && !name.ends_with('-')
        && !name.contains("--");

    if valid {
        Ok(())
    } else {
        Err(SpecError::InvalidPortName {
            name: name.to_string(),
        })
    }
}

/// A port exposed by the pod's container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodPortSpec {
    pub name: String,
    pub container_port: u16,
}

/// Where the value of an injected environment variable comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvSource {
    Literal(String),
    /// A key of a platform secret in the pod's namespace.
    SecretKey { secret: String, key: String },
}

/// An environment variable injected into the pod's container.
///
/// This is how credential material reaches the container image; the values are
/// passed through without interpretation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvBinding {
    pub name: String,
    pub source: EnvSource,
}

impl EnvBinding {
    pub fn literal(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: EnvSource::Literal(value.into()),
        }
    }

    pub fn from_secret(
        name: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source: EnvSource::SecretKey {
                secret: secret.into(),
                key: key.into(),
            },
        }
    }
}

/// Desired container workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSpec {
    namespace: String,
    name: String,
    container_name: String,
    image: String,
    ports: Vec<PodPortSpec>,
    env: Vec<EnvBinding>,
}

impl PodSpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        container_name: impl Into<String>,
        image: impl Into<String>,
        ports: Vec<PodPortSpec>,
        env: Vec<EnvBinding>,
    ) -> Result<Self, SpecError> {
        let spec = Self {
            namespace: namespace.into(),
            name: name.into(),
            container_name: container_name.into(),
            image: image.into(),
            ports,
            env,
        };

        validate_label("namespace", &spec.namespace)?;
        validate_label("pod name", &spec.name)?;
        validate_label("container name", &spec.container_name)?;
        if spec.image.trim().is_empty() {
            return Err(SpecError::EmptyField { field: "image" });
        }
        if spec.ports.is_empty() {
            return Err(SpecError::NoPorts {
                resource: format!("pod {}", spec.name),
            });
        }

        let mut seen = BTreeSet::new();
        for port in &spec.ports {
            validate_port_name(&port.name)?;
            if port.container_port == 0 {
                return Err(SpecError::ZeroPort {
                    resource: format!("pod {}", spec.name),
                });
            }
            if !seen.insert(port.container_port) {
                return Err(SpecError::DuplicatePort {
                    resource: format!("pod {}", spec.name),
                    port: port.container_port,
                });
            }
        }

        Ok(spec)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container_name(&self) -> &str {
        &self.container_name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn ports(&self) -> &[PodPortSpec] {
        &self.ports
    }

    pub fn env(&self) -> &[EnvBinding] {
        &self.env
    }

    /// Container port numbers in declaration order.
    pub fn container_ports(&self) -> Vec<u16> {
        self.ports.iter().map(|port| port.container_port).collect()
    }

    pub fn exposes(&self, port: u16) -> bool {
        self.ports.iter().any(|p| p.container_port == port)
    }
}

/// One port mapping of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortSpec {
    pub name: String,
    /// Externally exposed port
    pub port: u16,
    /// Container port on the backing pod
    pub target_port: u16,
    /// Node port to request; the platform assigns one when `None`
    pub node_port: Option<u16>,
}

/// Desired network exposure for a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    namespace: String,
    name: String,
    pod: Arc<PodSpec>,
    external_ips: Vec<String>,
    ports: Vec<ServicePortSpec>,
}

impl ServiceSpec {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        pod: Arc<PodSpec>,
        external_ips: Vec<String>,
        ports: Vec<ServicePortSpec>,
    ) -> Result<Self, SpecError> {
        let spec = Self {
            namespace: namespace.into(),
            name: name.into(),
            pod,
            external_ips,
            ports,
        };

        validate_label("service name", &spec.name)?;
        if spec.namespace != spec.pod.namespace() {
            return Err(SpecError::NamespaceMismatch {
                service: spec.name.clone(),
                service_namespace: spec.namespace.clone(),
                pod_namespace: spec.pod.namespace().to_string(),
            });
        }
        if spec.ports.is_empty() {
            return Err(SpecError::NoPorts {
                resource: format!("service {}", spec.name),
            });
        }

        let mut seen = BTreeSet::new();
        for port in &spec.ports {
            validate_port_name(&port.name)?;
            if port.port == 0 || port.node_port == Some(0) {
                return Err(SpecError::ZeroPort {
                    resource: format!("service {}", spec.name),
                });
            }
            if !seen.insert(port.port) {
                return Err(SpecError::DuplicatePort {
                    resource: format!("service {}", spec.name),
                    port: port.port,
                });
            }
            if !spec.pod.exposes(port.target_port) {
                return Err(SpecError::UnknownTargetPort {
                    service: spec.name.clone(),
                    pod: spec.pod.name().to_string(),
                    target_port: port.target_port,
                });
            }
        }

        Ok(spec)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pod(&self) -> &PodSpec {
        &self.pod
    }

    pub fn external_ips(&self) -> &[String] {
        &self.external_ips
    }

    pub fn ports(&self) -> &[ServicePortSpec] {
        &self.ports
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn ssh_port() -> PodPortSpec {
        PodPortSpec {
            name: "m-22-p".to_string(),
            container_port: 22,
        }
    }

    fn pod() -> Arc<PodSpec> {
        Arc::new(
            PodSpec::new(
                "t1",
                "massa-node-1-pod",
                "massa-node-1-container",
                "aoudiamoncef/ubuntu-sshd",
                vec![ssh_port()],
                vec![EnvBinding::literal("SSH_USERNAME", "simulator")],
            )
            .expect("valid pod"),
        )
    }

    fn service_port(target_port: u16) -> ServicePortSpec {
        ServicePortSpec {
            name: "m-22-p".to_string(),
            port: 20001,
            target_port,
            node_port: None,
        }
    }

    #[test]
    fn pod_without_ports_is_rejected() {
        let err = PodSpec::new("t1", "p", "c", "img", vec![], vec![]).unwrap_err();
        assert_eq!(
            err,
            SpecError::NoPorts {
                resource: "pod p".to_string()
            }
        );
    }

    #[test]
    fn pod_with_duplicate_ports_is_rejected() {
        let err = PodSpec::new("t1", "p", "c", "img", vec![ssh_port(), ssh_port()], vec![])
            .unwrap_err();
        assert!(matches!(err, SpecError::DuplicatePort { port: 22, .. }));
    }

    #[test]
    fn names_must_be_dns_labels() {
        let err = PodSpec::new("T1", "p", "c", "img", vec![ssh_port()], vec![]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidName { field: "namespace", .. }));

        let err = PodSpec::new("", "p", "c", "img", vec![ssh_port()], vec![]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidName { field: "namespace", .. }));

        let long = "a".repeat(64);
        let err = PodSpec::new("t1", long, "c", "img", vec![ssh_port()], vec![]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidName { field: "pod name", .. }));
    }

    #[test]
    fn port_names_follow_service_name_rules() {
        let port = PodPortSpec {
            name: "massa-node-port-22".to_string(),
            container_port: 22,
        };
        let err = PodSpec::new("t1", "p", "c", "img", vec![port], vec![]).unwrap_err();
        assert!(matches!(err, SpecError::InvalidPortName { .. }));
    }

    #[test]
    fn empty_image_is_rejected() {
        let err = PodSpec::new("t1", "p", "c", "  ", vec![ssh_port()], vec![]).unwrap_err();
        assert_eq!(err, SpecError::EmptyField { field: "image" });
    }

    #[test]
    fn service_target_port_must_be_exposed_by_pod() {
        let err = ServiceSpec::new(
            "t1",
            "massa-node-1-service",
            pod(),
            vec!["10.0.0.1".to_string()],
            vec![service_port(33034)],
        )
        .unwrap_err();

        assert_eq!(
            err,
            SpecError::UnknownTargetPort {
                service: "massa-node-1-service".to_string(),
                pod: "massa-node-1-pod".to_string(),
                target_port: 33034,
            }
        );
    }

    #[test]
    fn service_namespace_must_match_pod() {
        let err = ServiceSpec::new(
            "other",
            "massa-node-1-service",
            pod(),
            vec![],
            vec![service_port(22)],
        )
        .unwrap_err();

        assert!(matches!(err, SpecError::NamespaceMismatch { .. }));
    }

    #[test]
    fn service_shares_its_pod() {
        let pod = pod();
        let service = ServiceSpec::new(
            "t1",
            "massa-node-1-service",
            Arc::clone(&pod),
            vec!["10.0.0.1".to_string()],
            vec![service_port(22)],
        )
        .expect("valid service");

        assert_eq!(Arc::strong_count(&pod), 2);
        assert_eq!(service.pod().name(), "massa-node-1-pod");
        assert_eq!(service.ports()[0].target_port, 22);
    }
}
