//! Shared API type definitions
//!
//! This crate contains the read-back records produced by the cluster orchestrator:
//! pod and service status snapshots and the aggregated launch result handed to
//! test harness callers. Every record is a plain value taken from a fresh platform
//! read; nothing here is a live handle.

use serde::Deserialize;
use serde::Serialize;

/// Lifecycle phase reported by the platform for a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    /// Parses the platform's phase string. Missing or unrecognised phases map to `Unknown`.
    pub fn from_platform(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for PodPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Lifecycle phase reported by the platform for a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NamespacePhase {
    Active,
    Terminating,
    Unknown,
}

impl NamespacePhase {
    pub fn from_platform(phase: Option<&str>) -> Self {
        match phase {
            Some("Active") => Self::Active,
            Some("Terminating") => Self::Terminating,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for NamespacePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// A port declared by one of the pod's containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPortStatus {
    /// Port name
    pub name: Option<String>,
    /// Port number inside the container
    pub container_port: u16,
    /// Transport protocol, e.g. "TCP"
    pub protocol: String,
}

/// Fresh read-back of a pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodStatus {
    /// Pod name
    pub name: String,
    /// Pod namespace
    pub namespace: String,
    /// Current lifecycle phase
    pub phase: PodPhase,
    /// IP addresses allocated to the pod
    pub pod_ips: Vec<String>,
    /// Ports declared across all containers of the pod
    pub container_ports: Vec<ContainerPortStatus>,
}

impl PodStatus {
    /// Whether the pod reports every one of `ports` among its container ports.
    pub fn exposes_all(&self, ports: &[u16]) -> bool {
        ports.iter().all(|port| {
            self.container_ports
                .iter()
                .any(|reported| reported.container_port == *port)
        })
    }
}

/// A resolved service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePortStatus {
    /// Port name
    pub name: Option<String>,
    /// Externally exposed port
    pub port: u16,
    /// Container port the traffic is forwarded to
    pub target_port: Option<u16>,
    /// Node port, once assigned by the platform
    pub node_port: Option<u16>,
}

/// Fresh read-back of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Service name
    pub name: String,
    /// Service namespace
    pub namespace: String,
    /// Cluster-internal addresses of the service
    pub cluster_ips: Vec<String>,
    /// External addresses the service is reachable on
    pub external_ips: Vec<String>,
    /// Resolved port mappings
    pub ports: Vec<ServicePortStatus>,
}

/// Launch outcome of a single node: its pod and the service exposing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeLaunchInfo {
    /// 1-based node index, as used in resource names
    pub node_index: usize,
    pub pod: PodStatus,
    pub service: ServiceStatus,
}

/// Outcome of standing up a whole cluster.
///
/// Holds exactly one entry per requested node, ordered by node index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResult {
    /// Namespace the cluster lives in
    pub namespace: String,
    /// Per-node information, ordered by node index
    pub nodes: Vec<NodeLaunchInfo>,
}

impl LaunchResult {
    pub fn pods(&self) -> impl Iterator<Item = &PodStatus> {
        self.nodes.iter().map(|node| &node.pod)
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceStatus> {
        self.nodes.iter().map(|node| &node.service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pod_phase_from_platform_strings() {
        assert_eq!(PodPhase::from_platform(Some("Running")), PodPhase::Running);
        assert_eq!(PodPhase::from_platform(Some("Pending")), PodPhase::Pending);
        assert_eq!(PodPhase::from_platform(Some("Bogus")), PodPhase::Unknown);
        assert_eq!(PodPhase::from_platform(None), PodPhase::Unknown);
    }

    #[test]
    fn exposes_all_requires_every_port() {
        let status = PodStatus {
            name: "massa-node-1-pod".to_string(),
            namespace: "t1".to_string(),
            phase: PodPhase::Running,
            pod_ips: vec![],
            container_ports: vec![ContainerPortStatus {
                name: Some("m-22-p".to_string()),
                container_port: 22,
                protocol: "TCP".to_string(),
            }],
        };

        assert!(status.exposes_all(&[22]));
        assert!(!status.exposes_all(&[22, 33034]));
        assert!(status.exposes_all(&[]));
    }
}
