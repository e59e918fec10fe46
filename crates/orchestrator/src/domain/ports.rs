//! Deterministic per-node port allocation.
//!
//! Node `n` (1-based) with `k` opened ports receives the external ports
//! `base + (n - 1) * k + j` for `j in 0..k`. Blocks of different nodes never
//! overlap, so the allocation is injective within one cluster. Node ports, when
//! a node-port base is configured, follow the same layout.

use std::collections::BTreeSet;

use super::spec::PodPortSpec;
use super::spec::ServicePortSpec;
use super::spec::SpecError;

/// Ports every Massa node opens: SSH, the node's protocol ports, bootstrap and API.
pub const DEFAULT_OPENED_PORTS: [u16; 8] = [22, 33034, 33035, 33036, 33037, 33038, 31244, 31245];
pub const DEFAULT_PORT_BASE: u16 = 20001;
pub const DEFAULT_NODE_PORT_BASE: u16 = 30001;
pub const DEFAULT_PORT_NAME_PREFIX: &str = "m";
pub const DEFAULT_PORT_NAME_SUFFIX: &str = "p";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPlan {
    opened_ports: Vec<u16>,
    port_base: u16,
    node_port_base: Option<u16>,
    name_prefix: String,
    name_suffix: String,
}

impl Default for PortPlan {
    fn default() -> Self {
        Self::new(DEFAULT_OPENED_PORTS.to_vec(), DEFAULT_PORT_BASE)
            .with_node_port_base(DEFAULT_NODE_PORT_BASE)
    }
}

impl PortPlan {
    pub fn new(opened_ports: Vec<u16>, port_base: u16) -> Self {
        Self {
            opened_ports,
            port_base,
            node_port_base: None,
            name_prefix: DEFAULT_PORT_NAME_PREFIX.to_string(),
            name_suffix: DEFAULT_PORT_NAME_SUFFIX.to_string(),
        }
    }

    pub fn with_node_port_base(mut self, node_port_base: u16) -> Self {
        self.node_port_base = Some(node_port_base);
        self
    }

    /// Leaves node port assignment to the platform.
    pub fn without_node_ports(mut self) -> Self {
        self.node_port_base = None;
        self
    }

    pub fn with_port_names(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self.name_suffix = suffix.into();
        self
    }

    pub fn opened_ports(&self) -> &[u16] {
        &self.opened_ports
    }

    pub fn port_base(&self) -> u16 {
        self.port_base
    }

    pub fn node_port_base(&self) -> Option<u16> {
        self.node_port_base
    }

    /// Name shared by the pod port and the service port mapping to it, e.g. `m-22-p`.
    pub fn port_name(&self, port: u16) -> String {
        format!("{}-{port}-{}", self.name_prefix, self.name_suffix)
    }

    /// Checks that the opened ports are usable and that the port blocks of
    /// `nodes` nodes fit in the port range.
    pub fn validate(&self, nodes: usize) -> Result<(), SpecError> {
        if self.opened_ports.is_empty() {
            return Err(SpecError::NoPorts {
                resource: "port plan".to_string(),
            });
        }

        let mut seen = BTreeSet::new();
        for &port in &self.opened_ports {
            if port == 0 {
                return Err(SpecError::ZeroPort {
                    resource: "port plan".to_string(),
                });
            }
            if !seen.insert(port) {
                return Err(SpecError::DuplicatePort {
                    resource: "port plan".to_string(),
                    port,
                });
            }
        }

        if nodes == 0 {
            return Err(SpecError::NoNodes);
        }

        let last_slot = self.opened_ports.len() - 1;
        for base in std::iter::once(self.port_base).chain(self.node_port_base) {
            if base == 0 || offset_port(base, self.opened_ports.len(), nodes, last_slot).is_none() {
                return Err(SpecError::PortRangeOverflow {
                    base,
                    nodes,
                    ports_per_node: self.opened_ports.len(),
                });
            }
        }

        Ok(())
    }

    /// Container ports of every node's pod.
    pub fn pod_ports(&self) -> Vec<PodPortSpec> {
        self.opened_ports
            .iter()
            .map(|&port| PodPortSpec {
                name: self.port_name(port),
                container_port: port,
            })
            .collect()
    }

    /// External ports allocated to node `node_index` (1-based), in opened-port order.
    pub fn external_ports(&self, node_index: usize) -> Result<Vec<u16>, SpecError> {
        self.block(self.port_base, node_index)
    }

    /// Service port mappings of node `node_index` (1-based).
    pub fn service_ports(&self, node_index: usize) -> Result<Vec<ServicePortSpec>, SpecError> {
        let external = self.external_ports(node_index)?;
        let node_ports = match self.node_port_base {
            Some(base) => self.block(base, node_index)?.into_iter().map(Some).collect(),
            None => vec![None; self.opened_ports.len()],
        };

        Ok(self
            .opened_ports
            .iter()
            .zip(external)
            .zip(node_ports)
            .map(|((&target_port, port), node_port)| ServicePortSpec {
                name: self.port_name(target_port),
                port,
                target_port,
                node_port,
            })
            .collect())
    }

    fn block(&self, base: u16, node_index: usize) -> Result<Vec<u16>, SpecError> {
        let per_node = self.opened_ports.len();
        (0..per_node)
            .map(|slot| {
                offset_port(base, per_node, node_index, slot).ok_or(SpecError::PortRangeOverflow {
                    base,
                    nodes: node_index,
                    ports_per_node: per_node,
                })
            })
            .collect()
    }
}

fn offset_port(base: u16, per_node: usize, node_index: usize, slot: usize) -> Option<u16> {
    let offset = node_index
        .checked_sub(1)?
        .checked_mul(per_node)?
        .checked_add(slot)?;
    let port = usize::from(base).checked_add(offset)?;
    u16::try_from(port).ok()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn single_port_nodes_get_consecutive_ports() {
        let plan = PortPlan::new(vec![33035], 20001);

        let ports: Vec<u16> = (1..=3)
            .map(|node| plan.external_ports(node).expect("ports")[0])
            .collect();

        assert_eq!(ports, vec![20001, 20002, 20003]);
    }

    #[test]
    fn allocation_is_injective_across_nodes() {
        let plan = PortPlan::default();
        let mut seen = BTreeSet::new();
        let mut seen_node_ports = BTreeSet::new();

        for node in 1..=12 {
            for port in plan.service_ports(node).expect("ports") {
                assert!(seen.insert(port.port), "external port {} reused", port.port);
                let node_port = port.node_port.expect("node port");
                assert!(seen_node_ports.insert(node_port), "node port {node_port} reused");
            }
        }

        assert_eq!(seen.len(), 12 * DEFAULT_OPENED_PORTS.len());
    }

    #[test]
    fn service_ports_target_the_opened_ports() {
        let plan = PortPlan::new(vec![22, 33034], 20001).with_node_port_base(30001);

        let ports = plan.service_ports(2).expect("ports");

        assert_eq!(
            ports,
            vec![
                ServicePortSpec {
                    name: "m-22-p".to_string(),
                    port: 20003,
                    target_port: 22,
                    node_port: Some(30003),
                },
                ServicePortSpec {
                    name: "m-33034-p".to_string(),
                    port: 20004,
                    target_port: 33034,
                    node_port: Some(30004),
                },
            ]
        );
    }

    #[test]
    fn node_ports_are_optional() {
        let plan = PortPlan::default().without_node_ports();
        let ports = plan.service_ports(1).expect("ports");
        assert!(ports.iter().all(|port| port.node_port.is_none()));
    }

    #[test]
    fn custom_port_names() {
        let plan = PortPlan::new(vec![22], 20001).with_port_names("node", "tcp");
        assert_eq!(plan.pod_ports()[0].name, "node-22-tcp");
    }

    #[test]
    fn overflowing_plan_is_rejected() {
        let plan = PortPlan::new(vec![22, 23], 65530);
        assert!(plan.validate(3).is_ok());
        assert!(matches!(
            plan.validate(4),
            Err(SpecError::PortRangeOverflow { nodes: 4, .. })
        ));
    }

    #[test]
    fn duplicate_and_empty_port_lists_are_rejected() {
        assert!(matches!(
            PortPlan::new(vec![22, 22], 20001).validate(1),
            Err(SpecError::DuplicatePort { port: 22, .. })
        ));
        assert!(matches!(
            PortPlan::new(vec![], 20001).validate(1),
            Err(SpecError::NoPorts { .. })
        ));
    }

    #[test]
    fn node_index_zero_has_no_block() {
        let plan = PortPlan::new(vec![22], 20001);
        assert!(plan.external_ports(0).is_err());
    }
}
