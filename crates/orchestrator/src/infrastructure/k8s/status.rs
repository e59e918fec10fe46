//! Conversion of Kubernetes objects into status snapshots.

use api_types::ContainerPortStatus;
use api_types::PodPhase;
use api_types::PodStatus;
use api_types::ServicePortStatus;
use api_types::ServiceStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

const DEFAULT_PROTOCOL: &str = "TCP";

fn port_number(port: i32) -> Option<u16> {
    u16::try_from(port).ok()
}

pub fn pod_status(pod: &Pod) -> PodStatus {
    let container_ports = pod
        .spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .flat_map(|container| container.ports.iter().flatten())
        .filter_map(|port| {
            Some(ContainerPortStatus {
                name: port.name.clone(),
                container_port: port_number(port.container_port)?,
                protocol: port
                    .protocol
                    .clone()
                    .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string()),
            })
        })
        .collect();

    let status = pod.status.as_ref();

    PodStatus {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        phase: PodPhase::from_platform(status.and_then(|s| s.phase.as_deref())),
        pod_ips: status
            .and_then(|s| s.pod_ip.clone())
            .into_iter()
            .collect(),
        container_ports,
    }
}

pub fn service_status(service: &Service) -> ServiceStatus {
    let spec = service.spec.as_ref();

    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .filter_map(|port| {
            Some(ServicePortStatus {
                name: port.name.clone(),
                port: port_number(port.port)?,
                target_port: match &port.target_port {
                    Some(IntOrString::Int(target)) => port_number(*target),
                    _ => None,
                },
                node_port: port.node_port.and_then(port_number),
            })
        })
        .collect();

    let cluster_ips = spec
        .and_then(|s| s.cluster_ips.clone())
        .or_else(|| spec.and_then(|s| s.cluster_ip.clone()).map(|ip| vec![ip]))
        .unwrap_or_default();

    ServiceStatus {
        name: service.metadata.name.clone().unwrap_or_default(),
        namespace: service.metadata.namespace.clone().unwrap_or_default(),
        cluster_ips,
        external_ips: spec
            .and_then(|s| s.external_ips.clone())
            .unwrap_or_default(),
        ports,
    }
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Container;
    use k8s_openapi::api::core::v1::ContainerPort;
    use k8s_openapi::api::core::v1::PodSpec;
    use k8s_openapi::api::core::v1::PodStatus as K8sPodStatus;
    use k8s_openapi::api::core::v1::ServicePort;
    use k8s_openapi::api::core::v1::ServiceSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn pod_status_reads_phase_and_ports() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("massa-node-1-pod".to_string()),
                namespace: Some("t1".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "massa-node-1-container".to_string(),
                    ports: Some(vec![ContainerPort {
                        name: Some("m-22-p".to_string()),
                        container_port: 22,
                        ..Default::default()
                    }]),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: Some(K8sPodStatus {
                phase: Some("Running".to_string()),
                pod_ip: Some("172.16.0.4".to_string()),
                ..Default::default()
            }),
        };

        let status = pod_status(&pod);

        assert_eq!(
            status,
            PodStatus {
                name: "massa-node-1-pod".to_string(),
                namespace: "t1".to_string(),
                phase: PodPhase::Running,
                pod_ips: vec!["172.16.0.4".to_string()],
                container_ports: vec![ContainerPortStatus {
                    name: Some("m-22-p".to_string()),
                    container_port: 22,
                    protocol: "TCP".to_string(),
                }],
            }
        );
    }

    #[test]
    fn pod_without_status_is_unknown() {
        let status = pod_status(&Pod::default());
        assert_eq!(status.phase, PodPhase::Unknown);
        assert!(status.container_ports.is_empty());
        assert!(status.pod_ips.is_empty());
    }

    #[test]
    fn service_status_reads_resolved_ports() {
        let service = Service {
            metadata: ObjectMeta {
                name: Some("massa-node-1-service".to_string()),
                namespace: Some("t1".to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.96.0.12".to_string()),
                external_ips: Some(vec!["10.0.0.1".to_string()]),
                ports: Some(vec![ServicePort {
                    name: Some("m-22-p".to_string()),
                    port: 20001,
                    target_port: Some(IntOrString::Int(22)),
                    node_port: Some(30001),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            status: None,
        };

        let status = service_status(&service);

        assert_eq!(status.cluster_ips, vec!["10.96.0.12".to_string()]);
        assert_eq!(status.external_ips, vec!["10.0.0.1".to_string()]);
        assert_eq!(
            status.ports,
            vec![ServicePortStatus {
                name: Some("m-22-p".to_string()),
                port: 20001,
                target_port: Some(22),
                node_port: Some(30001),
            }]
        );
    }

    #[test]
    fn named_target_ports_are_not_resolved() {
        let service = Service {
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    port: 20001,
                    target_port: Some(IntOrString::String("ssh".to_string())),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        assert_eq!(service_status(&service).ports[0].target_port, None);
    }
}
