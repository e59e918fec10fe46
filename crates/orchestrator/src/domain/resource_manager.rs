//! Single-resource lifecycle on top of a [`PlatformGateway`].
//!
//! Creation calls submit a manifest and then wait, through the shared
//! [`ReadinessPoller`], until a fresh read shows the resource usable. Removal
//! calls only issue the request.

use std::sync::Arc;
use std::time::Duration;

use api_types::NamespacePhase;
use api_types::PodPhase;
use api_types::PodStatus;
use api_types::ServiceStatus;
use error_stack::Report;
use tracing::debug;
use tracing::info;

use super::cluster::Credentials;
use super::errors::platform_failure;
use super::errors::LastObserved;
use super::errors::OrchestrationError;
use super::errors::Result;
use super::errors::Stage;
use super::readiness::Readiness;
use super::readiness::ReadinessPoller;
use super::spec::validate_label;
use super::spec::PodSpec;
use super::spec::ServicePortSpec;
use super::spec::ServiceSpec;
use super::traits::GatewayResult;
use super::traits::PlatformGateway;
use crate::infrastructure::k8s::manifest;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::ResourceKind;

/// Whether a pod is usable: running and reporting every declared port.
fn pod_ready(pod: &PodStatus, ports: &[u16]) -> bool {
    pod.phase == PodPhase::Running && pod.exposes_all(ports)
}

fn port_resolved(requested: &ServicePortSpec, service: &ServiceStatus) -> bool {
    service.ports.iter().any(|resolved| {
        resolved.port == requested.port
            && resolved.target_port == Some(requested.target_port)
            && match requested.node_port {
                Some(node_port) => resolved.node_port == Some(node_port),
                None => resolved.node_port.is_some(),
            }
    })
}

fn resolved_ports(spec: &ServiceSpec, service: &ServiceStatus) -> usize {
    spec.ports()
        .iter()
        .filter(|requested| port_resolved(requested, service))
        .count()
}

fn readiness_timeout(
    kind: ResourceKind,
    name: &str,
    stage: Stage,
    waited: Duration,
    last_observed: LastObserved,
) -> Report<OrchestrationError> {
    Report::new(OrchestrationError::ReadinessTimeout {
        kind,
        name: name.to_string(),
        stage,
        waited,
        last_observed,
    })
}

/// Creates, inspects and removes individual platform resources.
pub struct KubernetesManager<G> {
    gateway: Arc<G>,
    poller: ReadinessPoller,
}

impl<G: PlatformGateway> KubernetesManager<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self::with_poller(gateway, ReadinessPoller::default())
    }

    pub fn with_poller(gateway: Arc<G>, poller: ReadinessPoller) -> Self {
        Self { gateway, poller }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn poller(&self) -> ReadinessPoller {
        self.poller
    }

    /// Creates the namespace. An existing active namespace counts as success;
    /// one still being removed is rejected, since nothing can be created in it.
    #[tracing::instrument(skip(self))]
    pub async fn create_namespace(&self, namespace: &str) -> Result<()> {
        validate_label("namespace", namespace)
            .map_err(|err| Report::new(OrchestrationError::from(err)))?;

        match self
            .gateway
            .create_namespace(manifest::namespace(namespace))
            .await
        {
            Ok(()) => info!("Namespace created"),
            Err(report) if report.current_context().is_already_exists() => {
                if self.namespace_phase(namespace).await? == Some(NamespacePhase::Terminating) {
                    return Err(report
                        .attach_printable("namespace is still terminating from an earlier removal")
                        .change_context(OrchestrationError::PlatformPermanent {
                            kind: ResourceKind::Namespace,
                            name: namespace.to_string(),
                            stage: Stage::NamespaceCreate,
                        }));
                }
                debug!("Namespace already exists");
            }
            Err(report) => {
                return Err(platform_failure(
                    report,
                    ResourceKind::Namespace,
                    namespace,
                    Stage::NamespaceCreate,
                ))
            }
        }
        Ok(())
    }

    /// Stores `credentials` in their secret, replacing an existing one.
    #[tracing::instrument(skip(self, credentials), fields(secret = %credentials.secret_name))]
    pub async fn create_secret(&self, namespace: &str, credentials: &Credentials) -> Result<()> {
        let secret = manifest::credentials_secret(namespace, credentials);
        let name = credentials.secret_name.as_str();
        let lift = |report: Report<KubernetesError>| {
            platform_failure(report, ResourceKind::Secret, name, Stage::SecretCreate)
        };

        match self.gateway.create_secret(namespace, secret.clone()).await {
            Ok(()) => info!("Credentials secret created"),
            Err(report) if report.current_context().is_already_exists() => {
                self.gateway
                    .replace_secret(namespace, secret)
                    .await
                    .map_err(lift)?;
                info!("Credentials secret replaced");
            }
            Err(report) => return Err(lift(report)),
        }
        Ok(())
    }

    /// Creates the pod and waits up to `timeout` for it to run with all its
    /// ports reported.
    #[tracing::instrument(skip(self, spec), fields(namespace = spec.namespace(), pod = spec.name()))]
    pub async fn create_pod(&self, spec: &PodSpec, timeout: Duration) -> Result<PodStatus> {
        self.gateway
            .create_pod(spec.namespace(), manifest::pod(spec))
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Pod, spec.name(), Stage::PodCreate)
            })?;
        debug!("Pod accepted, waiting for it to run");

        let ports = spec.container_ports();
        let readiness = self
            .poller
            .await_condition(
                timeout,
                || self.find_pod(spec.namespace(), spec.name()),
                |observed| observed.as_ref().is_some_and(|pod| pod_ready(pod, &ports)),
            )
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Pod, spec.name(), Stage::PodReady)
            })?;

        let (last_observed, waited) = match readiness {
            Readiness::Ready(Some(pod)) => {
                info!(pod_ips = ?pod.pod_ips, "Pod running");
                return Ok(pod);
            }
            Readiness::Ready(None) => (None, Duration::ZERO),
            Readiness::TimedOut {
                last_observed,
                waited,
            } => (last_observed, waited),
        };

        Err(readiness_timeout(
            ResourceKind::Pod,
            spec.name(),
            Stage::PodReady,
            waited,
            last_observed.map_or(LastObserved::Absent, |pod| LastObserved::Pod(pod.phase)),
        ))
    }

    /// Creates the service and waits up to `timeout` for every requested port
    /// mapping to be resolved.
    #[tracing::instrument(skip(self, spec), fields(namespace = spec.namespace(), service = spec.name()))]
    pub async fn create_service(&self, spec: &ServiceSpec, timeout: Duration) -> Result<ServiceStatus> {
        self.gateway
            .create_service(spec.namespace(), manifest::service(spec))
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Service, spec.name(), Stage::ServiceCreate)
            })?;
        debug!("Service accepted, waiting for its ports");

        let requested = spec.ports().len();
        let readiness = self
            .poller
            .await_condition(
                timeout,
                || self.find_service(spec.namespace(), spec.name()),
                |observed| {
                    observed
                        .as_ref()
                        .is_some_and(|service| resolved_ports(spec, service) == requested)
                },
            )
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Service, spec.name(), Stage::ServiceReady)
            })?;

        let (last_observed, waited) = match readiness {
            Readiness::Ready(Some(service)) => {
                info!(ports = requested, "Service ports resolved");
                return Ok(service);
            }
            Readiness::Ready(None) => (None, Duration::ZERO),
            Readiness::TimedOut {
                last_observed,
                waited,
            } => (last_observed, waited),
        };

        Err(readiness_timeout(
            ResourceKind::Service,
            spec.name(),
            Stage::ServiceReady,
            waited,
            last_observed.map_or(LastObserved::Absent, |service| LastObserved::ServicePorts {
                resolved: resolved_ports(spec, &service),
                requested,
            }),
        ))
    }

    /// Fresh read of every pod in the namespace.
    pub async fn get_pods_info(&self, namespace: &str) -> Result<Vec<PodStatus>> {
        self.gateway.list_pods(namespace).await.map_err(|report| {
            platform_failure(report, ResourceKind::Pod, namespace, Stage::Inspect)
        })
    }

    /// Fresh read of every service in the namespace.
    pub async fn get_services_info(&self, namespace: &str) -> Result<Vec<ServiceStatus>> {
        self.gateway.list_services(namespace).await.map_err(|report| {
            platform_failure(report, ResourceKind::Service, namespace, Stage::Inspect)
        })
    }

    #[tracing::instrument(skip(self))]
    pub async fn remove_pod(&self, namespace: &str, name: &str) -> Result<()> {
        self.gateway
            .remove_pod(namespace, name)
            .await
            .map_err(|report| platform_failure(report, ResourceKind::Pod, name, Stage::PodRemove))?;
        info!("Pod removal requested");
        Ok(())
    }

    /// Removes the named services, or every service in the namespace when
    /// `names` is `None`. Absent services are ignored.
    #[tracing::instrument(skip(self))]
    pub async fn remove_services(&self, namespace: &str, names: Option<&[String]>) -> Result<()> {
        let names = match names {
            Some(names) => names.to_vec(),
            None => self
                .get_services_info(namespace)
                .await?
                .into_iter()
                .map(|service| service.name)
                .collect(),
        };
        if names.is_empty() {
            debug!("No services to remove");
            return Ok(());
        }

        self.gateway
            .remove_services(namespace, &names)
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Service, namespace, Stage::ServiceRemove)
            })?;
        info!(count = names.len(), "Service removal requested");
        Ok(())
    }

    /// Requests namespace removal without waiting for it to complete.
    #[tracing::instrument(skip(self))]
    pub async fn remove_namespace(&self, namespace: &str) -> Result<()> {
        self.gateway
            .remove_namespace(namespace)
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Namespace, namespace, Stage::NamespaceRemove)
            })?;
        info!("Namespace removal requested");
        Ok(())
    }

    /// Phase of the namespace, `None` once it is gone.
    pub async fn namespace_phase(&self, namespace: &str) -> Result<Option<NamespacePhase>> {
        self.gateway
            .namespace_status(namespace)
            .await
            .map_err(|report| {
                platform_failure(report, ResourceKind::Namespace, namespace, Stage::Inspect)
            })
    }

    async fn find_pod(&self, namespace: &str, name: &str) -> GatewayResult<Option<PodStatus>> {
        let pods = self.gateway.list_pods(namespace).await?;
        Ok(pods.into_iter().find(|pod| pod.name == name))
    }

    async fn find_service(&self, namespace: &str, name: &str) -> GatewayResult<Option<ServiceStatus>> {
        let services = self.gateway.list_services(namespace).await?;
        Ok(services.into_iter().find(|service| service.name == name))
    }
}
