//! In-memory platform for tests
//!
//! [`MockGateway`] keeps namespaces, secrets, pods and services in process
//! memory and simulates their convergence: pods turn `Running` after a
//! configurable number of reads, services get node ports assigned on creation,
//! and namespace removal can be made to linger. Every call is recorded so tests
//! can assert on what was (or was not) sent to the platform.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use api_types::NamespacePhase;
use api_types::PodPhase;
use api_types::PodStatus;
use api_types::ServiceStatus;
use error_stack::Report;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodStatus as K8sPodStatus;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;

use super::traits::GatewayResult;
use super::traits::PlatformGateway;
use crate::infrastructure::k8s::status::pod_status;
use crate::infrastructure::k8s::status::service_status;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::ResourceKind;

const FIRST_AUTO_NODE_PORT: u16 = 32000;

/// How a pod converges once created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodBehavior {
    /// `Pending` for the given number of reads, `Running` afterwards.
    RunningAfter(u32),
    /// Never leaves the given phase.
    StuckIn(PodPhase),
}

impl Default for PodBehavior {
    fn default() -> Self {
        Self::RunningAfter(0)
    }
}

/// How long a removed namespace stays visible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NamespaceRemoval {
    #[default]
    Immediate,
    /// Reported as `Terminating` for the given number of status reads.
    AfterPolls(u32),
    /// Stays `Terminating` forever.
    Never,
}

/// Gateway operations, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateNamespace,
    RemoveNamespace,
    NamespaceStatus,
    CreateSecret,
    ReplaceSecret,
    CreatePod,
    RemovePod,
    CreateService,
    RemoveServices,
    ListPods,
    ListServices,
}

/// A recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    CreateNamespace(String),
    RemoveNamespace(String),
    NamespaceStatus(String),
    CreateSecret { namespace: String, name: String },
    ReplaceSecret { namespace: String, name: String },
    CreatePod { namespace: String, name: String },
    RemovePod { namespace: String, name: String },
    CreateService { namespace: String, name: String },
    RemoveServices { namespace: String, names: Vec<String> },
    ListPods(String),
    ListServices(String),
}

#[derive(Debug)]
struct InjectedFailure {
    error: KubernetesError,
    /// `None` fails every call.
    remaining: Option<u32>,
}

#[derive(Debug)]
struct MockPod {
    manifest: Pod,
    ip: String,
    reads: u32,
}

#[derive(Debug)]
struct MockNamespace {
    phase: NamespacePhase,
    /// Status reads left before a terminating namespace disappears.
    removal_countdown: Option<u32>,
    secrets: BTreeMap<String, Secret>,
    pods: BTreeMap<String, MockPod>,
    services: BTreeMap<String, Service>,
}

impl MockNamespace {
    fn new() -> Self {
        Self {
            phase: NamespacePhase::Active,
            removal_countdown: None,
            secrets: BTreeMap::new(),
            pods: BTreeMap::new(),
            services: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    namespaces: BTreeMap<String, MockNamespace>,
    pod_behaviors: HashMap<String, PodBehavior>,
    stalled_services: Vec<String>,
    namespace_removal: NamespaceRemoval,
    failures: HashMap<Operation, InjectedFailure>,
    calls: Vec<GatewayCall>,
    next_node_port: u16,
    next_address: u8,
}

impl MockState {
    fn record(&mut self, call: GatewayCall, operation: Operation) -> GatewayResult<()> {
        self.calls.push(call);
        let Some(failure) = self.failures.get_mut(&operation) else {
            return Ok(());
        };
        let error = failure.error.clone();
        match failure.remaining {
            None => {}
            Some(remaining) if remaining <= 1 => {
                self.failures.remove(&operation);
            }
            Some(remaining) => failure.remaining = Some(remaining - 1),
        }
        Err(Report::new(error))
    }

    fn namespace_mut(&mut self, namespace: &str) -> GatewayResult<&mut MockNamespace> {
        self.namespaces.get_mut(namespace).ok_or_else(|| {
            Report::new(KubernetesError::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
            })
        })
    }

    fn next_address(&mut self) -> u8 {
        self.next_address = self.next_address.wrapping_add(1);
        self.next_address
    }

    fn assign_node_port(&mut self) -> u16 {
        let port = FIRST_AUTO_NODE_PORT + self.next_node_port;
        self.next_node_port += 1;
        port
    }
}

fn object_name(name: Option<&String>) -> String {
    name.cloned().unwrap_or_default()
}

fn already_exists(kind: ResourceKind, name: &str) -> Report<KubernetesError> {
    Report::new(KubernetesError::AlreadyExists {
        kind,
        name: name.to_string(),
    })
}

/// In-memory [`PlatformGateway`].
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets how the pod named `pod_name` converges. Pods default to running on
    /// the first read.
    pub fn set_pod_behavior(&self, pod_name: impl Into<String>, behavior: PodBehavior) {
        self.state().pod_behaviors.insert(pod_name.into(), behavior);
    }

    /// Keeps the named service from ever getting its node ports assigned.
    pub fn stall_service(&self, service_name: impl Into<String>) {
        self.state().stalled_services.push(service_name.into());
    }

    pub fn set_namespace_removal(&self, removal: NamespaceRemoval) {
        self.state().namespace_removal = removal;
    }

    /// Makes every call of `operation` fail with `error`.
    pub fn fail_always(&self, operation: Operation, error: KubernetesError) {
        self.state().failures.insert(
            operation,
            InjectedFailure {
                error,
                remaining: None,
            },
        );
    }

    /// Makes the next `times` calls of `operation` fail with `error`.
    pub fn fail_times(&self, operation: Operation, error: KubernetesError, times: u32) {
        if times == 0 {
            return;
        }
        self.state().failures.insert(
            operation,
            InjectedFailure {
                error,
                remaining: Some(times),
            },
        );
    }

    pub fn clear_failures(&self) {
        self.state().failures.clear();
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.state().calls.clone()
    }

    /// Names of the services whose creation was requested, in order.
    pub fn created_services(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|call| match call {
                GatewayCall::CreateService { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.state().namespaces.keys().cloned().collect()
    }

    pub fn pod_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .namespaces
            .get(namespace)
            .map(|ns| ns.pods.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn service_names(&self, namespace: &str) -> Vec<String> {
        self.state()
            .namespaces
            .get(namespace)
            .map(|ns| ns.services.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.state()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.secrets.get(name).cloned())
    }
}

#[async_trait::async_trait]
impl PlatformGateway for MockGateway {
    async fn create_namespace(&self, manifest: Namespace) -> GatewayResult<()> {
        let name = object_name(manifest.metadata.name.as_ref());
        let mut state = self.state();
        state.record(
            GatewayCall::CreateNamespace(name.clone()),
            Operation::CreateNamespace,
        )?;
        if state.namespaces.contains_key(&name) {
            return Err(already_exists(ResourceKind::Namespace, &name));
        }
        state.namespaces.insert(name, MockNamespace::new());
        Ok(())
    }

    async fn remove_namespace(&self, name: &str) -> GatewayResult<()> {
        let mut state = self.state();
        state.record(
            GatewayCall::RemoveNamespace(name.to_string()),
            Operation::RemoveNamespace,
        )?;
        let removal = state.namespace_removal;
        let Some(namespace) = state.namespaces.get_mut(name) else {
            return Ok(());
        };
        match removal {
            NamespaceRemoval::Immediate => {
                state.namespaces.remove(name);
            }
            NamespaceRemoval::AfterPolls(reads) => {
                namespace.phase = NamespacePhase::Terminating;
                namespace.removal_countdown.get_or_insert(reads);
            }
            NamespaceRemoval::Never => namespace.phase = NamespacePhase::Terminating,
        }
        Ok(())
    }

    async fn namespace_status(&self, name: &str) -> GatewayResult<Option<NamespacePhase>> {
        let mut state = self.state();
        state.record(
            GatewayCall::NamespaceStatus(name.to_string()),
            Operation::NamespaceStatus,
        )?;
        let Some(namespace) = state.namespaces.get_mut(name) else {
            return Ok(None);
        };
        match namespace.removal_countdown {
            Some(0) => {
                state.namespaces.remove(name);
                Ok(None)
            }
            Some(remaining) => {
                namespace.removal_countdown = Some(remaining - 1);
                Ok(Some(namespace.phase))
            }
            None => Ok(Some(namespace.phase)),
        }
    }

    async fn create_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()> {
        let name = object_name(manifest.metadata.name.as_ref());
        let mut state = self.state();
        state.record(
            GatewayCall::CreateSecret {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
            Operation::CreateSecret,
        )?;
        let ns = state.namespace_mut(namespace)?;
        if ns.secrets.contains_key(&name) {
            return Err(already_exists(ResourceKind::Secret, &name));
        }
        ns.secrets.insert(name, manifest);
        Ok(())
    }

    async fn replace_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()> {
        let name = object_name(manifest.metadata.name.as_ref());
        let mut state = self.state();
        state.record(
            GatewayCall::ReplaceSecret {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
            Operation::ReplaceSecret,
        )?;
        let ns = state.namespace_mut(namespace)?;
        match ns.secrets.get_mut(&name) {
            Some(secret) => {
                *secret = manifest;
                Ok(())
            }
            None => Err(Report::new(KubernetesError::NotFound {
                kind: ResourceKind::Secret,
                name,
            })),
        }
    }

    async fn create_pod(&self, namespace: &str, manifest: Pod) -> GatewayResult<()> {
        let name = object_name(manifest.metadata.name.as_ref());
        let mut state = self.state();
        state.record(
            GatewayCall::CreatePod {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
            Operation::CreatePod,
        )?;
        let ip = format!("10.244.0.{}", state.next_address());
        let ns = state.namespace_mut(namespace)?;
        if ns.pods.contains_key(&name) {
            return Err(already_exists(ResourceKind::Pod, &name));
        }
        ns.pods.insert(
            name,
            MockPod {
                manifest,
                ip,
                reads: 0,
            },
        );
        Ok(())
    }

    async fn remove_pod(&self, namespace: &str, name: &str) -> GatewayResult<()> {
        let mut state = self.state();
        state.record(
            GatewayCall::RemovePod {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            Operation::RemovePod,
        )?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            ns.pods.remove(name);
        }
        Ok(())
    }

    async fn create_service(&self, namespace: &str, mut manifest: Service) -> GatewayResult<()> {
        let name = object_name(manifest.metadata.name.as_ref());
        let mut state = self.state();
        state.record(
            GatewayCall::CreateService {
                namespace: namespace.to_string(),
                name: name.clone(),
            },
            Operation::CreateService,
        )?;
        if state
            .namespace_mut(namespace)?
            .services
            .contains_key(&name)
        {
            return Err(already_exists(ResourceKind::Service, &name));
        }

        let stalled = state.stalled_services.contains(&name);
        let cluster_ip = format!("10.96.0.{}", state.next_address());
        if let Some(spec) = manifest.spec.as_mut() {
            spec.cluster_ip = Some(cluster_ip.clone());
            spec.cluster_ips = Some(vec![cluster_ip]);
            for port in spec.ports.iter_mut().flatten() {
                if stalled {
                    port.node_port = None;
                } else if port.node_port.is_none() {
                    port.node_port = Some(i32::from(state.assign_node_port()));
                }
            }
        }
        manifest.metadata.namespace = Some(namespace.to_string());

        state
            .namespace_mut(namespace)?
            .services
            .insert(name, manifest);
        Ok(())
    }

    async fn remove_services(&self, namespace: &str, names: &[String]) -> GatewayResult<()> {
        let mut state = self.state();
        state.record(
            GatewayCall::RemoveServices {
                namespace: namespace.to_string(),
                names: names.to_vec(),
            },
            Operation::RemoveServices,
        )?;
        if let Some(ns) = state.namespaces.get_mut(namespace) {
            for name in names {
                ns.services.remove(name);
            }
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> GatewayResult<Vec<PodStatus>> {
        let mut state = self.state();
        state.record(
            GatewayCall::ListPods(namespace.to_string()),
            Operation::ListPods,
        )?;
        let MockState {
            namespaces,
            pod_behaviors,
            ..
        } = &mut *state;
        let Some(ns) = namespaces.get_mut(namespace) else {
            return Ok(Vec::new());
        };

        let statuses = ns
            .pods
            .iter_mut()
            .map(|(name, pod)| {
                pod.reads += 1;
                let phase = match pod_behaviors.get(name).copied().unwrap_or_default() {
                    PodBehavior::RunningAfter(reads) if pod.reads > reads => PodPhase::Running,
                    PodBehavior::RunningAfter(_) => PodPhase::Pending,
                    PodBehavior::StuckIn(phase) => phase,
                };
                let mut observed = pod.manifest.clone();
                observed.metadata.namespace = Some(namespace.to_string());
                observed.status = Some(K8sPodStatus {
                    phase: Some(phase.to_string()),
                    pod_ip: (phase == PodPhase::Running).then(|| pod.ip.clone()),
                    ..Default::default()
                });
                pod_status(&observed)
            })
            .collect();
        Ok(statuses)
    }

    async fn list_services(&self, namespace: &str) -> GatewayResult<Vec<ServiceStatus>> {
        let mut state = self.state();
        state.record(
            GatewayCall::ListServices(namespace.to_string()),
            Operation::ListServices,
        )?;
        Ok(state
            .namespaces
            .get(namespace)
            .map(|ns| ns.services.values().map(service_status).collect())
            .unwrap_or_default())
    }
}
