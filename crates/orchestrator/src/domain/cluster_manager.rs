//! Whole-cluster launch and teardown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use api_types::LaunchResult;
use api_types::NamespacePhase;
use api_types::NodeLaunchInfo;
use error_stack::Report;
use error_stack::ResultExt;
use serde::Serialize;
use tokio::time::Instant;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::cluster::ClusterSpec;
use super::cluster::NodeSpec;
use super::errors::ClusterState;
use super::errors::OrchestrationError;
use super::errors::Result;
use super::readiness::Readiness;
use super::readiness::ReadinessPoller;
use super::resource_manager::KubernetesManager;
use super::traits::PlatformGateway;
use crate::infrastructure::k8s::ResourceKind;

/// How namespace removal ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum TerminationOutcome {
    /// The namespace is gone.
    Confirmed,
    /// The grace period ran out while the namespace was still visible.
    TerminationTimeout { last_phase: Option<NamespacePhase> },
    /// Removal was requested but its progress could not be read.
    Unverified { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerminationReport {
    pub namespace: String,
    pub outcome: TerminationOutcome,
    pub waited: Duration,
}

impl TerminationReport {
    pub fn is_confirmed(&self) -> bool {
        self.outcome == TerminationOutcome::Confirmed
    }
}

/// Stands up and tears down N-node clusters, one namespace each.
///
/// Tracks the lifecycle state of every namespace it has touched. Namespaces it
/// never saw are `Unlaunched`.
pub struct MassaClusterManager<G> {
    manager: KubernetesManager<G>,
    states: Mutex<BTreeMap<String, ClusterState>>,
}

impl<G: PlatformGateway> MassaClusterManager<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self::from_manager(KubernetesManager::new(gateway))
    }

    pub fn with_poll_interval(gateway: Arc<G>, interval: Duration) -> Self {
        Self::from_manager(KubernetesManager::with_poller(
            gateway,
            ReadinessPoller::new(interval),
        ))
    }

    pub fn from_manager(manager: KubernetesManager<G>) -> Self {
        Self {
            manager,
            states: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn manager(&self) -> &KubernetesManager<G> {
        &self.manager
    }

    pub fn state(&self, namespace: &str) -> ClusterState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .copied()
            .unwrap_or(ClusterState::Unlaunched)
    }

    /// Moves `namespace` to `next` if its current state is one of `allowed`.
    fn transition(
        &self,
        namespace: &str,
        operation: &'static str,
        allowed: &[ClusterState],
        next: ClusterState,
    ) -> Result<ClusterState> {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        let current = states
            .get(namespace)
            .copied()
            .unwrap_or(ClusterState::Unlaunched);
        if !allowed.contains(&current) {
            return Err(Report::new(OrchestrationError::InvalidState {
                namespace: namespace.to_string(),
                operation,
                state: current,
            }));
        }
        states.insert(namespace.to_string(), next);
        info!(namespace, from = %current, to = %next, "Cluster state changed");
        Ok(current)
    }

    fn set_state(&self, namespace: &str, next: ClusterState) {
        let previous = self
            .states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), next);
        info!(namespace, from = ?previous, to = %next, "Cluster state changed");
    }

    /// Creates the namespace, the credentials secret, every pod and then every
    /// service, in node order, and returns a fresh read-back of all of them.
    ///
    /// The first failure aborts the launch and leaves the cluster `Degraded`
    /// with whatever was already created still in place.
    #[tracing::instrument(skip(self, spec), fields(namespace = spec.namespace(), nodes = spec.nodes_number()))]
    pub async fn launch(&self, spec: &ClusterSpec) -> Result<LaunchResult> {
        let nodes = spec
            .nodes()
            .map_err(|err| Report::new(OrchestrationError::from(err)))?;
        let namespace = spec.namespace();

        self.transition(
            namespace,
            "launch",
            &[ClusterState::Unlaunched, ClusterState::Terminated],
            ClusterState::Launching,
        )?;

        match self.launch_nodes(spec, &nodes).await {
            Ok(result) => {
                self.set_state(namespace, ClusterState::Running);
                info!(nodes = result.nodes.len(), "Cluster launched");
                Ok(result)
            }
            Err(report) => {
                self.set_state(namespace, ClusterState::Degraded);
                error!("Cluster launch failed: {report:?}");
                Err(report)
            }
        }
    }

    async fn launch_nodes(&self, spec: &ClusterSpec, nodes: &[NodeSpec]) -> Result<LaunchResult> {
        let namespace = spec.namespace();
        self.manager.create_namespace(namespace).await?;
        self.manager
            .create_secret(namespace, spec.credentials())
            .await?;

        for node in nodes {
            self.manager
                .create_pod(&node.pod, spec.startup_pods_timeout())
                .await
                .attach_printable_lazy(|| format!("while launching node {}", node.index))?;
        }
        info!("All pods running");

        for node in nodes {
            self.manager
                .create_service(&node.service, spec.startup_services_timeout())
                .await
                .attach_printable_lazy(|| format!("while exposing node {}", node.index))?;
        }
        info!("All services exposed");

        self.collect_result(namespace, nodes).await
    }

    /// Pairs fresh pod and service reads with the nodes they belong to.
    async fn collect_result(&self, namespace: &str, nodes: &[NodeSpec]) -> Result<LaunchResult> {
        let mut pods = self.manager.get_pods_info(namespace).await?;
        let mut services = self.manager.get_services_info(namespace).await?;

        let incomplete = |kind, name: &str| {
            Report::new(OrchestrationError::IncompleteResult {
                namespace: namespace.to_string(),
                kind,
                name: name.to_string(),
            })
        };

        let mut infos = Vec::with_capacity(nodes.len());
        for node in nodes {
            let pod_name = node.pod.name();
            let service_name = node.service.name();
            let pod = pods
                .iter()
                .position(|pod| pod.name == pod_name)
                .map(|index| pods.swap_remove(index))
                .ok_or_else(|| incomplete(ResourceKind::Pod, pod_name))?;
            let service = services
                .iter()
                .position(|service| service.name == service_name)
                .map(|index| services.swap_remove(index))
                .ok_or_else(|| incomplete(ResourceKind::Service, service_name))?;

            infos.push(NodeLaunchInfo {
                node_index: node.index,
                pod,
                service,
            });
        }

        Ok(LaunchResult {
            namespace: namespace.to_string(),
            nodes: infos,
        })
    }

    /// Removes the cluster's namespace and waits up to `grace` for it to
    /// disappear.
    ///
    /// Running out of grace is reported in the outcome, not as an error; the
    /// cluster ends `Terminated` either way. Only a rejected removal request
    /// fails, leaving the cluster `Degraded`.
    #[tracing::instrument(skip(self))]
    pub async fn terminate(&self, namespace: &str, grace: Duration) -> Result<TerminationReport> {
        self.transition(
            namespace,
            "terminate",
            &[
                ClusterState::Unlaunched,
                ClusterState::Running,
                ClusterState::Degraded,
                ClusterState::Terminated,
            ],
            ClusterState::Terminating,
        )?;

        if let Err(report) = self.manager.remove_namespace(namespace).await {
            self.set_state(namespace, ClusterState::Degraded);
            error!("Namespace removal failed: {report:?}");
            return Err(report);
        }

        let started = Instant::now();
        let waited = self
            .manager
            .poller()
            .await_condition(
                grace,
                || self.manager.namespace_phase(namespace),
                Option::is_none,
            )
            .await;

        let outcome = match waited {
            Ok(Readiness::Ready(_)) => {
                info!("Namespace removed");
                TerminationOutcome::Confirmed
            }
            Ok(Readiness::TimedOut { last_observed, .. }) => {
                warn!(
                    grace = ?grace,
                    last_phase = ?last_observed,
                    "Namespace still present after grace period"
                );
                TerminationOutcome::TerminationTimeout {
                    last_phase: last_observed,
                }
            }
            Err(report) => {
                warn!("Could not confirm namespace removal: {report:?}");
                TerminationOutcome::Unverified {
                    reason: report.current_context().to_string(),
                }
            }
        };

        self.set_state(namespace, ClusterState::Terminated);
        Ok(TerminationReport {
            namespace: namespace.to_string(),
            outcome,
            waited: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use api_types::PodPhase;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::domain::cluster::Credentials;
    use crate::domain::errors::Stage;
    use crate::domain::mock::MockGateway;
    use crate::domain::mock::NamespaceRemoval;
    use crate::domain::mock::Operation;
    use crate::domain::mock::PodBehavior;
    use crate::domain::ports::PortPlan;
    use crate::infrastructure::k8s::KubernetesError;

    fn cluster() -> (Arc<MockGateway>, MassaClusterManager<MockGateway>) {
        let gateway = Arc::new(MockGateway::new());
        let cluster =
            MassaClusterManager::with_poll_interval(Arc::clone(&gateway), Duration::from_millis(100));
        (gateway, cluster)
    }

    fn spec(nodes: usize) -> ClusterSpec {
        ClusterSpec::builder(
            vec!["10.0.0.1".to_string()],
            Credentials::with_authorized_keys("ssh-ed25519 AAAA"),
        )
        .namespace("t1")
        .nodes_number(nodes)
        .ports(PortPlan::new(vec![22, 33035], 20001))
        .build()
        .expect("valid spec")
    }

    fn permanent(kind: ResourceKind, name: &str) -> KubernetesError {
        KubernetesError::Permanent {
            kind,
            name: name.to_string(),
            message: "forbidden".to_string(),
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn launch_reports_nodes_in_index_order() {
        let (_gateway, cluster) = cluster();

        let result = cluster.launch(&spec(11)).await.unwrap();

        let indices: Vec<usize> = result.nodes.iter().map(|node| node.node_index).collect();
        assert_eq!(indices, (1..=11).collect::<Vec<_>>());
        assert_eq!(result.nodes[9].pod.name, "massa-node-10-pod");
        assert_eq!(result.nodes[9].service.name, "massa-node-10-service");
        assert_eq!(cluster.state("t1"), ClusterState::Running);
    }

    #[test(tokio::test(start_paused = true))]
    async fn second_launch_is_rejected_while_running() {
        let (_gateway, cluster) = cluster();
        cluster.launch(&spec(1)).await.unwrap();

        let err = cluster.launch(&spec(1)).await.unwrap_err();

        assert!(matches!(
            err.current_context(),
            OrchestrationError::InvalidState {
                operation: "launch",
                state: ClusterState::Running,
                ..
            }
        ));
    }

    #[test(tokio::test(start_paused = true))]
    async fn failed_launch_leaves_cluster_degraded() {
        let (gateway, cluster) = cluster();
        gateway.set_pod_behavior("massa-node-2-pod", PodBehavior::StuckIn(PodPhase::Failed));

        let err = cluster.launch(&spec(3)).await.unwrap_err();

        assert_eq!(err.current_context().stage(), Some(Stage::PodReady));
        assert_eq!(err.current_context().resource_name(), Some("massa-node-2-pod"));
        assert_eq!(cluster.state("t1"), ClusterState::Degraded);
        // No rollback, and node 3 was never attempted.
        assert_eq!(
            gateway.pod_names("t1"),
            vec!["massa-node-1-pod".to_string(), "massa-node-2-pod".to_string()]
        );
        assert!(gateway.created_services().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn degraded_cluster_can_be_terminated_and_relaunched() {
        let (gateway, cluster) = cluster();
        gateway.fail_times(
            Operation::CreateService,
            permanent(ResourceKind::Service, "massa-node-1-service"),
            1,
        );
        cluster.launch(&spec(1)).await.unwrap_err();
        assert_eq!(cluster.state("t1"), ClusterState::Degraded);

        let report = cluster.terminate("t1", Duration::from_secs(1)).await.unwrap();
        assert!(report.is_confirmed());
        assert_eq!(cluster.state("t1"), ClusterState::Terminated);

        cluster.launch(&spec(1)).await.unwrap();
        assert_eq!(cluster.state("t1"), ClusterState::Running);
    }

    #[test(tokio::test(start_paused = true))]
    async fn lingering_namespace_is_confirmed_within_grace() {
        let (gateway, cluster) = cluster();
        gateway.set_namespace_removal(NamespaceRemoval::AfterPolls(3));
        cluster.launch(&spec(1)).await.unwrap();

        let report = cluster.terminate("t1", Duration::from_secs(5)).await.unwrap();

        assert_eq!(report.outcome, TerminationOutcome::Confirmed);
        assert_eq!(report.waited, Duration::from_millis(300));
    }

    #[test(tokio::test(start_paused = true))]
    async fn rejected_removal_degrades_the_cluster() {
        let (gateway, cluster) = cluster();
        cluster.launch(&spec(1)).await.unwrap();
        gateway.fail_always(
            Operation::RemoveNamespace,
            permanent(ResourceKind::Namespace, "t1"),
        );

        let err = cluster
            .terminate("t1", Duration::from_secs(1))
            .await
            .unwrap_err();

        assert_eq!(err.current_context().stage(), Some(Stage::NamespaceRemove));
        assert_eq!(cluster.state("t1"), ClusterState::Degraded);
    }

    #[test(tokio::test(start_paused = true))]
    async fn unreadable_removal_still_terminates() {
        let (gateway, cluster) = cluster();
        cluster.launch(&spec(1)).await.unwrap();
        gateway.fail_always(
            Operation::NamespaceStatus,
            permanent(ResourceKind::Namespace, "t1"),
        );

        let report = cluster.terminate("t1", Duration::from_secs(1)).await.unwrap();

        assert!(matches!(
            report.outcome,
            TerminationOutcome::Unverified { .. }
        ));
        assert_eq!(cluster.state("t1"), ClusterState::Terminated);
    }

    #[test(tokio::test(start_paused = true))]
    async fn untracked_namespace_can_be_terminated() {
        let (gateway, cluster) = cluster();

        let report = cluster.terminate("leftover", Duration::ZERO).await.unwrap();

        assert!(report.is_confirmed());
        assert_eq!(cluster.state("leftover"), ClusterState::Terminated);
        assert!(gateway.namespaces().is_empty());
    }
}
