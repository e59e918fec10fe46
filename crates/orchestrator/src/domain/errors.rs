//! Failure taxonomy of the orchestration layer.

use core::error::Error;
use std::time::Duration;

use api_types::PodPhase;
use error_stack::Report;

use super::spec::SpecError;
use crate::infrastructure::k8s::KubernetesError;
use crate::infrastructure::k8s::ResourceKind;

/// Step of a resource's lifecycle an operation failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Stage {
    #[display("namespace-create")]
    NamespaceCreate,
    #[display("secret-create")]
    SecretCreate,
    #[display("pod-create")]
    PodCreate,
    #[display("pod-ready")]
    PodReady,
    #[display("service-create")]
    ServiceCreate,
    #[display("service-ready")]
    ServiceReady,
    #[display("inspect")]
    Inspect,
    #[display("pod-remove")]
    PodRemove,
    #[display("service-remove")]
    ServiceRemove,
    #[display("namespace-remove")]
    NamespaceRemove,
}

/// Last state seen before a readiness wait gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum LastObserved {
    #[display("not visible yet")]
    Absent,
    #[display("phase {_0}")]
    Pod(PodPhase),
    #[display("{resolved}/{requested} ports resolved")]
    ServicePorts { resolved: usize, requested: usize },
}

/// Lifecycle state of a cluster, as tracked by the cluster manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ClusterState {
    Unlaunched,
    Launching,
    Running,
    Degraded,
    Terminating,
    Terminated,
}

#[derive(Debug, derive_more::Display)]
pub enum OrchestrationError {
    #[display("Invalid spec: {_0}")]
    InvalidSpec(SpecError),
    #[display("Platform kept failing transiently during {stage} of {kind} {name}")]
    PlatformTransient {
        kind: ResourceKind,
        name: String,
        stage: Stage,
    },
    #[display("Platform rejected {stage} of {kind} {name}")]
    PlatformPermanent {
        kind: ResourceKind,
        name: String,
        stage: Stage,
    },
    #[display("{kind} {name} not ready after {waited:?} ({stage}), last observed: {last_observed}")]
    ReadinessTimeout {
        kind: ResourceKind,
        name: String,
        stage: Stage,
        waited: Duration,
        last_observed: LastObserved,
    },
    #[display("Cannot {operation} cluster {namespace} while it is {state}")]
    InvalidState {
        namespace: String,
        operation: &'static str,
        state: ClusterState,
    },
    #[display("{kind} {name} vanished from namespace {namespace} before the launch result was assembled")]
    IncompleteResult {
        namespace: String,
        kind: ResourceKind,
        name: String,
    },
}

impl OrchestrationError {
    /// The lifecycle stage a platform or readiness failure happened in.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::PlatformTransient { stage, .. }
            | Self::PlatformPermanent { stage, .. }
            | Self::ReadinessTimeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Name of the resource the failure is about, when there is one.
    pub fn resource_name(&self) -> Option<&str> {
        match self {
            Self::PlatformTransient { name, .. }
            | Self::PlatformPermanent { name, .. }
            | Self::ReadinessTimeout { name, .. }
            | Self::IncompleteResult { name, .. } => Some(name),
            _ => None,
        }
    }
}

impl Error for OrchestrationError {}

impl From<SpecError> for OrchestrationError {
    fn from(err: SpecError) -> Self {
        Self::InvalidSpec(err)
    }
}

pub type Result<T> = std::result::Result<T, Report<OrchestrationError>>;

/// Lifts a gateway failure into the orchestration taxonomy, keeping the gateway
/// report as the cause.
pub(crate) fn platform_failure(
    report: Report<KubernetesError>,
    kind: ResourceKind,
    name: &str,
    stage: Stage,
) -> Report<OrchestrationError> {
    let name = name.to_string();
    let context = if report.current_context().is_transient() {
        OrchestrationError::PlatformTransient { kind, name, stage }
    } else {
        OrchestrationError::PlatformPermanent { kind, name, stage }
    };
    report.change_context(context)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn transient_gateway_failures_stay_transient() {
        let report = Report::new(KubernetesError::Transient {
            kind: ResourceKind::Pod,
            name: "massa-node-1-pod".to_string(),
            message: "503".to_string(),
        });

        let lifted = platform_failure(report, ResourceKind::Pod, "massa-node-1-pod", Stage::PodCreate);

        assert!(matches!(
            lifted.current_context(),
            OrchestrationError::PlatformTransient {
                stage: Stage::PodCreate,
                ..
            }
        ));
    }

    #[test]
    fn other_gateway_failures_are_permanent() {
        let report = Report::new(KubernetesError::Permanent {
            kind: ResourceKind::Service,
            name: "massa-node-1-service".to_string(),
            message: "forbidden".to_string(),
        });

        let lifted = platform_failure(
            report,
            ResourceKind::Service,
            "massa-node-1-service",
            Stage::ServiceCreate,
        );

        assert_eq!(lifted.current_context().stage(), Some(Stage::ServiceCreate));
        assert_eq!(
            lifted.current_context().resource_name(),
            Some("massa-node-1-service")
        );
        assert!(matches!(
            lifted.current_context(),
            OrchestrationError::PlatformPermanent { .. }
        ));
    }

    #[test]
    fn readiness_timeout_names_the_resource_and_stage() {
        let err = OrchestrationError::ReadinessTimeout {
            kind: ResourceKind::Pod,
            name: "massa-node-2-pod".to_string(),
            stage: Stage::PodReady,
            waited: Duration::from_secs(1),
            last_observed: LastObserved::Pod(PodPhase::Pending),
        };

        assert_eq!(
            err.to_string(),
            "pod massa-node-2-pod not ready after 1s (pod-ready), last observed: phase Pending"
        );
    }
}
