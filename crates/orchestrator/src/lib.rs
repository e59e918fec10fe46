//! Provisioning of multi-node Massa test clusters on Kubernetes.
//!
//! [`MassaClusterManager`] launches and terminates whole clusters on top of
//! [`KubernetesManager`], which handles single resources through a
//! [`PlatformGateway`]. [`KubeGateway`] talks to a real API server;
//! [`domain::mock::MockGateway`] keeps everything in memory for tests.

pub mod domain;
pub mod infrastructure;

pub use domain::cluster::ClusterSpec;
pub use domain::cluster::ClusterSpecBuilder;
pub use domain::cluster::Credentials;
pub use domain::cluster::NamingScheme;
pub use domain::cluster::NodeSpec;
pub use domain::cluster::DEFAULT_IMAGE;
pub use domain::cluster::DEFAULT_NAMESPACE;
pub use domain::cluster::DEFAULT_NODES_NUMBER;
pub use domain::cluster::DEFAULT_SECRET_NAME;
pub use domain::cluster::DEFAULT_SSH_USERNAME;
pub use domain::cluster::DEFAULT_STARTUP_TIMEOUT;
pub use domain::cluster_manager::MassaClusterManager;
pub use domain::cluster_manager::TerminationOutcome;
pub use domain::cluster_manager::TerminationReport;
pub use domain::errors::ClusterState;
pub use domain::errors::LastObserved;
pub use domain::errors::OrchestrationError;
pub use domain::errors::Stage;
pub use domain::ports::PortPlan;
pub use domain::ports::DEFAULT_NODE_PORT_BASE;
pub use domain::ports::DEFAULT_OPENED_PORTS;
pub use domain::ports::DEFAULT_PORT_BASE;
pub use domain::readiness::Readiness;
pub use domain::readiness::ReadinessPoller;
pub use domain::readiness::DEFAULT_POLL_INTERVAL;
pub use domain::readiness::MIN_POLL_INTERVAL;
pub use domain::resource_manager::KubernetesManager;
pub use domain::spec::PodSpec;
pub use domain::spec::ServicePortSpec;
pub use domain::spec::ServiceSpec;
pub use domain::spec::SpecError;
pub use domain::traits::PlatformGateway;
pub use infrastructure::k8s::KubeGateway;
pub use infrastructure::k8s::KubernetesError;
pub use infrastructure::k8s::ResourceKind;
pub use infrastructure::k8s::RetryPolicy;
