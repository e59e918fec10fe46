//! Traits at the boundary between orchestration and the container platform

use api_types::NamespacePhase;
use api_types::PodStatus;
use api_types::ServiceStatus;
use error_stack::Report;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;

use crate::infrastructure::k8s::KubernetesError;

pub type GatewayResult<T> = Result<T, Report<KubernetesError>>;

/// Façade over the platform's namespace, secret, pod and service operations.
///
/// Every call is a single round trip (transient failures may be retried inside
/// the implementation). A successful create means the object was accepted, not
/// that it is ready. Removing an object that does not exist succeeds.
#[async_trait::async_trait]
pub trait PlatformGateway: Send + Sync {
    async fn create_namespace(&self, manifest: Namespace) -> GatewayResult<()>;

    async fn remove_namespace(&self, name: &str) -> GatewayResult<()>;

    /// Phase of the namespace, or `None` once it no longer exists.
    async fn namespace_status(&self, name: &str) -> GatewayResult<Option<NamespacePhase>>;

    async fn create_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()>;

    async fn replace_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()>;

    async fn create_pod(&self, namespace: &str, manifest: Pod) -> GatewayResult<()>;

    async fn remove_pod(&self, namespace: &str, name: &str) -> GatewayResult<()>;

    async fn create_service(&self, namespace: &str, manifest: Service) -> GatewayResult<()>;

    async fn remove_services(&self, namespace: &str, names: &[String]) -> GatewayResult<()>;

    async fn list_pods(&self, namespace: &str) -> GatewayResult<Vec<PodStatus>>;

    async fn list_services(&self, namespace: &str) -> GatewayResult<Vec<ServiceStatus>>;
}
