//! [`PlatformGateway`] backed by the Kubernetes API server.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use api_types::NamespacePhase;
use api_types::PodStatus;
use api_types::ServiceStatus;
use error_stack::Report;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::warn;

use super::status::pod_status;
use super::status::service_status;
use super::types::KubernetesError;
use super::types::ResourceKind;
use crate::domain::traits::GatewayResult;
use crate::domain::traits::PlatformGateway;
use crate::infrastructure::kube_client;

/// How often a transiently failing call is attempted before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Delay before the second attempt; grows linearly with each attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Runs `call` until it succeeds, fails with a non-transient error, or the policy
/// runs out of attempts.
pub(crate) async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> GatewayResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<T>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(report)
                if report.current_context().is_transient() && attempt < policy.max_attempts =>
            {
                warn!(operation, attempt, "Transient Kubernetes API failure, retrying: {report:?}");
                tokio::time::sleep(policy.backoff * attempt).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

/// [`retry_transient`] for create calls. A conflict on a retried attempt means an
/// earlier attempt was stored even though its response was lost, so it counts as
/// created.
pub(crate) async fn retry_create<F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> GatewayResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = GatewayResult<()>>,
{
    let mut attempts: u32 = 0;
    let result = retry_transient(policy, operation, || {
        attempts += 1;
        call()
    })
    .await;

    match result {
        Err(report) if attempts > 1 && report.current_context().is_already_exists() => {
            debug!(operation, attempts, "{}, stored by an earlier attempt", report.current_context());
            Ok(())
        }
        other => other,
    }
}

/// Maps a client error onto the gateway taxonomy.
pub(crate) fn classify(err: kube::Error, kind: ResourceKind, name: &str) -> Report<KubernetesError> {
    let name = name.to_string();
    let classified = match &err {
        kube::Error::Api(response) => match response.code {
            404 => KubernetesError::NotFound { kind, name },
            409 => KubernetesError::AlreadyExists { kind, name },
            408 | 429 | 500 | 502 | 503 | 504 => KubernetesError::Transient {
                kind,
                name,
                message: response.message.clone(),
            },
            _ => KubernetesError::Permanent {
                kind,
                name,
                message: response.message.clone(),
            },
        },
        kube::Error::HyperError(_) | kube::Error::Service(_) => KubernetesError::Transient {
            kind,
            name,
            message: err.to_string(),
        },
        _ => KubernetesError::Permanent {
            kind,
            name,
            message: err.to_string(),
        },
    };
    Report::new(classified).attach_printable(format!("Kubernetes API error: {err}"))
}

fn ignore_not_found(result: GatewayResult<()>) -> GatewayResult<()> {
    match result {
        Err(report) if report.current_context().is_not_found() => {
            debug!("{}, nothing to remove", report.current_context());
            Ok(())
        }
        other => other,
    }
}

fn manifest_name(name: Option<&String>) -> String {
    name.cloned().unwrap_or_default()
}

/// Gateway talking to a live cluster. Cloning shares the underlying client.
#[derive(Clone)]
pub struct KubeGateway {
    client: Client,
    retry: RetryPolicy,
}

impl KubeGateway {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn connect(
        kubeconfig: Option<PathBuf>,
        context: Option<String>,
    ) -> Result<Self, Report<KubernetesError>> {
        Ok(Self::new(
            kube_client::init_kube_client(kubeconfig, context).await?,
        ))
    }

    async fn create<K>(
        &self,
        api: Api<K>,
        kind: ResourceKind,
        manifest: K,
        operation: &'static str,
    ) -> GatewayResult<()>
    where
        K: kube::Resource + Clone + std::fmt::Debug + serde::Serialize + serde::de::DeserializeOwned,
    {
        let name = manifest_name(manifest.meta().name.as_ref());
        retry_create(self.retry, operation, || {
            let api = api.clone();
            let manifest = manifest.clone();
            let name = name.clone();
            async move {
                api.create(&PostParams::default(), &manifest)
                    .await
                    .map(|_| ())
                    .map_err(|e| classify(e, kind, &name))
            }
        })
        .await
    }

    async fn delete<K>(
        &self,
        api: Api<K>,
        kind: ResourceKind,
        name: &str,
        params: DeleteParams,
        operation: &'static str,
    ) -> GatewayResult<()>
    where
        K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    {
        let result = retry_transient(self.retry, operation, || {
            let api = api.clone();
            let params = params.clone();
            let name = name.to_string();
            async move {
                api.delete(&name, &params)
                    .await
                    .map(|_| ())
                    .map_err(|e| classify(e, kind, &name))
            }
        })
        .await;
        ignore_not_found(result)
    }

    async fn list<K>(
        &self,
        api: Api<K>,
        kind: ResourceKind,
        namespace: &str,
        operation: &'static str,
    ) -> GatewayResult<Vec<K>>
    where
        K: kube::Resource + Clone + std::fmt::Debug + serde::de::DeserializeOwned,
    {
        retry_transient(self.retry, operation, || {
            let api = api.clone();
            let namespace = namespace.to_string();
            async move {
                api.list(&ListParams::default())
                    .await
                    .map(|list| list.items)
                    .map_err(|e| classify(e, kind, &namespace))
            }
        })
        .await
    }
}

#[async_trait::async_trait]
impl PlatformGateway for KubeGateway {
    async fn create_namespace(&self, manifest: Namespace) -> GatewayResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.create(api, ResourceKind::Namespace, manifest, "create_namespace")
            .await
    }

    async fn remove_namespace(&self, name: &str) -> GatewayResult<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.delete(
            api,
            ResourceKind::Namespace,
            name,
            DeleteParams::foreground(),
            "remove_namespace",
        )
        .await
    }

    async fn namespace_status(&self, name: &str) -> GatewayResult<Option<NamespacePhase>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let namespace = retry_transient(self.retry, "namespace_status", || {
            let api = api.clone();
            let name = name.to_string();
            async move {
                api.get_opt(&name)
                    .await
                    .map_err(|e| classify(e, ResourceKind::Namespace, &name))
            }
        })
        .await?;

        Ok(namespace.map(|ns| {
            NamespacePhase::from_platform(ns.status.as_ref().and_then(|s| s.phase.as_deref()))
        }))
    }

    async fn create_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        self.create(api, ResourceKind::Secret, manifest, "create_secret")
            .await
    }

    async fn replace_secret(&self, namespace: &str, manifest: Secret) -> GatewayResult<()> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let name = manifest_name(manifest.metadata.name.as_ref());
        retry_transient(self.retry, "replace_secret", || {
            let api = api.clone();
            let manifest = manifest.clone();
            let name = name.clone();
            async move {
                api.replace(&name, &PostParams::default(), &manifest)
                    .await
                    .map(|_| ())
                    .map_err(|e| classify(e, ResourceKind::Secret, &name))
            }
        })
        .await
    }

    async fn create_pod(&self, namespace: &str, manifest: Pod) -> GatewayResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        self.create(api, ResourceKind::Pod, manifest, "create_pod")
            .await
    }

    async fn remove_pod(&self, namespace: &str, name: &str) -> GatewayResult<()> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        self.delete(
            api,
            ResourceKind::Pod,
            name,
            DeleteParams::default(),
            "remove_pod",
        )
        .await
    }

    async fn create_service(&self, namespace: &str, manifest: Service) -> GatewayResult<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        self.create(api, ResourceKind::Service, manifest, "create_service")
            .await
    }

    async fn remove_services(&self, namespace: &str, names: &[String]) -> GatewayResult<()> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        for name in names {
            self.delete(
                api.clone(),
                ResourceKind::Service,
                name,
                DeleteParams::default(),
                "remove_services",
            )
            .await?;
        }
        Ok(())
    }

    async fn list_pods(&self, namespace: &str) -> GatewayResult<Vec<PodStatus>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = self
            .list(api, ResourceKind::Pod, namespace, "list_pods")
            .await?;
        Ok(pods.iter().map(pod_status).collect())
    }

    async fn list_services(&self, namespace: &str) -> GatewayResult<Vec<ServiceStatus>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        let services = self
            .list(api, ResourceKind::Service, namespace, "list_services")
            .await?;
        Ok(services.iter().map(service_status).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use kube::core::ErrorResponse;
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {code}"),
            reason: String::new(),
            code,
        })
    }

    #[test]
    fn api_errors_are_classified_by_status_code() {
        let kind = ResourceKind::Pod;
        let classify = |code| classify(api_error(code), kind, "massa-node-1-pod");

        assert!(classify(404).current_context().is_not_found());
        assert!(classify(409).current_context().is_already_exists());
        for code in [429, 500, 503] {
            assert!(classify(code).current_context().is_transient(), "{code}");
        }
        for code in [400, 401, 403, 422] {
            assert!(
                matches!(
                    classify(code).current_context(),
                    KubernetesError::Permanent { .. }
                ),
                "{code}"
            );
        }
    }

    fn transient() -> Report<KubernetesError> {
        Report::new(KubernetesError::Transient {
            kind: ResourceKind::Service,
            name: "massa-node-1-service".to_string(),
            message: "etcdserver: request timed out".to_string(),
        })
    }

    #[test(tokio::test(start_paused = true))]
    async fn transient_failures_are_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry_transient(RetryPolicy::default(), "create_service", move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(transient())
            } else {
                Ok(7)
            }
        })
        .await;

        assert_eq!(result.expect("second attempt succeeds"), 7);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test(tokio::test(start_paused = true))]
    async fn retries_are_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let policy = RetryPolicy {
            max_attempts: 4,
            backoff: Duration::from_millis(10),
        };

        let result: GatewayResult<()> = retry_transient(policy, "create_service", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(transient())
        })
        .await;

        assert!(result.expect_err("retries exhausted").current_context().is_transient());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test(tokio::test(start_paused = true))]
    async fn permanent_failures_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result: GatewayResult<()> =
            retry_transient(RetryPolicy::default(), "create_pod", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(classify(api_error(403), ResourceKind::Pod, "massa-node-1-pod"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    fn already_exists() -> Report<KubernetesError> {
        classify(api_error(409), ResourceKind::Pod, "massa-node-1-pod")
    }

    #[test(tokio::test(start_paused = true))]
    async fn conflict_after_lost_response_counts_as_created() {
        let stored = AtomicBool::new(false);
        let counter = AtomicU32::new(0);
        let (stored, calls) = (&stored, &counter);

        // The first attempt is stored but answered with a gateway timeout.
        let result = retry_create(RetryPolicy::default(), "create_pod", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            if stored.swap(true, Ordering::SeqCst) {
                Err(already_exists())
            } else {
                Err(classify(api_error(504), ResourceKind::Pod, "massa-node-1-pod"))
            }
        })
        .await;

        assert!(result.is_ok(), "{result:?}");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test(tokio::test(start_paused = true))]
    async fn conflict_on_first_attempt_is_reported() {
        let result = retry_create(RetryPolicy::default(), "create_pod", || async {
            Err(already_exists())
        })
        .await;

        assert!(result
            .expect_err("object predates the call")
            .current_context()
            .is_already_exists());
    }

    #[test]
    fn missing_objects_count_as_removed() {
        let result = ignore_not_found(Err(classify(
            api_error(404),
            ResourceKind::Service,
            "massa-node-1-service",
        )));
        assert!(result.is_ok());
    }
}
