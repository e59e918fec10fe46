//! Declarative description of a whole test cluster and the per-node resources
//! derived from it.

use std::sync::Arc;
use std::time::Duration;

use super::ports::PortPlan;
use super::spec::validate_label;
use super::spec::EnvBinding;
use super::spec::PodSpec;
use super::spec::ServiceSpec;
use super::spec::SpecError;

pub const DEFAULT_NAMESPACE: &str = "massa-simulator";
pub const DEFAULT_NODES_NUMBER: usize = 3;
pub const DEFAULT_IMAGE: &str = "aoudiamoncef/ubuntu-sshd";
pub const DEFAULT_NODE_PREFIX: &str = "massa-node";
pub const DEFAULT_SSH_USERNAME: &str = "simulator";
pub const DEFAULT_SECRET_NAME: &str = "massa-credentials";
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(3);

/// Environment keys the node image reads its SSH credentials from.
pub const SSH_USERNAME_KEY: &str = "SSH_USERNAME";
pub const SSH_PASSWORD_KEY: &str = "PASSWORD";
pub const SSH_AUTHORIZED_KEYS_KEY: &str = "AUTHORIZED_KEYS";

/// SSH credentials injected into every node through a platform secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub authorized_keys: Option<String>,
    /// Name of the secret holding the credentials in the cluster namespace
    pub secret_name: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("authorized_keys", &self.authorized_keys)
            .field("secret_name", &self.secret_name)
            .finish()
    }
}

impl Credentials {
    pub fn with_authorized_keys(keys: impl Into<String>) -> Self {
        Self {
            username: DEFAULT_SSH_USERNAME.to_string(),
            password: None,
            authorized_keys: Some(keys.into()),
            secret_name: DEFAULT_SECRET_NAME.to_string(),
        }
    }

    pub fn with_password(password: impl Into<String>) -> Self {
        Self {
            username: DEFAULT_SSH_USERNAME.to_string(),
            password: Some(password.into()),
            authorized_keys: None,
            secret_name: DEFAULT_SECRET_NAME.to_string(),
        }
    }

    fn validate(&self) -> Result<(), SpecError> {
        let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());
        if !present(&self.password) && !present(&self.authorized_keys) {
            return Err(SpecError::MissingCredentials);
        }
        if self.username.is_empty() {
            return Err(SpecError::EmptyField {
                field: "ssh username",
            });
        }
        validate_label("secret name", &self.secret_name)
    }

    /// Secret entries, keyed by the environment variable name the image expects.
    pub fn secret_entries(&self) -> Vec<(&'static str, String)> {
        let mut entries = vec![(SSH_USERNAME_KEY, self.username.clone())];
        if let Some(password) = self.password.as_ref().filter(|p| !p.is_empty()) {
            entries.push((SSH_PASSWORD_KEY, password.clone()));
        }
        if let Some(keys) = self.authorized_keys.as_ref().filter(|k| !k.is_empty()) {
            entries.push((SSH_AUTHORIZED_KEYS_KEY, keys.clone()));
        }
        entries
    }

    /// Container environment reading each secret entry.
    pub fn env_bindings(&self) -> Vec<EnvBinding> {
        self.secret_entries()
            .into_iter()
            .map(|(key, _)| EnvBinding::from_secret(key, &self.secret_name, key))
            .collect()
    }
}

/// Names of the resources backing node `n` (1-based).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    prefix: String,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self::new(DEFAULT_NODE_PREFIX)
    }
}

impl NamingScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn pod_name(&self, node_index: usize) -> String {
        format!("{}-{node_index}-pod", self.prefix)
    }

    pub fn container_name(&self, node_index: usize) -> String {
        format!("{}-{node_index}-container", self.prefix)
    }

    pub fn service_name(&self, node_index: usize) -> String {
        format!("{}-{node_index}-service", self.prefix)
    }
}

/// The pod and service making up one node.
#[derive(Debug, Clone)]
pub struct NodeSpec {
    /// 1-based node index
    pub index: usize,
    pub pod: Arc<PodSpec>,
    pub service: ServiceSpec,
}

/// Desired N-node cluster. Built through [`ClusterSpecBuilder`], which validates it.
#[derive(Debug, Clone)]
pub struct ClusterSpec {
    namespace: String,
    nodes_number: usize,
    external_ips: Vec<String>,
    credentials: Credentials,
    naming: NamingScheme,
    ports: PortPlan,
    image: String,
    startup_pods_timeout: Duration,
    startup_services_timeout: Duration,
}

impl ClusterSpec {
    pub fn builder(external_ips: Vec<String>, credentials: Credentials) -> ClusterSpecBuilder {
        ClusterSpecBuilder::new(external_ips, credentials)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn nodes_number(&self) -> usize {
        self.nodes_number
    }

    pub fn external_ips(&self) -> &[String] {
        &self.external_ips
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    pub fn ports(&self) -> &PortPlan {
        &self.ports
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn startup_pods_timeout(&self) -> Duration {
        self.startup_pods_timeout
    }

    pub fn startup_services_timeout(&self) -> Duration {
        self.startup_services_timeout
    }

    /// Derives the pod and service of node `node_index` (1-based).
    pub fn node(&self, node_index: usize) -> Result<NodeSpec, SpecError> {
        let pod = Arc::new(PodSpec::new(
            &self.namespace,
            self.naming.pod_name(node_index),
            self.naming.container_name(node_index),
            &self.image,
            self.ports.pod_ports(),
            self.credentials.env_bindings(),
        )?);

        let service = ServiceSpec::new(
            &self.namespace,
            self.naming.service_name(node_index),
            Arc::clone(&pod),
            self.external_ips.clone(),
            self.ports.service_ports(node_index)?,
        )?;

        Ok(NodeSpec {
            index: node_index,
            pod,
            service,
        })
    }

    /// Derives every node, in node-index order.
    pub fn nodes(&self) -> Result<Vec<NodeSpec>, SpecError> {
        (1..=self.nodes_number).map(|index| self.node(index)).collect()
    }
}

pub struct ClusterSpecBuilder {
    spec: ClusterSpec,
}

impl ClusterSpecBuilder {
    fn new(external_ips: Vec<String>, credentials: Credentials) -> Self {
        Self {
            spec: ClusterSpec {
                namespace: DEFAULT_NAMESPACE.to_string(),
                nodes_number: DEFAULT_NODES_NUMBER,
                external_ips,
                credentials,
                naming: NamingScheme::default(),
                ports: PortPlan::default(),
                image: DEFAULT_IMAGE.to_string(),
                startup_pods_timeout: DEFAULT_STARTUP_TIMEOUT,
                startup_services_timeout: DEFAULT_STARTUP_TIMEOUT,
            },
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.spec.namespace = namespace.into();
        self
    }

    pub fn nodes_number(mut self, nodes_number: usize) -> Self {
        self.spec.nodes_number = nodes_number;
        self
    }

    pub fn naming(mut self, naming: NamingScheme) -> Self {
        self.spec.naming = naming;
        self
    }

    pub fn ports(mut self, ports: PortPlan) -> Self {
        self.spec.ports = ports;
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.spec.image = image.into();
        self
    }

    pub fn startup_pods_timeout(mut self, timeout: Duration) -> Self {
        self.spec.startup_pods_timeout = timeout;
        self
    }

    pub fn startup_services_timeout(mut self, timeout: Duration) -> Self {
        self.spec.startup_services_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<ClusterSpec, SpecError> {
        let spec = self.spec;

        validate_label("namespace", &spec.namespace)?;
        if spec.nodes_number == 0 {
            return Err(SpecError::NoNodes);
        }
        let external_ips: Vec<String> = spec
            .external_ips
            .iter()
            .map(|ip| ip.trim().to_string())
            .filter(|ip| !ip.is_empty())
            .collect();
        if external_ips.is_empty() {
            return Err(SpecError::MissingExternalIps);
        }
        spec.credentials.validate()?;
        spec.ports.validate(spec.nodes_number)?;

        let spec = ClusterSpec {
            external_ips,
            ..spec
        };
        // Surfaces naming problems (e.g. an over-long prefix) before launch.
        spec.node(spec.nodes_number)?;
        Ok(spec)
    }
}
