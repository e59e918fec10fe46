use core::error::Error;

/// Kinds of platform objects the orchestrator manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum ResourceKind {
    #[display("namespace")]
    Namespace,
    #[display("secret")]
    Secret,
    #[display("pod")]
    Pod,
    #[display("service")]
    Service,
}

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum KubernetesError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    /// Network failure, throttling or an overloaded API server. Worth retrying.
    #[display("Transient Kubernetes API failure on {kind} {name}: {message}")]
    Transient {
        kind: ResourceKind,
        name: String,
        message: String,
    },
    #[display("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },
    #[display("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },
    /// Malformed request, validation or authorization failure. Never retried.
    #[display("Kubernetes API rejected request on {kind} {name}: {message}")]
    Permanent {
        kind: ResourceKind,
        name: String,
        message: String,
    },
}

impl KubernetesError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }
}

impl Error for KubernetesError {}
