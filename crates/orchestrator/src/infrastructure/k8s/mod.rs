pub mod gateway;
pub mod manifest;
pub mod status;
pub mod types;

pub use gateway::KubeGateway;
pub use gateway::RetryPolicy;
pub use types::KubernetesError;
pub use types::ResourceKind;
