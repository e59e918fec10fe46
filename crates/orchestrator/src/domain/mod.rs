pub mod cluster;
pub mod cluster_manager;
pub mod errors;
pub mod mock;
pub mod ports;
pub mod readiness;
pub mod resource_manager;
pub mod spec;
pub mod traits;
