pub mod cli;
pub mod cluster;

pub use cli::*;
pub use cluster::*;
