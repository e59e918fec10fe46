use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use utils::version;

use crate::config::cluster::ClusterArgs;

#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "MASSA_TEST_FRAMEWORK_KUBECONFIG",
        value_hint = clap::ValueHint::FilePath,
        help = "Path to a kubeconfig file; in-cluster or default configuration is used when unset"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(long, global = true, help = "Kubeconfig context to use")]
    pub context: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Json)]
    pub output: OutputFormat,

    #[arg(
        long,
        global = true,
        env = "MASSA_TEST_FRAMEWORK_POLL_INTERVAL_MS",
        default_value_t = 500,
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Interval between readiness checks, in milliseconds"
    )]
    pub poll_interval_ms: u64,

    #[arg(
        long,
        global = true,
        default_value_t = 3,
        help = "Attempts per Kubernetes API call when it fails transiently"
    )]
    pub api_attempts: u32,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Json,
    Yaml,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a test cluster and print its pods and services
    Launch(Box<ClusterArgs>),
    /// Remove a test cluster's namespace and wait for it to disappear
    Terminate(TerminateArgs),
    /// Print the pods of a namespace
    Pods(NamespaceArgs),
    /// Print the services of a namespace
    Services(NamespaceArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct TerminateArgs {
    #[arg(long, env = "MASSA_TEST_FRAMEWORK_NAMESPACE", default_value = orchestrator::DEFAULT_NAMESPACE)]
    pub namespace: String,

    #[arg(
        long,
        default_value_t = 60,
        help = "Seconds to wait for the namespace to disappear"
    )]
    pub grace_seconds: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct NamespaceArgs {
    #[arg(long, env = "MASSA_TEST_FRAMEWORK_NAMESPACE", default_value = orchestrator::DEFAULT_NAMESPACE)]
    pub namespace: String,
}
