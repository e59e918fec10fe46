mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use orchestrator::KubeGateway;
use orchestrator::KubernetesManager;
use orchestrator::MassaClusterManager;
use orchestrator::ReadinessPoller;
use orchestrator::RetryPolicy;
use serde::Serialize;
use utils::version;

use crate::config::Cli;
use crate::config::ClusterArgs;
use crate::config::Commands;
use crate::config::OutputFormat;

/// Sets up global panic hooks.
fn setup_global_hooks() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        default_hook(panic_info);
        tracing::error!("Thread panicked: {}", panic_info);
    }));
}

fn print<T: Serialize>(value: &T, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value).context("serialize to JSON")?,
        OutputFormat::Yaml => serde_yaml::to_string(value).context("serialize to YAML")?,
    };
    println!("{rendered}");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_global_hooks();

    let cli = Cli::parse();
    let _guard = utils::logging::init().context("initialise logging")?;

    tracing::info!("Starting massa-cluster {}", &**version::VERSION);

    let gateway = KubeGateway::connect(cli.kubeconfig.clone(), cli.context.clone())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to initialize Kubernetes client: {e:?}"))?
        .with_retry_policy(RetryPolicy {
            max_attempts: cli.api_attempts.max(1),
            ..RetryPolicy::default()
        });
    let manager = KubernetesManager::with_poller(
        Arc::new(gateway),
        ReadinessPoller::new(Duration::from_millis(cli.poll_interval_ms)),
    );

    match cli.command {
        Commands::Launch(cluster_args) => run_launch(manager, *cluster_args, cli.output).await,
        Commands::Terminate(args) => {
            let cluster = MassaClusterManager::from_manager(manager);
            let report = cluster
                .terminate(&args.namespace, Duration::from_secs(args.grace_seconds))
                .await
                .map_err(|e| anyhow::anyhow!("Failed to terminate cluster: {e:?}"))?;
            print(&report, cli.output)
        }
        Commands::Pods(args) => {
            let pods = manager
                .get_pods_info(&args.namespace)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list pods: {e:?}"))?;
            print(&pods, cli.output)
        }
        Commands::Services(args) => {
            let services = manager
                .get_services_info(&args.namespace)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list services: {e:?}"))?;
            print(&services, cli.output)
        }
    }
}

async fn run_launch(
    manager: KubernetesManager<KubeGateway>,
    cluster_args: ClusterArgs,
    output: OutputFormat,
) -> Result<()> {
    let spec = cluster_args
        .into_spec()
        .context("invalid cluster configuration")?;
    tracing::info!(
        namespace = spec.namespace(),
        nodes = spec.nodes_number(),
        "Launching cluster"
    );

    let cluster = MassaClusterManager::from_manager(manager);
    let result = cluster
        .launch(&spec)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to launch cluster: {e:?}"))?;

    print(&result, output)
}
