use anyhow::Context;
use clap::Parser;
use clusterscan::config::Config;
use clusterscan::k8s::router::Router;
use clusterscan::k8s::{KubeWorkloadReader, WatchOrchestrator, WatchScope};
use clusterscan::scan::{CommandScanner, ScanQueue, WorkloadWorker};
use clusterscan::transmitter::Transmitter;
use kube::Client;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "clusterscan")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Cluster-resident workload discovery and image-scan agent", long_about = None)]
struct Cli {
    #[arg(short, long, help = "Enable verbose logging")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    info!("starting clusterscan v{}", clusterscan::VERSION);

    let config = Config::from_env().context("failed to load configuration")?;
    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    let transmitter = Arc::new(Transmitter::new(
        config.upstream_url.clone(),
        config.integration_id.clone(),
        config.agent_id.clone(),
        config.cluster_name.clone(),
        config.namespace.clone(),
    )?);
    let scanner = Arc::new(CommandScanner::new(&config.scanner_command));
    let worker = Arc::new(WorkloadWorker::new(scanner, Arc::clone(&transmitter)));
    let queue = ScanQueue::start(config.scan_workers, worker);
    let reader = Arc::new(KubeWorkloadReader::new(client.clone()));
    let router = Arc::new(Router::new(
        reader,
        queue,
        transmitter,
        config.cluster_name.clone(),
    ));

    let orchestrator = WatchOrchestrator::new(client, router, &config);
    let scope = match &config.namespace {
        Some(namespace) => WatchScope::SingleNamespace(namespace.clone()),
        None => WatchScope::Cluster,
    };
    orchestrator.begin_watching(scope).await;

    info!("clusterscan running, press Ctrl+C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received, stopping");

    Ok(())
}
