//! HPA shipper
//!
//! Periodically samples every HorizontalPodAutoscaler in the cluster and
//! ships one metricbeat-style event per autoscaler to Logstash.

use agent_lib::{
    cluster::{self, KubeClusterStatus},
    collector::CollectorBuilder,
    config::{AppConfig, LogFormat},
    health::{components, HealthRegistry},
    output::{LumberjackConfig, LumberjackConnector, OutputPool},
    StructuredLogger,
};
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(windows)]
const DEFAULT_CONFIG_PATH: &str = "hpa-shipper.yml";
#[cfg(not(windows))]
const DEFAULT_CONFIG_PATH: &str = "/etc/hpa-shipper/hpa-shipper.yml";

/// Ships Kubernetes HorizontalPodAutoscaler status to Logstash
#[derive(Parser)]
#[command(name = "hpa-shipper")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the YAML config file
    #[arg(long, short, env = "HPA_SHIPPER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Show verbose debug log
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(config: &AppConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log.level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match config.log.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Text => registry.with(fmt::layer()).init(),
    }
}

/// Resolve when SIGINT or SIGTERM arrives
async fn wait_for_signal() -> Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result?;
                Ok("SIGINT received")
            }
            _ = terminate.recv() => Ok("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("SIGINT received")
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    init_tracing(&config, cli.verbose);
    info!(config = %cli.config.display(), "Starting hpa-shipper");

    let client = cluster::connect(&config.kubernetes).await?;
    let cluster = Arc::new(KubeClusterStatus::new(client, config.kubernetes.api_version));

    let health = HealthRegistry::new();
    health.register(components::COLLECTOR).await;
    health.register(components::CLUSTER).await;

    let hosts = config.output.logstash.hosts.clone();
    let mut builder = CollectorBuilder::new()
        .cluster(cluster)
        .period(config.metric.period)
        .node_name(config.node_name().map(str::to_string))
        .version(AGENT_VERSION)
        .health(health.clone());

    if !hosts.is_empty() {
        health.register(components::OUTPUT).await;
        let connector = LumberjackConnector::new(LumberjackConfig {
            connect_timeout: config.output.connect_timeout,
            send_timeout: config.output.send_timeout,
            compression_level: config.output.compression_level,
        });
        let pool = OutputPool::new(hosts.clone(), Arc::new(connector))
            .with_retry_on_send_failure(config.output.retry_on_send_failure);
        builder = builder.pool(Arc::new(pool));
    } else {
        info!("No output hosts configured, events will only be logged");
    }

    let collector = builder.build()?;

    let logger = StructuredLogger::new(
        config
            .node_name()
            .map(str::to_string)
            .unwrap_or_else(agent_lib::transform::local_hostname),
    );
    logger.log_startup(AGENT_VERSION, config.metric.period, hosts.len());

    if config.health.port != 0 {
        let state = Arc::new(api::AppState::new(health.clone()));
        let port = config.health.port;
        tokio::spawn(async move {
            if let Err(e) = api::serve(port, state).await {
                tracing::error!(error = %e, "Health server failed");
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_logger = logger.clone();
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(reason) => signal_logger.log_shutdown(reason),
            Err(e) => tracing::error!(error = %e, "Failed to listen for signals"),
        }
        let _ = shutdown_tx.send(());
    });

    health.set_ready(true).await;
    collector.run(shutdown_rx).await;

    info!("Shut down");
    Ok(())
}
