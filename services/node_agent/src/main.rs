//! mod_cluster Node Agent
//!
//! Announces a web container described by a topology file to mod_cluster
//! proxies, reports load on every status tick and follows topology edits.
//!
//! Architecture:
//! topology.toml → THIS AGENT → ContainerEvent stream → ModClusterService → httpd proxies

mod topology;

use anyhow::{Context, Result};
use clap::Parser;
use mcmp::{ContainerEvent, ModClusterService};
use modcluster_config::ModClusterConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pending container events before the producer waits
const EVENT_QUEUE: usize = 64;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "modcluster-agent")]
#[command(about = "Registers a web container with mod_cluster proxies")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Environment (development, staging, production)
    #[arg(short, long)]
    environment: Option<String>,

    /// Container topology file
    #[arg(short, long, default_value = "config/topology.toml")]
    topology: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "modcluster_agent=info,mcmp=info,warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting mod_cluster node agent");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ModClusterConfig::load(args.config.as_deref(), args.environment.as_deref())
        .context("Failed to load configuration")?;
    let mut server = topology::load(&args.topology)?;
    info!(engines = server.engines.len(), "Topology loaded");

    let service = Arc::new(ModClusterService::new(&config).context("Failed to create node service")?);
    let (events, receiver) = mpsc::channel(EVENT_QUEUE);
    let runner = tokio::spawn({
        let service = Arc::clone(&service);
        async move { service.run(receiver).await }
    });

    // A failed send means the service already stopped; its result says why
    let mut running = events.send(ContainerEvent::Init(server.clone())).await.is_ok()
        && events.send(ContainerEvent::Start(server.clone())).await.is_ok();

    let mut ticker = tokio::time::interval(config.service.status_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while running {
        tokio::select! {
            _ = ticker.tick() => {
                match topology::load(&args.topology) {
                    Ok(current) => {
                        for event in topology::diff(&server, &current) {
                            running &= events.send(event).await.is_ok();
                        }
                        server = current;
                    }
                    Err(e) => warn!("Keeping previous topology: {:#}", e),
                }
                running &= events.send(ContainerEvent::PeriodicTick).await.is_ok();
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for shutdown signal")?;
                info!("Shutdown signal received");
                let _ = events.send(ContainerEvent::Stop(server.clone())).await;
                let _ = events.send(ContainerEvent::Shutdown).await;
                break;
            }
        }
    }

    drop(events);
    runner
        .await
        .context("Node service task failed")?
        .context("Node service stopped with an error")?;

    info!("mod_cluster node agent stopped");
    Ok(())
}
