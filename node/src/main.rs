use anyhow::Context;
use bully_cluster::{ClusterConfig, NodeManager};
use bully_common::read_roster;
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Bully leader election simulator", long_about = None)]
struct Args {
    /// Roster file: one `<id> <host> <port>` line per participant
    roster: PathBuf,

    /// Optional configuration file (TOML, YAML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = ClusterConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let roster = read_roster(&args.roster)
        .with_context(|| format!("Failed to read roster {}", args.roster.display()))?;

    info!(
        "Starting {} participants (heartbeat {:?}, lifetime {:?})",
        roster.len(),
        config.heartbeat_interval(),
        config.coordinator_lifetime()
    );

    let mut manager = NodeManager::new(config);
    let handle = manager.handle();
    let mut traces = handle.subscribe();
    manager.boot(roster)?;

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                handle.shutdown();
            }
        });
    }

    let supervisor = manager.run();
    tokio::pin!(supervisor);

    let result = loop {
        tokio::select! {
            result = &mut supervisor => break result,
            trace = traces.recv() => match trace {
                Ok(trace) => println!("{}", trace),
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} protocol traces", skipped),
                Err(RecvError::Closed) => {}
            },
        }
    };

    while let Ok(trace) = traces.try_recv() {
        println!("{}", trace);
    }

    if let Err(e) = &result {
        error!("Supervisor stopped with error: {}", e);
    }
    let stats = handle.stats();
    info!(
        "Cluster stopped: {} active, {} terminated",
        stats.active_nodes, stats.terminated_nodes
    );

    result.map_err(Into::into)
}
