mod sim;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use networking::sync::{SyncSession, SyncSettings};
use tracing::{error, info};

#[derive(Parser, Debug)]
struct Args {
    /// Number of concurrent sync peer slots.
    #[arg(short, long)]
    peers: Option<usize>,

    /// Length of the simulated chain to download.
    #[arg(short, long, default_value_t = 500)]
    blocks: usize,

    /// Simulated per-block delivery delay in milliseconds.
    #[arg(short, long, default_value_t = 2)]
    delay_ms: u64,

    /// Transactions per simulated block.
    #[arg(short, long, default_value_t = 4)]
    transactions: usize,

    /// YAML file with sync settings.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let mut settings: SyncSettings = match &args.config {
        Some(path) => serde_yaml::from_str(&std::fs::read_to_string(path)?)?,
        None => SyncSettings::default(),
    };

    if let Some(peers) = args.peers {
        settings.sync_peers = peers;
    }

    let blocks = sim::generate_chain(args.blocks + 1, args.transactions);
    let needed: Vec<_> = blocks[1..].iter().map(|block| block.hash()).collect();

    let chain = Arc::new(sim::SimChain::new(&blocks[0]));
    let connector = Arc::new(sim::SimConnector::new(
        blocks,
        Duration::from_millis(args.delay_ms),
    ));

    info!(
        blocks = needed.len(),
        peers = settings.sync_peers,
        "Starting simulated block sync"
    );

    let session = SyncSession::new(chain.clone(), connector, settings, needed);
    let started = Instant::now();

    match session.run().await {
        Ok(()) => {
            info!(
                height = chain.height(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Sync completed"
            );
            Ok(())
        }
        Err(err) => {
            error!(%err, "Sync failed");
            std::process::exit(1);
        }
    }
}
