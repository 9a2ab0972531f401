//! Lode full node binary.
//!
//! Opens the node database, then either runs the work loop until Ctrl+C or
//! performs a one-shot maintenance command (status, local mining, snapshot
//! export and import).

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lode_core::crypto::KeyPair;
use lode_core::types::PeerId;
use lode_node_lib::{BootstrapBundle, LogFormat, Node, NodeConfig, NodeEvent};
use lode_processor::{mine_header, DataStatus};

/// Lode ledger node.
#[derive(Parser, Debug)]
#[command(name = "lode-node", version, about = "Lode ledger node with RocksDB storage")]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format ("text" or "json")
    #[arg(long)]
    log_format: Option<String>,

    /// Coinbase secret key as 64 hex characters
    #[arg(long)]
    coinbase_key: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the work loop until Ctrl+C
    Run {
        /// Seconds between missing-data scans
        #[arg(long, default_value_t = 10)]
        congestion_interval: u64,
    },
    /// Print node status as JSON
    Status,
    /// Generate, mine and apply blocks locally
    Mine {
        #[arg(long, default_value_t = 1)]
        blocks: u64,
        /// Give up on a block after this many nonces
        #[arg(long, default_value_t = u64::MAX)]
        max_nonce: u64,
    },
    /// Write the active headers and a snapshot of the live state
    Export {
        #[arg(long)]
        out: PathBuf,
    },
    /// Bootstrap an empty node from an exported bundle
    Import {
        #[arg(long)]
        file: PathBuf,
    },
}

impl Args {
    fn load_config(&self) -> Result<NodeConfig> {
        let mut config = NodeConfig::load(self.config.as_deref()).context("loading configuration")?;
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        match self.log_format.as_deref() {
            None => {}
            Some("json") => config.log_format = LogFormat::Json,
            Some("text") => config.log_format = LogFormat::Text,
            Some(other) => bail!("unknown log format: {other}"),
        }
        Ok(config)
    }

    fn coinbase_key(&self) -> Result<Option<KeyPair>> {
        let Some(encoded) = &self.coinbase_key else {
            return Ok(None);
        };
        let bytes: [u8; 32] = hex::decode(encoded)
            .context("coinbase key is not hex")?
            .try_into()
            .map_err(|_| anyhow::anyhow!("coinbase key must be 32 bytes"))?;
        Ok(Some(KeyPair::from_secret_bytes(bytes)))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = args.load_config()?;
    init_logging(&config.log_level, config.log_format);

    info!("Lode node v{}", env!("CARGO_PKG_VERSION"));
    info!("data_dir: {:?}", config.data_dir);

    let key = args.coinbase_key()?;
    let (node, events) = Node::open(config, key).context("opening node")?;

    match args.command {
        Command::Run { congestion_interval } => run(node, events, congestion_interval).await,
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&node.status()?)?);
            Ok(())
        }
        Command::Mine { blocks, max_nonce } => mine(&node, blocks, max_nonce),
        Command::Export { out } => {
            let bundle = node.export_bundle()?;
            bundle.write_to(&out)?;
            info!(headers = bundle.headers.len(), path = ?out, "bundle written");
            Ok(())
        }
        Command::Import { file } => {
            let bundle = BootstrapBundle::read_from(&file)?;
            match node.import_bundle(&bundle)? {
                DataStatus::Accepted => {
                    info!(tip = %bundle.macroblock.tip, "bundle imported");
                    Ok(())
                }
                status => bail!("bundle not imported: {status:?}"),
            }
        }
    }
}

async fn run(
    node: std::sync::Arc<Node>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<NodeEvent>,
    congestion_interval: u64,
) -> Result<()> {
    // The network layer feeds `work_tx`; the worker exits once it is dropped.
    let (work_tx, worker) = node.spawn_worker();
    let mut ticker = tokio::time::interval(Duration::from_secs(congestion_interval.max(1)));

    info!("Lode node running (Ctrl+C to stop)");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                let requests = node.enum_congestions()?;
                if !requests.is_empty() {
                    info!(count = requests.len(), "missing data outstanding");
                }
            }
            Some(event) = events.recv() => match event {
                NodeEvent::NewState { tip } => info!(%tip, "new tip"),
                NodeEvent::DataRequested(request) => {
                    info!(id = %request.id, want_body = request.want_body, "data requested");
                }
                NodeEvent::PeerInsane(peer) => warn!(%peer, "peer supplied invalid data"),
                NodeEvent::Corrupted(reason) => bail!("node state corrupted: {reason}"),
            },
        }
    }

    drop(work_tx);
    worker.await?;
    info!("Lode node shutdown complete");
    Ok(())
}

fn mine(node: &Node, blocks: u64, max_nonce: u64) -> Result<()> {
    for _ in 0..blocks {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let mut block = node.generate_block(now)?;
        if !mine_header(&mut block.header, max_nonce) {
            bail!("no nonce found up to {max_nonce}");
        }
        let id = block.header.id();
        let bytes = block.body.encode()?;
        node.process_header(block.header, false, PeerId::default())?;
        match node.process_block(&id, &bytes, PeerId::default())? {
            DataStatus::Accepted => info!(%id, fees = block.fees, "block mined"),
            status => bail!("mined block {id} not accepted: {status:?}"),
        }
    }
    Ok(())
}

/// Initialize tracing subscriber with the given log level and output format.
///
/// `RUST_LOG`, when set, takes precedence over the configured level.
fn init_logging(level_str: &str, format: LogFormat) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_str));

    match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init(),
    }
}
