use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info};

use shardkv::protocol::CommandParser;
use shardkv::queue::{QueueService, TcpQueueService};
use shardkv::util::logging;
use shardkv::{CommandProcessor, Config, Dispatcher, OrderedMap};

/// Capacity of the channels between the queue service and the dispatcher
const PIPELINE_CAPACITY: usize = 64;

#[derive(Parser, Debug)]
#[command(name = "shardkv-server", version, about = "Sharded in-memory key-value service")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Number of processing workers, overrides the configuration
    #[arg(short, long)]
    workers: Option<usize>,

    /// Address the queue service listens on, overrides the configuration
    #[arg(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(workers) = args.workers {
        config.processing_workers_count = workers;
    }
    if let Some(address) = args.address {
        config.queue.address = address;
    }
    config.validate()?;

    logging::init(&config.log)?;

    info!("Starting ShardKV");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(queue = %config.queue.queue_name, "configuration loaded");

    let store = Arc::new(RwLock::new(OrderedMap::<String>::new()));
    let processor = Arc::new(CommandProcessor::new(CommandParser::new(), store));
    let dispatcher = Dispatcher::new(
        config.processing_workers_count,
        Arc::new(CommandParser::new()),
        processor,
    )?;
    info!("Worker pool size: {}", dispatcher.workers_count());

    let mut queue = TcpQueueService::new(config.queue.clone());
    queue
        .initialize()
        .await
        .with_context(|| format!("failed to start queue service on {}", config.queue.address))?;

    let (requests_tx, requests_rx) = mpsc::channel(PIPELINE_CAPACITY);
    let (replies_tx, replies_rx) = mpsc::channel(PIPELINE_CAPACITY);
    queue.run(requests_tx, replies_rx).await?;

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    dispatcher.run(requests_rx, replies_tx, shutdown).await?;

    queue.close().await?;
    info!("ShardKV stopped");
    Ok(())
}
