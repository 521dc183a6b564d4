//! Node binary: opens persistent chain storage and serves the pool
//! protocol's TCP listener (§4.8), with an optional built-in solo-mining
//! loop for single-operator deployments.
//!
//! HTTP/RPC route wiring, P2P gossip transport, and config-file parsing are
//! external concerns (§1 Non-goals); this binary only composes the pieces
//! `solidus-node` exposes as a library.

use std::path::PathBuf;
use std::process;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use solidus_consensus::assemble_and_mine;
use solidus_core::constants::ChainParams;
use solidus_node::config::NodeConfig;
use solidus_node::rpc::{run_pool_server, PoolState};
use solidus_node::storage::RocksStore;
use tracing::{error, info, warn};

/// Proof-of-work node core: persistent storage, work/pool services, and an
/// optional built-in solo miner.
#[derive(Parser, Debug)]
#[command(name = "solidus-node", version, about = "Node core: storage, pool service, optional solo mining")]
struct Args {
    /// Root directory for persistent chain data.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Bind address for the pool service's line-delimited JSON protocol.
    #[arg(long, default_value = "127.0.0.1")]
    pool_bind: String,

    #[arg(long, default_value_t = solidus_node::config::DEFAULT_POOL_PORT)]
    pool_port: u16,

    /// Difficulty a pool share must meet to be accepted (independent of the
    /// block target).
    #[arg(long, default_value_t = 1)]
    share_difficulty: u64,

    /// Address to credit block rewards to when running the built-in solo
    /// miner. Omit to run storage and the pool service only, for external
    /// miners to mine against.
    #[arg(long)]
    mine_address: Option<String>,

    #[arg(long, default_value = "info")]
    log_level: String,

    /// "text" or "json".
    #[arg(long, default_value = "text")]
    log_format: String,
}

impl Args {
    fn into_config(self) -> NodeConfig {
        NodeConfig {
            data_dir: self.data_dir.unwrap_or_else(|| PathBuf::from("./solidus-data")),
            pool_bind: self.pool_bind,
            pool_port: self.pool_port,
            chain: ChainParams::default(),
            log_level: self.log_level,
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let mine_address = args.mine_address.clone();
    let share_difficulty = args.share_difficulty;
    let log_format = args.log_format.clone();
    let config = args.into_config();

    init_logging(&config.log_level, &log_format);

    info!(version = env!("CARGO_PKG_VERSION"), "solidus node starting");
    info!(data_dir = ?config.db_path(), "storage location");
    info!(pool_addr = %config.pool_addr(), "pool service bind");

    if let Err(e) = std::fs::create_dir_all(&config.data_dir) {
        error!(error = %e, "failed to create data_dir");
        process::exit(1);
    }

    let store = match RocksStore::open(&config.db_path(), config.chain.coinbase_maturity) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open chain storage");
            process::exit(1);
        }
    };

    let pool_addr = config.pool_addr();
    let state = Arc::new(PoolState::new(store, config.chain, share_difficulty));

    let pool_state = Arc::clone(&state);
    let pool_task = tokio::spawn(async move {
        if let Err(e) = run_pool_server(&pool_addr, pool_state).await {
            error!(error = %e, "pool server exited");
        }
    });

    let mining_task = mine_address.map(|addr| {
        let state = Arc::clone(&state);
        tokio::spawn(async move { run_solo_mining_loop(state, addr).await })
    });

    info!("solidus node running (Ctrl+C to stop)");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install Ctrl+C handler");
    info!("shutdown signal received");

    pool_task.abort();
    if let Some(task) = mining_task {
        task.abort();
    }
}

/// Repeatedly assemble a candidate block against the current tip and mine
/// it (§4.5.6). A failed attempt (no solution within the attempt cap) just
/// retries against whatever the tip is by then.
async fn run_solo_mining_loop(state: Arc<PoolState<RocksStore>>, miner_address: String) {
    let stop = AtomicBool::new(false);
    loop {
        let now_ms = wall_clock_ms();
        let result = {
            let mut store = state.store.lock();
            assemble_and_mine(&mut *store, &state.params, &miner_address, now_ms, &stop, &|| now_ms / 1000)
        };
        match result {
            Ok(mined) => {
                info!(height = mined.header.height, hash = %mined.header.hash, "mined block");
            }
            Err(e) => {
                warn!(error = %e, "mining attempt produced no solution, retrying");
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
        }
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Initialize the tracing subscriber. Pass `format = "json"` for structured
/// output suitable for log aggregation; anything else is human-readable text.
fn init_logging(level_str: &str, format: &str) {
    use tracing_subscriber::filter::EnvFilter;
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));

    if format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
