//! Standalone miner: speaks the pool service's line-delimited JSON protocol
//! (§4.8) over a plain TCP connection, brute-forces nonces against whatever
//! job the pool hands back, and submits shares/blocks as it finds them.
//!
//! The miner never needs the server's chain parameters: every field it must
//! reproduce bit-for-bit (prev_hash, target, the canonical txid list, and
//! therefore the merkle root) rides along in the job template, keyed only
//! off height and the already bootstrap-filtered txid snapshot (§9: the
//! coinbase never embeds the miner's address, so no RPC round trip is
//! needed to learn it).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{error, info, warn};

use solidus_core::hash;
use solidus_core::header;
use solidus_core::types::{Bytes32, Hash256};
use solidus_node::rpc::{JobTemplate, PoolClientMessage, PoolServerMessage};

#[derive(Parser, Debug)]
#[command(name = "solidus-miner", about = "Standalone pool-protocol miner")]
struct Args {
    /// Pool service address, e.g. 127.0.0.1:3333.
    #[arg(long, default_value = "127.0.0.1:3333")]
    pool_addr: String,

    /// Address to receive pool-credited shares and any block reward.
    #[arg(long)]
    mining_address: String,

    /// Argon2id time cost, must match the node's chain parameters.
    #[arg(long, default_value_t = 2)]
    argon2_time_cost: u32,

    /// Argon2id memory cost in MiB, must match the node's chain parameters.
    #[arg(long, default_value_t = 19)]
    argon2_memory_mib: u32,

    /// Argon2id parallelism, must match the node's chain parameters.
    #[arg(long, default_value_t = 1)]
    argon2_parallelism: u32,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Clone)]
struct CurrentJob {
    job_id: String,
    template: JobTemplate,
}

struct MiningStats {
    hashes: AtomicU64,
    shares: AtomicU64,
    blocks: AtomicU64,
    start: Instant,
}

impl MiningStats {
    fn new() -> Self {
        Self {
            hashes: AtomicU64::new(0),
            shares: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
            start: Instant::now(),
        }
    }

    fn hashrate(&self) -> f64 {
        let elapsed = self.start.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.hashes.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }
}

/// Reconstruct the exact header bytes the pool will verify: canonical txid
/// order (the snapshot already reflects the bootstrap cutoff, so passing `0`
/// here never re-applies it), then the merkle root over that order.
fn build_header_bytes(template: &JobTemplate, miner_address: &str, nonce: u64) -> Option<(Vec<u8>, Hash256, Bytes32)> {
    let prev_hash = Hash256::from_hex(&template.prev_hash)?;
    let target = Bytes32::from_hex(&template.target)?;
    let txids: Vec<Hash256> = template
        .txids
        .iter()
        .map(|s| Hash256::from_hex(s))
        .collect::<Option<Vec<_>>>()?;
    let coinbase_txid = header::coinbase_txid(template.height);
    let ordered = header::canonical_txids(template.height, coinbase_txid, &txids, 0);
    let merkle_root = solidus_core::merkle::merkle_root(&ordered);

    let bytes = header::header_serialize(
        template.version,
        &prev_hash,
        &merkle_root,
        template.timestamp,
        &target,
        nonce,
        miner_address,
        template.tx_count,
    );
    Some((bytes, prev_hash, target))
}

async fn mining_loop(
    job_slot: Arc<Mutex<Option<CurrentJob>>>,
    outbox: tokio::sync::mpsc::UnboundedSender<PoolClientMessage>,
    address: String,
    args: Arc<Args>,
    stats: Arc<MiningStats>,
) {
    let mut nonce: u64 = 0;
    let mut last_job_id = String::new();

    loop {
        let job = job_slot.lock().clone();
        let Some(job) = job else {
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        };
        if job.job_id != last_job_id {
            last_job_id = job.job_id.clone();
            nonce = 0;
        }

        let Some((header_bytes, prev_hash, _target)) = build_header_bytes(&job.template, &address, nonce) else {
            warn!("job template failed to decode, waiting for the next one");
            tokio::time::sleep(Duration::from_millis(200)).await;
            continue;
        };

        let digest = hash::pow_digest(
            &header_bytes,
            nonce,
            &prev_hash,
            args.argon2_time_cost,
            args.argon2_memory_mib,
            args.argon2_parallelism,
        );
        stats.hashes.fetch_add(1, Ordering::Relaxed);

        let pool_target = Bytes32::from_hex(&job.template.target).unwrap_or(Bytes32::ZERO);
        if hash::meets_target(&digest, &pool_target) {
            let ordered_txids: Vec<Hash256> = job
                .template
                .txids
                .iter()
                .filter_map(|s| Hash256::from_hex(s))
                .collect();
            let coinbase_txid = header::coinbase_txid(job.template.height);
            let ordered = header::canonical_txids(job.template.height, coinbase_txid, &ordered_txids, 0);
            let merkle_root = solidus_core::merkle::merkle_root(&ordered);

            stats.shares.fetch_add(1, Ordering::Relaxed);
            info!(nonce, job_id = %job.job_id, "submitting share");
            let _ = outbox.send(PoolClientMessage::Submit {
                address: address.clone(),
                job_id: job.job_id.clone(),
                nonce,
                timestamp: job.template.timestamp,
                merkle_root_hex: merkle_root.to_hex(),
                version: job.template.version,
                prev_hash_hex: Some(job.template.prev_hash.clone()),
            });
        }

        nonce = nonce.wrapping_add(1);
        if nonce % 4096 == 0 {
            tokio::task::yield_now().await;
        }
    }
}

async fn stats_logger(stats: Arc<MiningStats>) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        info!(
            hashrate = format!("{:.2} H/s", stats.hashrate()),
            shares = stats.shares.load(Ordering::Relaxed),
            blocks = stats.blocks.load(Ordering::Relaxed),
            "mining stats"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arc::new(Args::parse());
    init_logging(&args.log_level);

    info!(pool_addr = %args.pool_addr, "connecting to pool");
    let socket = TcpStream::connect(&args.pool_addr)
        .await
        .with_context(|| format!("failed to connect to pool at {}", args.pool_addr))?;
    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let job_slot: Arc<Mutex<Option<CurrentJob>>> = Arc::new(Mutex::new(None));
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PoolClientMessage>();

    // Writer task: serializes outgoing messages onto the socket one line at a time.
    let writer_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let mut encoded = serde_json::to_vec(&msg).expect("pool client message always serializes");
            encoded.push(b'\n');
            if write_half.write_all(&encoded).await.is_err() {
                break;
            }
        }
    });

    tx.send(PoolClientMessage::Subscribe).ok();

    let stats = Arc::new(MiningStats::new());
    let mining_job_slot = Arc::clone(&job_slot);
    let mining_tx = tx.clone();
    let mining_address = args.mining_address.clone();
    let mining_args = Arc::clone(&args);
    let mining_stats = Arc::clone(&stats);
    let mining_task = tokio::spawn(mining_loop(
        mining_job_slot,
        mining_tx,
        mining_address,
        mining_args,
        mining_stats,
    ));
    tokio::spawn(stats_logger(Arc::clone(&stats)));

    info!("reader loop starting, waiting for jobs");
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let msg: PoolServerMessage = match serde_json::from_str(&line) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "unparseable pool message, skipping");
                continue;
            }
        };
        match msg {
            PoolServerMessage::Subscribed { session_id } => {
                info!(session_id, "subscribed");
                tx.send(PoolClientMessage::Authorize {
                    address: args.mining_address.clone(),
                })
                .ok();
            }
            PoolServerMessage::Authorized { ok } => {
                if ok {
                    info!("authorized, mining starts");
                } else {
                    error!("pool rejected authorization");
                }
            }
            PoolServerMessage::Job { job_id, template, pool_target, share_diff } | PoolServerMessage::Notify { job_id, template, pool_target, share_diff } => {
                info!(job_id, height = template.height, pool_target, share_diff, "new job");
                *job_slot.lock() = Some(CurrentJob { job_id, template });
            }
            PoolServerMessage::SubmitOk => {
                info!("share accepted");
            }
            PoolServerMessage::SubmitErr { error } => {
                warn!(error, "share rejected");
            }
        }
    }

    warn!("pool connection closed");
    mining_task.abort();
    writer_task.abort();
    Ok(())
}

fn init_logging(level_str: &str) {
    use tracing_subscriber::filter::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level_str));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
