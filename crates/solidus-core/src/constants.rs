//! Chain parameters.
//!
//! These are compile-time defaults for a reference deployment. Parsing them
//! from an external configuration file is outside this crate's concern; a
//! host process wires up [`ChainParams`] however it sees fit and passes it
//! down to the consensus and node layers.

use serde::{Deserialize, Serialize};

/// Height below which difficulty is pinned to 1 and blocks may only contain
/// a coinbase transaction.
pub const BOOTSTRAP_HEIGHT: u32 = 200;

/// Number of blocks a coinbase output must age before it is spendable.
pub const COINBASE_MATURITY: u64 = 10;

/// Cap on non-coinbase transactions considered per block.
pub const TXS_PER_BLOCK_CAP: usize = 200;

/// Rolling window (in headers) used for difficulty retargeting.
pub const RETARGET_WINDOW: usize = 30;

/// Clamp applied to the retarget ratio each period.
pub const RETARGET_CLAMP_LOW: f64 = 0.85;
pub const RETARGET_CLAMP_HIGH: f64 = 1.15;

/// Global difficulty bounds.
pub const DIFFICULTY_MIN: u64 = 1;
pub const DIFFICULTY_MAX: u64 = 500;

/// Vout space reserved for synthetic change outputs created mid-assembly,
/// before the real block hash is known.
pub const CHANGE_VOUT_BASE: u32 = 10_000_000;

/// Nonce iteration cap for a single mining invocation.
pub const MAX_MINING_ATTEMPTS: u64 = 5_000_000;

/// Iterations between cooperative cancellation checks / timestamp refresh
/// in the mining inner loop.
pub const MINING_CHECK_INTERVAL: u64 = 5_000;

/// Bounded-backoff retry policy for persistence writer contention.
pub const STORE_RETRY_INITIAL_DELAY_MS: u64 = 25;
pub const STORE_RETRY_FACTOR: f64 = 1.7;
pub const STORE_RETRY_CAP_MS: u64 = 300;
pub const STORE_RETRY_MAX_ATTEMPTS: u32 = 8;

/// Chain-wide tunables threaded through consensus, work, pool and fairness
/// modules. Mirrors the parameter table a deployment is expected to supply;
/// `Default` reproduces the reference deployment's values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainParams {
    pub block_version: u32,
    pub target_block_time_sec: u64,
    pub initial_block_reward: f64,
    pub halving_interval_blocks: u64,
    pub argon2_time_cost: u32,
    pub argon2_memory_mib: u32,
    pub argon2_parallelism: u32,
    pub coinbase_maturity: u64,
    pub txs_per_block_cap: usize,
    pub mempool_min_fee: f64,
    pub bootstrap_coinbase_only_below_height: u32,
    pub difficulty_initial: u64,
    pub difficulty_min: u64,
    pub difficulty_max: u64,
    pub retarget_window: usize,
    pub retarget_clamp: (f64, f64),
    pub fairness_pool_ratio: f64,
    pub fairness_epoch_length_main: u64,
    pub fairness_epoch_length_dev: u64,
    pub work_job_ttl_ms: u64,
    pub ticket_window_ms: u64,
    pub ticket_nonce_window_pow2: u32,
    pub ticket_near_target_shift: u32,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            block_version: 1,
            target_block_time_sec: 60,
            initial_block_reward: 50.0,
            halving_interval_blocks: 210_000,
            argon2_time_cost: 2,
            argon2_memory_mib: 64,
            argon2_parallelism: 1,
            coinbase_maturity: COINBASE_MATURITY,
            txs_per_block_cap: TXS_PER_BLOCK_CAP,
            mempool_min_fee: 1e-5,
            bootstrap_coinbase_only_below_height: BOOTSTRAP_HEIGHT,
            difficulty_initial: 1,
            difficulty_min: DIFFICULTY_MIN,
            difficulty_max: DIFFICULTY_MAX,
            retarget_window: RETARGET_WINDOW,
            retarget_clamp: (RETARGET_CLAMP_LOW, RETARGET_CLAMP_HIGH),
            fairness_pool_ratio: 0.30,
            fairness_epoch_length_main: 100,
            fairness_epoch_length_dev: 20,
            work_job_ttl_ms: 300_000,
            ticket_window_ms: 4_000,
            ticket_nonce_window_pow2: 21,
            ticket_near_target_shift: 12,
        }
    }
}

impl ChainParams {
    /// A deployment with short epochs, used by local/dev networks and by
    /// most of this crate's tests.
    pub fn dev() -> Self {
        Self {
            fairness_epoch_length_main: 20,
            ..Self::default()
        }
    }

    pub fn ticket_nonce_window(&self) -> u32 {
        1u32 << self.ticket_nonce_window_pow2
    }
}
