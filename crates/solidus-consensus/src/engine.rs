//! Block assembly, PoW mining, and external header acceptance (§4.5.6, §4.5.7).
//!
//! This module holds the two state-changing operations a node performs
//! against a [`Store`]: producing a new block locally from the mempool
//! ([`assemble_and_mine`]) and accepting a header proposed by an external
//! miner, pool, or ticketed solo session ([`accept_external_header`]). Both
//! share the same candidate-selection and coin-reservation logic
//! ([`build_assembly`]), since assembly and re-validation on acceptance must
//! agree bit-for-bit on which mempool entries make it into a block.

use std::sync::atomic::{AtomicBool, Ordering};

use solidus_core::chain_state::{BlockAppendPlan, FairnessPayout, Store};
use solidus_core::constants::ChainParams;
use solidus_core::difficulty::{self, RetargetHeader};
use solidus_core::error::{AcceptanceError, AssemblyError, ChainStateError};
use solidus_core::fairness;
use solidus_core::hash::{self, biguint_to_bytes32, bytes32_to_biguint};
use solidus_core::header::{self, GENESIS_PREV_HASH};
use solidus_core::mempool;
use solidus_core::merkle;
use solidus_core::reward;
use solidus_core::types::{
    amount_to_sats, Bytes32, BlockHeader, Hash256, MempoolEntry, OutPoint, Reward, Utxo,
};

/// Errors that can surface while assembling/mining or accepting a block,
/// aggregating the per-stage taxonomies from `solidus-core` (§7).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Acceptance(#[from] AcceptanceError),
    #[error(transparent)]
    ChainState(#[from] ChainStateError),
}

/// Outcome of locally assembling and mining a block (§4.5.6).
#[derive(Debug, Clone)]
pub struct MinedBlock {
    pub header: BlockHeader,
    pub txids: Vec<Hash256>,
    pub fee_total_sats: u64,
    pub fairness_payouts: Vec<FairnessPayout>,
}

/// What an external miner, pool, or ticketed session hands back for
/// acceptance (§4.5.7). `target` is deliberately absent: it is recomputed
/// from chain state, never trusted from the submitter.
#[derive(Debug, Clone)]
pub struct ExternalHeaderSubmission {
    pub prev_hash: Hash256,
    pub version: u32,
    pub timestamp: u64,
    pub nonce: u64,
    pub miner_address: String,
    pub merkle_root: Hash256,
    pub txids_snapshot: Vec<Hash256>,
}

/// Outcome of accepting an externally-mined header (§4.5.7).
#[derive(Debug, Clone)]
pub struct AcceptedHeader {
    pub header: BlockHeader,
    pub txids: Vec<Hash256>,
    /// `0` when this call was a no-op against an already-stored hash
    /// (idempotent re-submission).
    pub finder_reward_sats: u64,
    pub fairness_payouts: Vec<FairnessPayout>,
    /// `true` if the submitted hash already existed and nothing was written.
    pub already_accepted: bool,
}

/// Coin reservations produced by running candidate mempool entries through
/// greedy coin selection (§4.5.6 step 3). Outputs carry a placeholder txid
/// (the block hash, not yet known) and are renamed once mining succeeds.
struct Assembly {
    spends: Vec<OutPoint>,
    new_utxos: Vec<Utxo>,
    included_txids: Vec<Hash256>,
    fee_total_sats: u64,
}

/// Run each candidate through greedy coin selection against its declared
/// sender, in order, skipping any whose sender lacks sufficient spendable
/// balance once earlier candidates in this session have tentatively
/// claimed their inputs. Recipient and change outputs are reserved under a
/// placeholder txid with block-scoped, non-overlapping vout ranges; the
/// caller rewrites the txid to the real block hash once mining succeeds.
fn build_assembly(store: &dyn Store, candidates: &[MempoolEntry]) -> Assembly {
    let mut exclude = std::collections::HashSet::new();
    let mut spends = Vec::new();
    let mut new_utxos = Vec::new();
    let mut included_txids = Vec::new();
    let mut fee_total_sats = 0u64;
    let mut out_vout = 0u32;
    let mut change_vout = solidus_core::constants::CHANGE_VOUT_BASE;

    for candidate in candidates {
        let need_sats = match candidate.amount_sats.checked_add(candidate.fee_sats) {
            Some(n) => n,
            None => continue,
        };
        let selected = match store.select_inputs(&candidate.from_addr, need_sats, &exclude) {
            Ok(s) => s,
            Err(_) => continue,
        };

        for utxo in &selected.inputs {
            let outpoint = utxo.outpoint();
            exclude.insert(outpoint);
            spends.push(outpoint);
        }

        new_utxos.push(Utxo {
            txid: Hash256::ZERO,
            vout: out_vout,
            address: candidate.to_addr.clone(),
            amount_sats: candidate.amount_sats,
            spent: false,
            spent_by_txid: None,
            is_coinbase: false,
            created_height: 0,
        });
        out_vout += 1;

        let change_sats = selected.total_in_sats - need_sats;
        if change_sats > 0 {
            new_utxos.push(Utxo {
                txid: Hash256::ZERO,
                vout: change_vout,
                address: candidate.from_addr.clone(),
                amount_sats: change_sats,
                spent: false,
                spent_by_txid: None,
                is_coinbase: false,
                created_height: 0,
            });
            change_vout += 1;
        }

        fee_total_sats = fee_total_sats.saturating_add(candidate.fee_sats);
        included_txids.push(candidate.txid);
    }

    Assembly {
        spends,
        new_utxos,
        included_txids,
        fee_total_sats,
    }
}

/// The difficulty and target for the block at `next_height`, from up to
/// `retarget_window` immediately preceding headers (§4.5.4).
fn compute_target(store: &dyn Store, next_height: u32, params: &ChainParams) -> (u64, Bytes32) {
    let ancestors: Vec<RetargetHeader> = store
        .recent_headers(params.retarget_window)
        .into_iter()
        .map(|h| RetargetHeader {
            timestamp: h.timestamp,
            cumulative_work: h.cumulative_work,
        })
        .collect();
    let diff = difficulty::next_difficulty(
        next_height,
        &ancestors,
        params.bootstrap_coinbase_only_below_height,
        params.target_block_time_sec,
        params.difficulty_initial,
        params.difficulty_min,
        params.difficulty_max,
        params.retarget_window,
        params.retarget_clamp,
    );
    (diff, hash::target_from_difficulty(diff))
}

/// `prev_cumulative_work + max(1, diff)`, as a 256-bit big-endian integer.
fn add_work(prev: &Bytes32, diff: u64) -> Bytes32 {
    let sum = bytes32_to_biguint(prev) + num_bigint::BigUint::from(diff.max(1));
    biguint_to_bytes32(&sum)
}

/// Iterate nonces until the PoW digest meets `target` or the attempt cap is
/// exhausted (§4.5.6 step 5, §5 cancellation). Refreshes `timestamp` to the
/// wall clock every [`solidus_core::constants::MINING_CHECK_INTERVAL`]
/// iterations and checks `stop` on the same cadence.
#[allow(clippy::too_many_arguments)]
fn mine_header(
    version: u32,
    prev_hash: &Hash256,
    merkle_root: &Hash256,
    mut timestamp: u64,
    target: &Bytes32,
    miner_address: &str,
    tx_count: u32,
    params: &ChainParams,
    stop: &AtomicBool,
    wall_clock_secs: &dyn Fn() -> u64,
) -> Option<(u64, u64, Hash256)> {
    let mut nonce = 0u64;
    while nonce < solidus_core::constants::MAX_MINING_ATTEMPTS {
        if nonce % solidus_core::constants::MINING_CHECK_INTERVAL == 0 {
            if stop.load(Ordering::Relaxed) {
                return None;
            }
            if nonce > 0 {
                timestamp = timestamp.max(wall_clock_secs());
            }
        }
        let bytes = header::header_serialize(
            version,
            prev_hash,
            merkle_root,
            timestamp,
            target,
            nonce,
            miner_address,
            tx_count,
        );
        let digest = hash::pow_digest(
            &bytes,
            nonce,
            prev_hash,
            params.argon2_time_cost,
            params.argon2_memory_mib,
            params.argon2_parallelism,
        );
        if hash::meets_target(&digest, target) {
            let block_hash = header::header_hash(
                version,
                prev_hash,
                merkle_root,
                timestamp,
                target,
                nonce,
                miner_address,
                tx_count,
            );
            return Some((nonce, timestamp, block_hash));
        }
        nonce += 1;
    }
    None
}

/// After appending a block at `new_height`, ensure the epoch it falls in is
/// recorded and settle the previous epoch if this append crossed a boundary
/// (§4.7).
fn settle_fairness(
    store: &mut dyn Store,
    new_height: u64,
    params: &ChainParams,
    now_ms: u64,
) -> Result<Vec<FairnessPayout>, ChainStateError> {
    fairness::ensure_epoch(
        store,
        new_height,
        params.fairness_epoch_length_main,
        params.fairness_pool_ratio,
    );
    let payouts = fairness::settle_previous_epoch(
        store,
        new_height,
        params.fairness_epoch_length_main,
        params.initial_block_reward,
        params.halving_interval_blocks,
        now_ms,
    );
    if !payouts.is_empty() {
        let (epoch_start, _) =
            fairness::epoch_bounds(new_height - 1, params.fairness_epoch_length_main);
        store.settle_epoch(epoch_start, payouts.clone())?;
    }
    Ok(payouts)
}

/// Assemble and mine a block on top of the current tip, awarding the full
/// reward and fees to `miner_address` (§4.5.6). No pool-ratio withholding
/// applies to locally-mined blocks; that split is specific to externally
/// accepted work (§4.5.7).
pub fn assemble_and_mine(
    store: &mut dyn Store,
    params: &ChainParams,
    miner_address: &str,
    now_ms: u64,
    stop: &AtomicBool,
    wall_clock_secs: &dyn Fn() -> u64,
) -> Result<MinedBlock, EngineError> {
    let (tip_height, tip_hash) = store.tip();
    let is_genesis = store.is_empty();
    let next_height: u32 = if is_genesis { 0 } else { tip_height + 1 };
    let prev_hash = if is_genesis { GENESIS_PREV_HASH } else { tip_hash };
    let prev_work = if is_genesis {
        Bytes32::ZERO
    } else {
        store
            .get_header(&tip_hash)
            .map(|h| h.cumulative_work)
            .unwrap_or(Bytes32::ZERO)
    };

    let coinbase_txid = header::coinbase_txid(next_height);
    let (diff, target) = compute_target(store, next_height, params);

    let min_fee_sats = amount_to_sats(params.mempool_min_fee).unwrap_or(0);
    let candidates: Vec<MempoolEntry> =
        if next_height < params.bootstrap_coinbase_only_below_height {
            Vec::new()
        } else {
            mempool::query(store, None)
                .into_iter()
                .filter(|e| e.amount_sats > 0 && e.fee_sats >= min_fee_sats)
                .take(params.txs_per_block_cap)
                .collect()
        };

    let assembly = build_assembly(store, &candidates);

    let txids = header::canonical_txids(
        next_height,
        coinbase_txid,
        &assembly.included_txids,
        params.bootstrap_coinbase_only_below_height,
    );
    let merkle_root = merkle::merkle_root(&txids);
    let tx_count = txids.len() as u32;
    let timestamp = now_ms / 1000;

    let (nonce, timestamp, block_hash) = mine_header(
        params.block_version,
        &prev_hash,
        &merkle_root,
        timestamp,
        &target,
        miner_address,
        tx_count,
        params,
        stop,
        wall_clock_secs,
    )
    .ok_or(AssemblyError::NoSolution)?;

    let cumulative_work = add_work(&prev_work, diff);
    let header = BlockHeader {
        height: next_height,
        hash: block_hash,
        prev_hash,
        merkle_root,
        timestamp,
        version: params.block_version,
        nonce,
        target,
        miner_address: miner_address.to_string(),
        tx_count,
        cumulative_work,
    };

    let reward_coins = reward::block_reward(
        next_height as u64,
        params.initial_block_reward,
        params.halving_interval_blocks,
    );
    let reward_sats = amount_to_sats(reward_coins)
        .unwrap_or(0)
        .saturating_add(assembly.fee_total_sats);

    let mut new_utxos = assembly.new_utxos;
    for utxo in new_utxos.iter_mut() {
        utxo.txid = block_hash;
        utxo.created_height = next_height as u64;
    }
    new_utxos.push(Utxo {
        txid: coinbase_txid,
        vout: 0,
        address: miner_address.to_string(),
        amount_sats: reward_sats,
        spent: false,
        spent_by_txid: None,
        is_coinbase: true,
        created_height: next_height as u64,
    });

    let plan = BlockAppendPlan {
        header: header.clone(),
        txids: txids.clone(),
        spends: assembly.spends,
        new_utxos,
        confirm_txids: assembly.included_txids.clone(),
        remove_from_mempool: assembly.included_txids,
        reward: Reward {
            height: next_height as u64,
            miner_address: miner_address.to_string(),
            amount_sats: reward_sats,
            coinbase_txid,
            created_at_ms: now_ms,
        },
    };
    store.append_block(plan)?;

    let fairness_payouts = settle_fairness(store, next_height as u64, params, now_ms)?;

    Ok(MinedBlock {
        header,
        txids,
        fee_total_sats: assembly.fee_total_sats,
        fairness_payouts,
    })
}

/// Accept a header proposed by an external miner, pool, or ticketed session
/// (§4.5.7). `submission.prev_hash` must match the current tip, or the
/// previous tip under the narrow same-prev grace rule (§9 open question a):
/// either way the block is appended on top of the chain's actual current
/// tip, since this store holds no branches to append alongside.
pub fn accept_external_header(
    store: &mut dyn Store,
    params: &ChainParams,
    submission: ExternalHeaderSubmission,
    now_ms: u64,
) -> Result<AcceptedHeader, EngineError> {
    if store.is_empty() {
        if submission.prev_hash != GENESIS_PREV_HASH {
            return Err(AcceptanceError::StalePrev.into());
        }
    } else {
        let (tip_height, tip_hash) = store.tip();
        let matches_tip = submission.prev_hash == tip_hash;
        let matches_grace = tip_height > 0
            && store
                .second_latest_header()
                .map(|h| h.hash == submission.prev_hash && h.height == tip_height - 1)
                .unwrap_or(false);
        if !matches_tip && !matches_grace {
            return Err(AcceptanceError::StalePrev.into());
        }
    }

    let (tip_height, tip_hash) = store.tip();
    let is_genesis = store.is_empty();
    let next_height: u32 = if is_genesis { 0 } else { tip_height + 1 };
    let effective_prev_hash = if is_genesis { GENESIS_PREV_HASH } else { tip_hash };
    let prev_header = if is_genesis {
        None
    } else {
        store.get_header(&effective_prev_hash)
    };
    let prev_work = prev_header
        .as_ref()
        .map(|h| h.cumulative_work)
        .unwrap_or(Bytes32::ZERO);

    let coinbase_txid = header::coinbase_txid(next_height);
    let txids = header::canonical_txids(
        next_height,
        coinbase_txid,
        &submission.txids_snapshot,
        params.bootstrap_coinbase_only_below_height,
    );
    let rebuilt_merkle = merkle::merkle_root(&txids);
    let merkle_root = if next_height < params.bootstrap_coinbase_only_below_height {
        rebuilt_merkle
    } else if submission.merkle_root == rebuilt_merkle {
        rebuilt_merkle
    } else {
        return Err(AcceptanceError::MerkleMismatch {
            rebuilt: rebuilt_merkle.to_hex(),
            submitted: submission.merkle_root.to_hex(),
            txids_len: txids.len(),
        }
        .into());
    };

    let tx_count = txids.len() as u32;
    let (diff, target) = compute_target(store, next_height, params);
    let header_bytes = header::header_serialize(
        submission.version,
        &effective_prev_hash,
        &merkle_root,
        submission.timestamp,
        &target,
        submission.nonce,
        &submission.miner_address,
        tx_count,
    );
    let digest = hash::pow_digest(
        &header_bytes,
        submission.nonce,
        &effective_prev_hash,
        params.argon2_time_cost,
        params.argon2_memory_mib,
        params.argon2_parallelism,
    );
    let pow_ok = hash::meets_target(&digest, &target);

    let block_hash = header::header_hash(
        submission.version,
        &effective_prev_hash,
        &merkle_root,
        submission.timestamp,
        &target,
        submission.nonce,
        &submission.miner_address,
        tx_count,
    );

    let candidate = BlockHeader {
        height: next_height,
        hash: block_hash,
        prev_hash: effective_prev_hash,
        merkle_root,
        timestamp: submission.timestamp,
        version: submission.version,
        nonce: submission.nonce,
        target,
        miner_address: submission.miner_address.clone(),
        tx_count,
        cumulative_work: Bytes32::ZERO,
    };
    header::validate_header(&candidate, prev_header.as_ref(), params.block_version, pow_ok)
        .map_err(AcceptanceError::from)?;

    if let Some(existing) = store.get_header(&block_hash) {
        return Ok(AcceptedHeader {
            header: existing,
            txids,
            finder_reward_sats: 0,
            fairness_payouts: Vec::new(),
            already_accepted: true,
        });
    }

    let candidate_entries: Vec<MempoolEntry> = submission
        .txids_snapshot
        .iter()
        .filter_map(|txid| store.mempool_get(txid))
        .collect();
    let assembly = build_assembly(store, &candidate_entries);

    let cumulative_work = add_work(&prev_work, diff);
    let reward_coins = reward::block_reward(
        next_height as u64,
        params.initial_block_reward,
        params.halving_interval_blocks,
    );
    let reward_sats = amount_to_sats(reward_coins).unwrap_or(0);
    let finder_share_sats = amount_to_sats(reward_coins * (1.0 - params.fairness_pool_ratio))
        .unwrap_or(reward_sats);
    let finder_reward_sats = finder_share_sats.saturating_add(assembly.fee_total_sats);

    let mut new_utxos = assembly.new_utxos;
    for utxo in new_utxos.iter_mut() {
        utxo.txid = block_hash;
        utxo.created_height = next_height as u64;
    }
    new_utxos.push(Utxo {
        txid: coinbase_txid,
        vout: 0,
        address: submission.miner_address.clone(),
        amount_sats: finder_reward_sats,
        spent: false,
        spent_by_txid: None,
        is_coinbase: true,
        created_height: next_height as u64,
    });

    let header = BlockHeader {
        height: next_height,
        hash: block_hash,
        prev_hash: effective_prev_hash,
        merkle_root,
        timestamp: submission.timestamp,
        version: submission.version,
        nonce: submission.nonce,
        target,
        miner_address: submission.miner_address.clone(),
        tx_count,
        cumulative_work,
    };

    let plan = BlockAppendPlan {
        header: header.clone(),
        txids: txids.clone(),
        spends: assembly.spends,
        new_utxos,
        confirm_txids: assembly.included_txids.clone(),
        remove_from_mempool: assembly.included_txids,
        reward: Reward {
            height: next_height as u64,
            miner_address: submission.miner_address,
            amount_sats: finder_reward_sats,
            coinbase_txid,
            created_at_ms: now_ms,
        },
    };
    store.append_block(plan)?;

    let fairness_payouts = settle_fairness(store, next_height as u64, params, now_ms)?;

    Ok(AcceptedHeader {
        header,
        txids,
        finder_reward_sats,
        fairness_payouts,
        already_accepted: false,
    })
}
