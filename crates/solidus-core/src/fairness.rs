//! Fairness ledger: near-target proof credit accrual and epoch settlement
//! (§4.7).

use crate::chain_state::{FairnessPayout, Store};
use crate::hash::content_hash;
use crate::reward::{block_reward, cumulative_reward};
use crate::types::{sats_to_amount, FairnessEpoch, Hash256, Reward, Utxo};

/// The `[start, end]` height range of the epoch containing `height`.
pub fn epoch_bounds(height: u64, epoch_length: u64) -> (u64, u64) {
    let start = (height / epoch_length) * epoch_length;
    (start, start + epoch_length - 1)
}

/// Ensure the epoch containing `height` is recorded in the store (§4.7,
/// "ensure the epoch containing H exists"). A no-op if it already is.
pub fn ensure_epoch(store: &mut dyn Store, height: u64, epoch_length: u64, pool_ratio: f64) {
    let (start, end) = epoch_bounds(height, epoch_length);
    if store.get_epoch(start).is_none() {
        store.upsert_epoch(FairnessEpoch {
            start_height: start,
            end_height: end,
            pool_ratio,
            settled: false,
        });
    }
}

/// `true` when appending a block at `new_height` crosses from the previous
/// epoch into a new one, i.e. the previous block's epoch has just closed.
pub fn crossed_epoch_boundary(new_height: u64, epoch_length: u64) -> bool {
    new_height > 0 && new_height % epoch_length == 0
}

/// Settle the epoch immediately preceding `new_height`, if it has unsettled
/// positive credit. Returns the payouts created (empty if the epoch had no
/// credits, was already settled, or total credit was non-positive).
pub fn settle_previous_epoch(
    store: &mut dyn Store,
    new_height: u64,
    epoch_length: u64,
    initial_block_reward: f64,
    halving_interval_blocks: u64,
    now_ms: u64,
) -> Vec<FairnessPayout> {
    if !crossed_epoch_boundary(new_height, epoch_length) {
        return Vec::new();
    }
    let prev_end = new_height - 1;
    let (start, end) = epoch_bounds(prev_end, epoch_length);
    let Some(epoch) = store.get_epoch(start) else {
        return Vec::new();
    };
    if epoch.settled {
        return Vec::new();
    }

    let credits = store.credits_for_epoch(start);
    let total_units: f64 = credits.iter().map(|c| c.credit_units).sum();
    if total_units <= 0.0 {
        let mut settled = epoch;
        settled.settled = true;
        store.upsert_epoch(settled);
        return Vec::new();
    }

    let total_reward = cumulative_reward(start, end, initial_block_reward, halving_interval_blocks);
    let pool_value = epoch.pool_ratio * total_reward;

    let mut payouts = Vec::with_capacity(credits.len());
    for credit in credits {
        let share = credit.credit_units / total_units * pool_value;
        let txid = content_hash(format!("FAIRNESS:{start}-{end}:{}", credit.miner_address).as_bytes());
        let amount_sats = crate::types::amount_to_sats(share).unwrap_or(0);
        let reward = Reward {
            height: start,
            miner_address: credit.miner_address.clone(),
            amount_sats,
            coinbase_txid: txid,
            created_at_ms: now_ms,
        };
        let utxo = Utxo {
            txid,
            vout: 0,
            address: credit.miner_address,
            amount_sats,
            spent: false,
            spent_by_txid: None,
            is_coinbase: false,
            created_height: new_height,
        };
        payouts.push(FairnessPayout { reward, utxo });
    }

    let mut settled = epoch;
    settled.settled = true;
    store.upsert_epoch(settled);
    payouts
}

/// A near-target proof's accrued credit in units of `proof_level` (§4.6
/// `submit_near_target`). Exposed so the work service can accrue credit
/// without reaching into `Store` internals directly.
pub fn accrue_near_target_credit(
    store: &mut dyn Store,
    height: u64,
    epoch_length: u64,
    miner_address: &str,
    proof_level: f64,
    now_ms: u64,
) {
    let (start, _) = epoch_bounds(height, epoch_length);
    store.add_credit(start, miner_address, proof_level, now_ms);
}

/// Convenience used by tests and diagnostics: total paid out for a settled
/// epoch, in coins.
pub fn settled_payout_total_coins(payouts: &[FairnessPayout]) -> f64 {
    payouts.iter().map(|p| sats_to_amount(p.reward.amount_sats)).sum()
}
