//! Persistent store contract (§3, §4.2) and UTXO ledger operations (§4.3).
//!
//! [`Store`] is the single seam through which every subsystem — mempool
//! admission, block assembly, external acceptance, the work/pool services,
//! and fairness settlement — touches shared state. The in-process core never
//! holds mutable ledger state outside an implementation of this trait; the
//! production implementation ([`solidus_node::storage::RocksStore`]) adds
//! the writer-contention retry policy from §4.2 around the same operations
//! this module's [`MemoryStore`] performs directly.

use std::collections::HashMap;

use crate::error::ChainStateError;
use crate::types::{
    Bytes32, FairnessCredit, FairnessEpoch, Hash256, MempoolEntry, OutPoint, Reward,
    TransactionRecord, Utxo,
};

/// Amount needed vs. amount found when greedy coin selection runs out of
/// spendable outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct InsufficientFunds {
    pub needed_sats: u64,
    pub found_sats: u64,
}

/// Result of [`Store::select_inputs`].
#[derive(Debug, Clone, PartialEq)]
pub struct SelectedInputs {
    pub inputs: Vec<Utxo>,
    pub total_in_sats: u64,
}

/// Everything a single accepted block changes, applied atomically by
/// [`Store::append_block`] (§4.5.6 step 6, §4.5.7 step 7).
#[derive(Debug, Clone)]
pub struct BlockAppendPlan {
    pub header: crate::types::BlockHeader,
    pub txids: Vec<Hash256>,
    /// Previously-unspent outpoints consumed by this block's non-coinbase
    /// transactions.
    pub spends: Vec<OutPoint>,
    /// UTXOs created by this block: coinbase, recipient outputs, and any
    /// change outputs (already keyed by the final header hash; see §4.5.6
    /// step 6).
    pub new_utxos: Vec<Utxo>,
    /// Mempool-origin txids confirmed by this block.
    pub confirm_txids: Vec<Hash256>,
    /// Txids to drop from the mempool (mirrors `confirm_txids` in practice).
    pub remove_from_mempool: Vec<Hash256>,
    pub reward: Reward,
}

/// A fairness payout produced by settling an epoch (§4.7 step 4): a reward
/// row plus the spendable UTXO backing it.
#[derive(Debug, Clone)]
pub struct FairnessPayout {
    pub reward: Reward,
    pub utxo: Utxo,
}

/// The persistence contract. Implementors must guarantee: [`append_block`]
/// is atomic across header insert, UTXO mutation, transaction confirmation,
/// mempool deletion, and reward creation; mempool admission is linearizable
/// per txid (§5).
///
/// [`append_block`]: Store::append_block
pub trait Store {
    /// `true` until the genesis block has been appended.
    fn is_empty(&self) -> bool;
    fn tip(&self) -> (u32, Hash256);
    fn get_header(&self, hash: &Hash256) -> Option<crate::types::BlockHeader>;
    fn get_header_by_height(&self, height: u32) -> Option<crate::types::BlockHeader>;

    /// Headers at `[tip.height - n + 1, tip.height]`, oldest first, for
    /// difficulty retargeting (§4.5.4). Returns fewer than `n` if the chain
    /// is shorter.
    fn recent_headers(&self, n: usize) -> Vec<crate::types::BlockHeader>;

    /// The second-most-recent header, if any; used by the "same-prev-as-
    /// previous-tip" grace rule (§4.5.7 step 1).
    fn second_latest_header(&self) -> Option<crate::types::BlockHeader>;

    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Utxo>;
    fn utxos_for_address(&self, address: &str) -> Vec<Utxo>;

    /// `balance(address)`: sum of unspent UTXOs owned by `address`, in
    /// satoshis, honoring coinbase maturity against the current tip.
    fn balance_sats(&self, address: &str) -> u64 {
        let (tip_height, _) = self.tip();
        self.utxos_for_address(address)
            .into_iter()
            .filter(|u| !u.spent && u.is_mature(tip_height as u64, self.coinbase_maturity()))
            .map(|u| u.amount_sats)
            .sum()
    }

    /// Coinbase maturity in blocks, threaded through `balance_sats`'s
    /// default so implementations only need to supply chain params once.
    fn coinbase_maturity(&self) -> u64;

    /// `select_inputs(address, need)` (§4.3): greedy largest-first
    /// selection, skipping anything in `exclude` (outputs already
    /// tentatively reserved by the current assembly session).
    fn select_inputs(
        &self,
        address: &str,
        need_sats: u64,
        exclude: &std::collections::HashSet<OutPoint>,
    ) -> Result<SelectedInputs, InsufficientFunds> {
        let (tip_height, _) = self.tip();
        let mut candidates: Vec<Utxo> = self
            .utxos_for_address(address)
            .into_iter()
            .filter(|u| {
                !u.spent
                    && !exclude.contains(&u.outpoint())
                    && u.is_mature(tip_height as u64, self.coinbase_maturity())
            })
            .collect();
        candidates.sort_by(|a, b| b.amount_sats.cmp(&a.amount_sats));

        let mut total = 0u64;
        let mut chosen = Vec::new();
        for utxo in candidates {
            if total >= need_sats {
                break;
            }
            total += utxo.amount_sats;
            chosen.push(utxo);
        }
        if total < need_sats {
            return Err(InsufficientFunds {
                needed_sats: need_sats,
                found_sats: total,
            });
        }
        Ok(SelectedInputs {
            inputs: chosen,
            total_in_sats: total,
        })
    }

    fn mempool_get(&self, txid: &Hash256) -> Option<MempoolEntry>;
    fn mempool_all(&self) -> Vec<MempoolEntry>;
    fn mempool_insert(&mut self, entry: MempoolEntry);
    fn mempool_remove(&mut self, txid: &Hash256) -> Option<MempoolEntry>;

    /// The mempool entry (if any) that already claims `outpoint` — used for
    /// the intra-mempool double-spend check (§4.4 step 7).
    fn mempool_conflict(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.mempool_all()
            .into_iter()
            .find(|e| e.raw.inputs.iter().any(|i| i.outpoint() == Some(*outpoint)))
            .map(|e| e.txid)
    }

    fn get_tx_record(&self, txid: &Hash256) -> Option<TransactionRecord>;

    /// Record a newly-admitted transaction as pending confirmation
    /// (`in_block_hash: None`). Called once per admission alongside
    /// `mempool_insert`, so the "already in mempool or confirmed" check in
    /// admission step 2 still finds it after the mempool entry is removed
    /// by a block confirming it.
    fn put_tx_record(&mut self, record: TransactionRecord);

    fn get_reward(&self, height: u32) -> Option<Reward>;

    fn get_epoch(&self, start_height: u64) -> Option<FairnessEpoch>;
    fn upsert_epoch(&mut self, epoch: FairnessEpoch);
    fn get_credit(&self, epoch_start: u64, miner_address: &str) -> Option<FairnessCredit>;
    fn add_credit(&mut self, epoch_start: u64, miner_address: &str, units: f64, now_ms: u64);
    fn credits_for_epoch(&self, epoch_start: u64) -> Vec<FairnessCredit>;

    fn kv_get(&self, key: &str) -> Option<String>;
    fn kv_put(&mut self, key: &str, value: String);

    /// Atomically persist an accepted block: header, UTXO mutations,
    /// transaction confirmation, mempool deletion, and reward creation.
    fn append_block(&mut self, plan: BlockAppendPlan) -> Result<(), ChainStateError>;

    /// Record a settled epoch's fairness payouts (§4.7 step 4-5). Idempotent
    /// with respect to each payout's txid.
    fn settle_epoch(&mut self, epoch_start: u64, payouts: Vec<FairnessPayout>) -> Result<(), ChainStateError>;
}

/// Simple in-memory [`Store`] used by unit and integration tests. The
/// production deployment uses `solidus-node`'s RocksDB-backed store, which
/// implements the same trait with durable column families and the §4.2
/// retry policy.
pub struct MemoryStore {
    headers_by_hash: HashMap<Hash256, crate::types::BlockHeader>,
    headers_by_height: HashMap<u32, Hash256>,
    tip_height: u32,
    tip_hash: Hash256,
    utxos: HashMap<OutPoint, Utxo>,
    mempool: HashMap<Hash256, MempoolEntry>,
    tx_records: HashMap<Hash256, TransactionRecord>,
    rewards: HashMap<u32, Reward>,
    epochs: HashMap<u64, FairnessEpoch>,
    credits: HashMap<(u64, String), FairnessCredit>,
    settled_payout_txids: std::collections::HashSet<Hash256>,
    kv: HashMap<String, String>,
    coinbase_maturity: u64,
}

impl MemoryStore {
    pub fn new(coinbase_maturity: u64) -> Self {
        Self {
            headers_by_hash: HashMap::new(),
            headers_by_height: HashMap::new(),
            tip_height: 0,
            tip_hash: Hash256::ZERO,
            utxos: HashMap::new(),
            mempool: HashMap::new(),
            tx_records: HashMap::new(),
            rewards: HashMap::new(),
            epochs: HashMap::new(),
            credits: HashMap::new(),
            settled_payout_txids: std::collections::HashSet::new(),
            kv: HashMap::new(),
            coinbase_maturity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.headers_by_hash.is_empty()
    }

    pub fn utxo_count(&self) -> usize {
        self.utxos.values().filter(|u| !u.spent).count()
    }
}

impl Store for MemoryStore {
    fn is_empty(&self) -> bool {
        self.headers_by_hash.is_empty()
    }

    fn tip(&self) -> (u32, Hash256) {
        (self.tip_height, self.tip_hash)
    }

    fn get_header(&self, hash: &Hash256) -> Option<crate::types::BlockHeader> {
        self.headers_by_hash.get(hash).cloned()
    }

    fn get_header_by_height(&self, height: u32) -> Option<crate::types::BlockHeader> {
        self.headers_by_height
            .get(&height)
            .and_then(|h| self.headers_by_hash.get(h))
            .cloned()
    }

    fn recent_headers(&self, n: usize) -> Vec<crate::types::BlockHeader> {
        if self.is_empty() || n == 0 {
            return Vec::new();
        }
        let start = self.tip_height.saturating_sub(n as u32 - 1);
        (start..=self.tip_height)
            .filter_map(|h| self.get_header_by_height(h))
            .collect()
    }

    fn second_latest_header(&self) -> Option<crate::types::BlockHeader> {
        if self.tip_height == 0 {
            return None;
        }
        self.get_header_by_height(self.tip_height - 1)
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Option<Utxo> {
        self.utxos.get(outpoint).cloned()
    }

    fn utxos_for_address(&self, address: &str) -> Vec<Utxo> {
        self.utxos
            .values()
            .filter(|u| u.address == address)
            .cloned()
            .collect()
    }

    fn coinbase_maturity(&self) -> u64 {
        self.coinbase_maturity
    }

    fn mempool_get(&self, txid: &Hash256) -> Option<MempoolEntry> {
        self.mempool.get(txid).cloned()
    }

    fn mempool_all(&self) -> Vec<MempoolEntry> {
        self.mempool.values().cloned().collect()
    }

    fn mempool_insert(&mut self, entry: MempoolEntry) {
        self.mempool.insert(entry.txid, entry);
    }

    fn mempool_remove(&mut self, txid: &Hash256) -> Option<MempoolEntry> {
        self.mempool.remove(txid)
    }

    fn get_tx_record(&self, txid: &Hash256) -> Option<TransactionRecord> {
        self.tx_records.get(txid).cloned()
    }

    fn put_tx_record(&mut self, record: TransactionRecord) {
        self.tx_records.insert(record.txid, record);
    }

    fn get_reward(&self, height: u32) -> Option<Reward> {
        self.rewards.get(&height).cloned()
    }

    fn get_epoch(&self, start_height: u64) -> Option<FairnessEpoch> {
        self.epochs.get(&start_height).cloned()
    }

    fn upsert_epoch(&mut self, epoch: FairnessEpoch) {
        self.epochs.insert(epoch.start_height, epoch);
    }

    fn get_credit(&self, epoch_start: u64, miner_address: &str) -> Option<FairnessCredit> {
        self.credits
            .get(&(epoch_start, miner_address.to_string()))
            .cloned()
    }

    fn add_credit(&mut self, epoch_start: u64, miner_address: &str, units: f64, now_ms: u64) {
        let key = (epoch_start, miner_address.to_string());
        let entry = self
            .credits
            .entry(key)
            .or_insert_with(|| FairnessCredit {
                epoch_start,
                miner_address: miner_address.to_string(),
                credit_units: 0.0,
                last_ms: now_ms,
            });
        entry.credit_units += units;
        entry.last_ms = now_ms;
    }

    fn credits_for_epoch(&self, epoch_start: u64) -> Vec<FairnessCredit> {
        self.credits
            .values()
            .filter(|c| c.epoch_start == epoch_start)
            .cloned()
            .collect()
    }

    fn kv_get(&self, key: &str) -> Option<String> {
        self.kv.get(key).cloned()
    }

    fn kv_put(&mut self, key: &str, value: String) {
        self.kv.insert(key.to_string(), value);
    }

    fn append_block(&mut self, plan: BlockAppendPlan) -> Result<(), ChainStateError> {
        let expected_height = if self.is_empty() { 0 } else { self.tip_height + 1 };
        if plan.header.height != expected_height {
            return Err(ChainStateError::HeightMismatch {
                expected: expected_height as u64,
                got: plan.header.height as u64,
            });
        }
        if self.headers_by_hash.contains_key(&plan.header.hash) {
            return Err(ChainStateError::DuplicateBlock(plan.header.hash.to_hex()));
        }

        for outpoint in &plan.spends {
            if let Some(utxo) = self.utxos.get_mut(outpoint) {
                utxo.spent = true;
                utxo.spent_by_txid = Some(plan.header.hash);
            }
        }
        for utxo in plan.new_utxos {
            self.utxos.insert(utxo.outpoint(), utxo);
        }
        for txid in &plan.confirm_txids {
            if let Some(record) = self.tx_records.get_mut(txid) {
                record.in_block_hash = Some(plan.header.hash);
            }
        }
        for txid in &plan.remove_from_mempool {
            self.mempool.remove(txid);
        }

        self.rewards.insert(plan.header.height, plan.reward);
        self.headers_by_height
            .insert(plan.header.height, plan.header.hash);
        self.headers_by_hash.insert(plan.header.hash, plan.header.clone());
        self.tip_height = plan.header.height;
        self.tip_hash = plan.header.hash;

        Ok(())
    }

    fn settle_epoch(&mut self, epoch_start: u64, payouts: Vec<FairnessPayout>) -> Result<(), ChainStateError> {
        for payout in payouts {
            if self.settled_payout_txids.insert(payout.reward.coinbase_txid) {
                self.tx_records.entry(payout.reward.coinbase_txid).or_insert_with(|| {
                    TransactionRecord {
                        txid: payout.reward.coinbase_txid,
                        raw: crate::types::WireTransaction {
                            version: 1,
                            inputs: vec![],
                            outputs: vec![],
                            fee: 0.0,
                            timestamp: payout.reward.created_at_ms / 1000,
                        },
                        fee_sats: 0,
                        added_at_ms: payout.reward.created_at_ms,
                        in_block_hash: Some(self.tip_hash),
                    }
                });
                self.utxos.insert(payout.utxo.outpoint(), payout.utxo);
            }
        }
        if let Some(epoch) = self.epochs.get_mut(&epoch_start) {
            epoch.settled = true;
        }
        Ok(())
    }
}
