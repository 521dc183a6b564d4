//! Mempool admission pipeline and query/maintenance primitives (§4.4).
//!
//! Admission is a pure function of a [`Store`] snapshot and a candidate
//! transaction: it never mutates the store itself on success (the caller
//! does that via [`Store::mempool_insert`] once `admit` returns `Ok`), which
//! keeps the linearizable-per-txid guarantee a property of the caller's
//! locking rather than something this module has to re-derive.

use crate::chain_state::Store;
use crate::crypto::verify_input_signature;
use crate::error::AdmissionError;
use crate::hash::canonical_tx_digest;
use crate::types::{amount_to_sats, Hash256, MempoolEntry, OutPoint, WireTransaction};

/// Outcome of a successful [`admit`] call: either a brand-new entry, or the
/// pre-existing entry for an identical resubmission (§4.4 "Duplicate-submit
/// suppression").
#[derive(Debug, Clone, PartialEq)]
pub enum Admitted {
    New(MempoolEntry),
    Existing(MempoolEntry),
}

/// Run the seven-step admission pipeline against `store`'s current state.
/// Does not mutate `store`; the caller inserts the returned entry.
pub fn admit(
    store: &dyn Store,
    tx: &WireTransaction,
    min_fee: f64,
    now_ms: u64,
) -> Result<Admitted, AdmissionError> {
    // 1. schema
    if tx.version != 1 {
        return Err(AdmissionError::BadVersion);
    }
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(AdmissionError::MissingIo);
    }
    if tx.outputs.iter().any(|o| o.amount <= 0.0) {
        return Err(AdmissionError::BadOutput);
    }
    if tx.fee < min_fee {
        return Err(AdmissionError::FeeTooLow);
    }

    // 2. txid / duplicate check
    let txid = canonical_tx_digest(tx);
    if let Some(existing) = store.mempool_get(&txid) {
        return Ok(Admitted::Existing(existing));
    }
    if let Some(record) = store.get_tx_record(&txid) {
        if record.is_confirmed() {
            return Err(AdmissionError::AlreadyExists);
        }
        return Ok(Admitted::Existing(MempoolEntry {
            txid,
            raw: record.raw,
            fee_sats: record.fee_sats,
            added_at_ms: record.added_at_ms,
            from_addr: tx
                .inputs
                .first()
                .map(|i| i.address.clone())
                .unwrap_or_default(),
            to_addr: tx
                .outputs
                .first()
                .map(|o| o.address.clone())
                .unwrap_or_default(),
            amount_sats: amount_to_sats(tx.outputs.first().map(|o| o.amount).unwrap_or(0.0))
                .unwrap_or(0),
        }));
    }

    // 3 & 4. resolve each input to an existing, unspent, mature UTXO
    let (tip_height, _) = store.tip();
    let mut total_in_sats: u64 = 0;
    for input in &tx.inputs {
        let outpoint = input.outpoint().ok_or(AdmissionError::BadInputRef)?;
        let utxo = store
            .get_utxo(&outpoint)
            .ok_or(AdmissionError::UtxoMissingOrSpent)?;
        if utxo.spent {
            return Err(AdmissionError::UtxoMissingOrSpent);
        }
        if utxo.address != input.address {
            return Err(AdmissionError::BadInput);
        }
        if !utxo.is_mature(tip_height as u64, store.coinbase_maturity()) {
            return Err(AdmissionError::CoinbaseImmature);
        }
        total_in_sats = total_in_sats
            .checked_add(utxo.amount_sats)
            .ok_or(AdmissionError::BadInput)?;
    }

    // 5. signatures
    for (i, input) in tx.inputs.iter().enumerate() {
        if input.sig.is_none() {
            return Err(AdmissionError::MissingSig);
        }
        verify_input_signature(tx, i).map_err(|_| AdmissionError::BadSignature)?;
    }

    // 6. balance
    let mut total_out_sats: u64 = 0;
    for output in &tx.outputs {
        let sats = amount_to_sats(output.amount).map_err(|_| AdmissionError::BadOutputAmt)?;
        total_out_sats = total_out_sats
            .checked_add(sats)
            .ok_or(AdmissionError::BadOutputAmt)?;
    }
    let fee_sats = amount_to_sats(tx.fee).map_err(|_| AdmissionError::BadOutputAmt)?;
    let required = total_out_sats
        .checked_add(fee_sats)
        .ok_or(AdmissionError::InsufficientInput)?;
    if total_in_sats < required {
        return Err(AdmissionError::InsufficientInput);
    }

    // 7. intra-mempool double-spend
    for input in &tx.inputs {
        let outpoint = input.outpoint().ok_or(AdmissionError::BadInputRef)?;
        if let Some(conflicting_txid) = store.mempool_conflict(&outpoint) {
            return Err(AdmissionError::DoubleSpend {
                txid: conflicting_txid.to_hex(),
                vout: outpoint.vout,
            });
        }
    }

    let entry = MempoolEntry {
        txid,
        raw: tx.clone(),
        fee_sats,
        added_at_ms: now_ms,
        from_addr: tx.inputs[0].address.clone(),
        to_addr: tx.outputs[0].address.clone(),
        amount_sats: total_out_sats,
    };
    Ok(Admitted::New(entry))
}

/// `query(addr?)` (§4.4): entries ordered by fee descending, then
/// `added_at_ms` ascending, optionally filtered to those touching `addr`.
pub fn query(store: &dyn Store, addr: Option<&str>) -> Vec<MempoolEntry> {
    let mut entries = store.mempool_all();
    if let Some(addr) = addr {
        entries.retain(|e| e.from_addr == addr || e.to_addr == addr);
    }
    entries.sort_by(|a, b| {
        b.fee_sats
            .cmp(&a.fee_sats)
            .then(a.added_at_ms.cmp(&b.added_at_ms))
    });
    entries
}

/// Remove every mempool entry whose txid is now confirmed on-chain.
/// A maintenance sweep; `append_block` already removes the entries it
/// directly confirms, so this catches anything left behind by an out-of-band
/// confirmation (e.g. a block accepted from a peer before this node's own
/// mempool had a chance to drop the matching entries).
pub fn purge_confirmed(store: &mut dyn Store) {
    let stale: Vec<Hash256> = store
        .mempool_all()
        .into_iter()
        .filter(|e| {
            store
                .get_tx_record(&e.txid)
                .map(|r| r.is_confirmed())
                .unwrap_or(false)
        })
        .map(|e| e.txid)
        .collect();
    for txid in stale {
        store.mempool_remove(&txid);
    }
}

/// Remove entries older than `min_age_ms` whose inputs can no longer be
/// satisfied (the referenced UTXO was spent by a confirmed block, or has
/// disappeared).
pub fn purge_unspendable(store: &mut dyn Store, now_ms: u64, min_age_ms: u64) {
    let stale: Vec<Hash256> = store
        .mempool_all()
        .into_iter()
        .filter(|e| now_ms.saturating_sub(e.added_at_ms) >= min_age_ms)
        .filter(|e| {
            e.raw.inputs.iter().any(|i| match i.outpoint() {
                Some(op) => store.get_utxo(&op).map(|u| u.spent).unwrap_or(true),
                None => true,
            })
        })
        .map(|e| e.txid)
        .collect();
    for txid in stale {
        store.mempool_remove(&txid);
    }
}

/// Outpoints claimed by a set of selected mempool entries, used by block
/// assembly to exclude them from coin selection for change/coinbase
/// bookkeeping within the same session.
pub fn claimed_outpoints(entries: &[MempoolEntry]) -> std::collections::HashSet<OutPoint> {
    entries
        .iter()
        .flat_map(|e| e.raw.inputs.iter().filter_map(|i| i.outpoint()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain_state::MemoryStore;
    use crate::crypto::KeyPair;
    use crate::types::{Bytes32, Utxo, WireTxInput, WireTxOutput};

    fn seed_utxo(store: &mut MemoryStore, owner: &KeyPair, amount_sats: u64, coinbase: bool, height: u64) -> OutPoint {
        let txid = Hash256([amount_sats as u8; 32]);
        let outpoint = OutPoint { txid, vout: 0 };
        let utxo = Utxo {
            txid,
            vout: 0,
            address: owner.public_key().address(),
            amount_sats,
            spent: false,
            spent_by_txid: None,
            is_coinbase: coinbase,
            created_height: height,
        };
        store
            .append_block(crate::chain_state::BlockAppendPlan {
                header: crate::types::BlockHeader {
                    height: height as u32,
                    hash: Hash256([height as u8 + 1; 32]),
                    prev_hash: Hash256::ZERO,
                    merkle_root: Hash256::ZERO,
                    timestamp: 0,
                    version: 1,
                    nonce: 0,
                    target: Bytes32::ZERO,
                    miner_address: owner.public_key().address(),
                    tx_count: 1,
                    cumulative_work: Bytes32::ZERO,
                },
                txids: vec![],
                spends: vec![],
                new_utxos: vec![utxo],
                confirm_txids: vec![],
                remove_from_mempool: vec![],
                reward: crate::types::Reward {
                    height,
                    miner_address: owner.public_key().address(),
                    amount_sats,
                    coinbase_txid: txid,
                    created_at_ms: 0,
                },
            })
            .unwrap();
        outpoint
    }

    fn spend_tx(owner: &KeyPair, outpoint: OutPoint, to: &str, out_sats: u64, fee: f64) -> WireTransaction {
        let mut tx = WireTransaction {
            version: 1,
            inputs: vec![WireTxInput {
                txid: outpoint.txid.to_hex(),
                vout: outpoint.vout,
                address: owner.public_key().address(),
                pubkey: String::new(),
                sig: None,
            }],
            outputs: vec![WireTxOutput {
                address: to.to_string(),
                amount: crate::types::sats_to_amount(out_sats),
            }],
            fee,
            timestamp: 1000,
        };
        owner.sign_input(&mut tx, 0);
        tx
    }

    #[test]
    fn admit_accepts_well_formed_spend() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0001);
        let result = admit(&store, &tx, 1e-5, 2000).unwrap();
        assert!(matches!(result, Admitted::New(_)));
    }

    #[test]
    fn admit_rejects_fee_below_minimum() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0);
        let err = admit(&store, &tx, 1e-5, 2000).unwrap_err();
        assert_eq!(err, AdmissionError::FeeTooLow);
    }

    #[test]
    fn admit_rejects_missing_utxo() {
        let store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let tx = spend_tx(&owner, OutPoint { txid: Hash256([9; 32]), vout: 0 }, "bob", 1, 0.0001);
        let err = admit(&store, &tx, 1e-5, 2000).unwrap_err();
        assert_eq!(err, AdmissionError::UtxoMissingOrSpent);
    }

    #[test]
    fn admit_rejects_immature_coinbase() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, true, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0001);
        let err = admit(&store, &tx, 1e-5, 2000).unwrap_err();
        assert_eq!(err, AdmissionError::CoinbaseImmature);
    }

    #[test]
    fn admit_rejects_bad_signature() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let attacker = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, false, 0);
        let mut tx = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0001);
        attacker.sign_input(&mut tx, 0);
        tx.inputs[0].address = owner.public_key().address();
        let err = admit(&store, &tx, 1e-5, 2000).unwrap_err();
        assert_eq!(err, AdmissionError::BadSignature);
    }

    #[test]
    fn admit_rejects_insufficient_input() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 200, 0.0001);
        let err = admit(&store, &tx, 1e-5, 2000).unwrap_err();
        assert_eq!(err, AdmissionError::InsufficientInput);
    }

    #[test]
    fn admit_detects_intra_mempool_double_spend() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, false, 0);
        let tx1 = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0001);
        let entry = match admit(&store, &tx1, 1e-5, 2000).unwrap() {
            Admitted::New(e) => e,
            _ => panic!("expected new entry"),
        };
        store.mempool_insert(entry);

        let tx2 = spend_tx(&owner, outpoint, "carol", 40_000_000, 0.0002);
        let err = admit(&store, &tx2, 1e-5, 2001).unwrap_err();
        assert!(matches!(err, AdmissionError::DoubleSpend { .. }));
    }

    #[test]
    fn admit_resubmission_returns_existing_entry_unchanged() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 100_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 50_000_000, 0.0001);
        let entry = match admit(&store, &tx, 1e-5, 2000).unwrap() {
            Admitted::New(e) => e,
            _ => panic!("expected new entry"),
        };
        store.mempool_insert(entry.clone());

        let result = admit(&store, &tx, 1e-5, 9999).unwrap();
        match result {
            Admitted::Existing(e) => assert_eq!(e.added_at_ms, entry.added_at_ms),
            Admitted::New(_) => panic!("expected existing entry on resubmit"),
        }
    }

    #[test]
    fn query_orders_entries_and_filters_by_address() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 10_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 5_000_000, 0.0001);
        let entry = match admit(&store, &tx, 1e-5, 1000).unwrap() {
            Admitted::New(e) => e,
            _ => panic!(),
        };
        store.mempool_insert(entry);

        assert_eq!(query(&store, None).len(), 1);
        assert_eq!(query(&store, Some("bob")).len(), 1);
        assert_eq!(query(&store, Some("nobody")).len(), 0);
    }

    #[test]
    fn purge_unspendable_keeps_old_entries_with_live_inputs() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 10_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 5_000_000, 0.0001);
        let entry = match admit(&store, &tx, 1e-5, 1000).unwrap() {
            Admitted::New(e) => e,
            _ => panic!(),
        };
        let txid = entry.txid;
        store.mempool_insert(entry);

        purge_unspendable(&mut store, 100_000, 1_000);
        assert!(store.mempool_get(&txid).is_some());
    }

    #[test]
    fn purge_unspendable_drops_old_entries_with_spent_inputs() {
        let mut store = MemoryStore::new(10);
        let owner = KeyPair::generate();
        let outpoint = seed_utxo(&mut store, &owner, 10_000_000, false, 0);
        let tx = spend_tx(&owner, outpoint, "bob", 5_000_000, 0.0001);
        let entry = match admit(&store, &tx, 1e-5, 1000).unwrap() {
            Admitted::New(e) => e,
            _ => panic!(),
        };
        let txid = entry.txid;
        store.mempool_insert(entry);

        // A later block spends the referenced UTXO directly (without going
        // through this mempool entry), the way a conflicting transaction
        // confirming first would leave it unspendable.
        let (_, tip_hash) = store.tip();
        store
            .append_block(crate::chain_state::BlockAppendPlan {
                header: crate::types::BlockHeader {
                    height: 1,
                    hash: Hash256([2; 32]),
                    prev_hash: tip_hash,
                    merkle_root: Hash256::ZERO,
                    timestamp: 0,
                    version: 1,
                    nonce: 0,
                    target: Bytes32::ZERO,
                    miner_address: owner.public_key().address(),
                    tx_count: 1,
                    cumulative_work: Bytes32::ZERO,
                },
                txids: vec![],
                spends: vec![outpoint],
                new_utxos: vec![],
                confirm_txids: vec![],
                remove_from_mempool: vec![],
                reward: crate::types::Reward {
                    height: 1,
                    miner_address: owner.public_key().address(),
                    amount_sats: 0,
                    coinbase_txid: Hash256([3; 32]),
                    created_at_ms: 0,
                },
            })
            .unwrap();

        purge_unspendable(&mut store, 100_000, 1_000);
        assert!(store.mempool_get(&txid).is_none());
    }
}
