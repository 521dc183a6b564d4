//! Shared fixture builders for the integration tests in `tests/*.rs`,
//! mirroring the helper shapes already used by `solidus-core`'s and
//! `solidus-consensus`'s own `#[cfg(test)]` modules.

use std::sync::atomic::AtomicBool;

use solidus_consensus::{assemble_and_mine, MinedBlock};
use solidus_core::chain_state::{BlockAppendPlan, MemoryStore, Store};
use solidus_core::constants::ChainParams;
use solidus_core::crypto::KeyPair;
use solidus_core::types::{
    sats_to_amount, BlockHeader, Bytes32, Hash256, OutPoint, Reward, Utxo, WireTransaction,
    WireTxInput, WireTxOutput,
};

/// A fresh in-memory store and the dev chain parameters it was built with.
pub fn dev_store() -> (MemoryStore, ChainParams) {
    let params = ChainParams::dev();
    (MemoryStore::new(params.coinbase_maturity), params)
}

/// Inject a single UTXO directly, bypassing mining, by appending a minimal
/// synthetic block. Used to set up spendable balances without running the
/// full assembly/mining pipeline.
pub fn seed_utxo(store: &mut MemoryStore, owner: &KeyPair, amount_sats: u64, coinbase: bool, height: u64) -> OutPoint {
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
        .append_block(BlockAppendPlan {
            header: BlockHeader {
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
            reward: Reward {
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

/// Build and sign a single-input spend from `owner` to `to`.
pub fn spend_tx(owner: &KeyPair, outpoint: OutPoint, to: &str, out_sats: u64, fee: f64) -> WireTransaction {
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
            amount: sats_to_amount(out_sats),
        }],
        fee,
        timestamp: 1000,
    };
    owner.sign_input(&mut tx, 0);
    tx
}

/// Mine `n` blocks onto `store` in sequence, advancing the wall clock by a
/// minute per block, and return the mined blocks in order.
pub fn mine_n_blocks(store: &mut MemoryStore, params: &ChainParams, miner: &str, n: u32, start_ms: u64) -> Vec<MinedBlock> {
    let stop = AtomicBool::new(false);
    let mut mined = Vec::with_capacity(n as usize);
    for i in 0..n {
        let now_ms = start_ms + i as u64 * 60_000;
        let block = assemble_and_mine(store, params, miner, now_ms, &stop, &|| now_ms / 1000).unwrap();
        mined.push(block);
    }
    mined
}
