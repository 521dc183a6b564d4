//! Header serialization/hashing, canonical txid ordering, and header
//! validation (§4.5.1, §4.5.3, §4.5.5).
//!
//! The field order in [`header_serialize`] is a consensus rule: every miner,
//! pool, and acceptor must agree on it bit-for-bit, so it is driven by an
//! explicit ordered tuple rather than `BlockHeader`'s derived `Serialize`.

use serde::Serialize;

use crate::error::HeaderError;
use crate::hash::content_hash;
use crate::types::{BlockHeader, Hash256};

/// Sentinel `prev_hash` for the genesis header; the link check is skipped
/// when a candidate's `prev_hash` equals this value and there is no stored
/// parent.
pub const GENESIS_PREV_HASH: Hash256 = Hash256::ZERO;

/// The eight fields of a header in consensus order, as a JSON tuple. No key
/// re-sorting can apply here since this is a sequence, not a map.
#[derive(Serialize)]
struct OrderedHeaderFields<'a>(
    u32,
    &'a str,
    &'a str,
    u64,
    &'a str,
    u64,
    &'a str,
    u32,
);

/// Serialize a header's consensus fields as compact JSON, in the fixed order
/// `version, prev_hash, merkle_root, timestamp, target, nonce,
/// miner_address, tx_count`.
pub fn header_serialize(
    version: u32,
    prev_hash: &Hash256,
    merkle_root: &Hash256,
    timestamp: u64,
    target: &crate::types::Bytes32,
    nonce: u64,
    miner_address: &str,
    tx_count: u32,
) -> Vec<u8> {
    let tuple = OrderedHeaderFields(
        version,
        &prev_hash.to_hex(),
        &merkle_root.to_hex(),
        timestamp,
        &target.to_hex(),
        nonce,
        miner_address,
        tx_count,
    );
    serde_json::to_vec(&tuple).expect("ordered header tuple always serializes")
}

/// `header_hash = content_hash(header_serialize(...))`.
pub fn header_hash(
    version: u32,
    prev_hash: &Hash256,
    merkle_root: &Hash256,
    timestamp: u64,
    target: &crate::types::Bytes32,
    nonce: u64,
    miner_address: &str,
    tx_count: u32,
) -> Hash256 {
    content_hash(&header_serialize(
        version,
        prev_hash,
        merkle_root,
        timestamp,
        target,
        nonce,
        miner_address,
        tx_count,
    ))
}

/// Serialize a fully-built [`BlockHeader`] per the consensus field order.
pub fn serialize_header(header: &BlockHeader) -> Vec<u8> {
    header_serialize(
        header.version,
        &header.prev_hash,
        &header.merkle_root,
        header.timestamp,
        &header.target,
        header.nonce,
        &header.miner_address,
        header.tx_count,
    )
}

/// Recompute a header's hash from its own fields (used to verify a header
/// was not tampered with after construction).
pub fn hash_of(header: &BlockHeader) -> Hash256 {
    content_hash(&serialize_header(header))
}

/// Validate a candidate header against its parent per §4.5.5.
///
/// `prev` is `None` only for genesis; every non-genesis header must supply
/// its parent. `pow_ok` is computed by the caller (it needs the Argon2
/// parameters and is therefore threaded in rather than recomputed here).
pub fn validate_header(
    header: &BlockHeader,
    prev: Option<&BlockHeader>,
    expected_version: u32,
    pow_ok: bool,
) -> Result<(), HeaderError> {
    if header.version != expected_version {
        return Err(HeaderError::InvalidVersion);
    }
    if header.tx_count < 1 {
        return Err(HeaderError::MissingCoinbase);
    }
    match prev {
        Some(parent) => {
            if header.prev_hash != parent.hash {
                return Err(HeaderError::PrevLinkMismatch);
            }
            if header.timestamp < parent.timestamp {
                return Err(HeaderError::TimestampDecreased);
            }
        }
        None => {
            if header.prev_hash != GENESIS_PREV_HASH {
                return Err(HeaderError::PrevLinkMismatch);
            }
        }
    }
    if !pow_ok {
        return Err(HeaderError::PowTargetNotMet);
    }
    Ok(())
}

/// Canonical txid ordering for a block at height `h` (§4.5.3).
///
/// Below the bootstrap height the block is coinbase-only and any submitted
/// txids are ignored. At and above it, the coinbase is followed by the
/// submitted txids, deduplicated while preserving first-seen order and
/// normalized to lowercase hex.
pub fn canonical_txids(height: u32, coinbase_txid: Hash256, submitted: &[Hash256], bootstrap_height: u32) -> Vec<Hash256> {
    let mut out = Vec::with_capacity(1 + submitted.len());
    out.push(coinbase_txid);
    if height < bootstrap_height {
        return out;
    }
    let mut seen = std::collections::HashSet::new();
    seen.insert(coinbase_txid);
    for txid in submitted {
        if seen.insert(*txid) {
            out.push(*txid);
        }
    }
    out
}

/// `coinbase_txid(H) = content_hash("COINBASE:{H}")`.
pub fn coinbase_txid(height: u32) -> Hash256 {
    content_hash(format!("COINBASE:{height}").as_bytes())
}
