//! Merkle root construction over a block's canonical txid list (§4.5.2).
//!
//! Unlike a domain-separated Merkle tree, the txid bytes themselves form the
//! leaf layer directly: no leaf-hash prefix is applied, since the txids are
//! already content hashes. Odd layers duplicate the last element.

use crate::hash::content_hash;
use crate::types::Hash256;

/// Compute the Merkle root for a block's canonical txid list.
///
/// An empty list roots to `content_hash(b"")`, not the zero hash: a block
/// always has at least a coinbase, so this only matters for ad hoc callers.
pub fn merkle_root(txids: &[Hash256]) -> Hash256 {
    if txids.is_empty() {
        return content_hash(b"");
    }

    let mut layer: Vec<Hash256> = txids.to_vec();
    while layer.len() > 1 {
        layer = next_layer(&layer);
    }
    layer[0]
}

fn next_layer(layer: &[Hash256]) -> Vec<Hash256> {
    let mut next = Vec::with_capacity(layer.len().div_ceil(2));
    let mut i = 0;
    while i < layer.len() {
        let left = layer[i];
        let right = if i + 1 < layer.len() { layer[i + 1] } else { left };
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(left.as_bytes());
        buf[32..].copy_from_slice(right.as_bytes());
        next.push(content_hash(&buf));
        i += 2;
    }
    next
}
