//! Content hashing, PoW digest computation, and target arithmetic (§4.1).

use argon2::{Algorithm, Argon2, Params, Version};
use num_bigint::BigUint;
use sha3::{Digest, Sha3_256};

use crate::types::{Bytes32, WireTransaction};

/// `canonical_tx_digest(tx) -> 32 bytes`.
///
/// Serializes the transaction as JSON with sorted keys and compact
/// separators, with every input's signature field removed, then hashes the
/// result. `serde_json::Value` sorts object keys by default (this crate does
/// not enable the `preserve_order` feature), and `to_vec` emits compact
/// separators, so this is a plain round-trip through `Value`.
pub fn canonical_tx_digest(tx: &WireTransaction) -> Bytes32 {
    let mut stripped = tx.clone();
    for input in &mut stripped.inputs {
        input.sig = None;
    }
    let bytes = serde_json::to_vec(&stripped).expect("WireTransaction always serializes");
    content_hash(&bytes)
}

/// `content_hash(bytes) -> 32 bytes`: SHA3-256.
pub fn content_hash(bytes: &[u8]) -> Bytes32 {
    let mut hasher = Sha3_256::new();
    hasher.update(bytes);
    let out = hasher.finalize();
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&out);
    Bytes32(buf)
}

/// `pow_digest(header_bytes, nonce, prev_hash) -> 32 bytes`.
///
/// secret = header_bytes ‖ little-endian u64(nonce); salt = prev_hash (32
/// bytes, zero-padded if unknown). These Argon2id parameters are consensus
/// rules: changing them forks the chain.
pub fn pow_digest(
    header_bytes: &[u8],
    nonce: u64,
    prev_hash: &Bytes32,
    time_cost: u32,
    memory_cost_mib: u32,
    parallelism: u32,
) -> Bytes32 {
    let mut secret = Vec::with_capacity(header_bytes.len() + 8);
    secret.extend_from_slice(header_bytes);
    secret.extend_from_slice(&nonce.to_le_bytes());

    let params = Params::new(memory_cost_mib * 1024, time_cost, parallelism, Some(32))
        .expect("static argon2 params are valid");
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut out = [0u8; 32];
    argon2
        .hash_password_into(&secret, prev_hash.as_bytes(), &mut out)
        .expect("argon2 hashing with fixed-size buffers cannot fail");
    Bytes32(out)
}

/// `target_from_difficulty(d) -> 32-byte unsigned integer`:
/// `(2^256 - 1) / max(1, d)`.
pub fn target_from_difficulty(difficulty: u64) -> Bytes32 {
    let max = (BigUint::from(1u8) << 256) - BigUint::from(1u8);
    let d = BigUint::from(difficulty.max(1));
    biguint_to_bytes32(&(max / d))
}

/// Big-endian unsigned 256-bit comparison: digest <= target.
pub fn meets_target(digest: &Bytes32, target: &Bytes32) -> bool {
    digest.as_bytes() <= target.as_bytes()
}

/// Interpret a [`Bytes32`] as a big-endian unsigned 256-bit integer.
pub fn bytes32_to_biguint(b: &Bytes32) -> BigUint {
    BigUint::from_bytes_be(b.as_bytes())
}

/// Encode a big integer as a 32-byte big-endian value, truncating silently
/// from the left if it somehow exceeds 256 bits (it never should for
/// well-formed chain data).
pub fn biguint_to_bytes32(n: &BigUint) -> Bytes32 {
    let bytes = n.to_bytes_be();
    let mut buf = [0u8; 32];
    if bytes.len() >= 32 {
        buf.copy_from_slice(&bytes[bytes.len() - 32..]);
    } else {
        buf[32 - bytes.len()..].copy_from_slice(&bytes);
    }
    Bytes32(buf)
}
