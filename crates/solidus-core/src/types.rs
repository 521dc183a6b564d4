//! Core protocol types: the header/ledger data model described by the
//! persisted-state layout. All hex encodings are lowercase; all 32-byte
//! quantities (content hashes, merkle roots, targets, cumulative work) share
//! the same [`Bytes32`] representation.
//!
//! Monetary amounts are tracked internally as `u64` "satoshis" (1 coin =
//! [`SATS_PER_COIN`] units) and only converted to/from floating point at the
//! wire boundary, per the fixed-point guidance for amounts.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::AmountError;

/// Scale factor between a whole coin and the internal integer unit.
pub const SATS_PER_COIN: u64 = 100_000_000;

/// Convert a floating-point coin amount to integer satoshis, rejecting
/// negative or non-finite values.
pub fn amount_to_sats(amount: f64) -> Result<u64, AmountError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(AmountError::Invalid(amount));
    }
    let scaled = amount * SATS_PER_COIN as f64;
    if scaled > u64::MAX as f64 {
        return Err(AmountError::Invalid(amount));
    }
    Ok(scaled.round() as u64)
}

/// Convert integer satoshis back to a floating-point coin amount.
pub fn sats_to_amount(sats: u64) -> f64 {
    sats as f64 / SATS_PER_COIN as f64
}

/// A 32-byte value: used for content hashes, merkle roots, PoW targets and
/// cumulative work. Serializes as lowercase hex, matching the wire format.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Bytes32(pub [u8; 32]);

impl Bytes32 {
    pub const ZERO: Self = Self([0u8; 32]);

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a 64-character lowercase (or mixed-case) hex string.
    /// Returns `None` on malformed input rather than panicking; callers at
    /// the wire boundary turn this into a structured admission error.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Same as [`Self::from_hex`] but falls back to the zero value, mirroring
    /// the reference implementation's salt-derivation fallback for an
    /// unknown previous hash.
    pub fn from_hex_or_zero(s: &str) -> Self {
        Self::from_hex(s).unwrap_or(Self::ZERO)
    }
}

impl fmt::Display for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Bytes32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes32({})", self.to_hex())
    }
}

impl From<[u8; 32]> for Bytes32 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Bytes32 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Bytes32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Bytes32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Bytes32::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex chars"))
    }
}

/// Alias used where a field is conceptually a content hash (header hash,
/// txid, merkle root) rather than a target or cumulative-work integer.
pub type Hash256 = Bytes32;

/// A reference to a specific output of a specific transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

/// An input as carried on the wire (`TxSubmit`): references a prior output
/// by (txid, vout), names the spending address, and carries the signer's
/// public key and signature over the transaction's canonical digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTxInput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    pub pubkey: String,
    /// Absent on a transaction still being assembled for signing; present
    /// (64 bytes hex) once signed. Stripped before computing the canonical
    /// digest that signatures are taken over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sig: Option<String>,
}

impl WireTxInput {
    pub fn outpoint(&self) -> Option<OutPoint> {
        Some(OutPoint {
            txid: Hash256::from_hex(&self.txid)?,
            vout: self.vout,
        })
    }
}

/// An output as carried on the wire: a destination address and a
/// floating-point coin amount (converted to satoshis at validation time).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTxOutput {
    pub address: String,
    pub amount: f64,
}

/// The wire form of a transaction, as submitted via `TxSubmit` or embedded
/// in a mempool/ledger record. Field order here is irrelevant: JSON field
/// order is only a consensus concern for [`crate::hash::header_serialize`];
/// the transaction digest is computed over a key-sorted re-encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTransaction {
    pub version: u32,
    pub inputs: Vec<WireTxInput>,
    pub outputs: Vec<WireTxOutput>,
    pub fee: f64,
    pub timestamp: u64,
}

/// A transaction as tracked by the ledger once it has passed admission:
/// the canonical txid, the raw bytes it was admitted with, and confirmation
/// status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub txid: Hash256,
    pub raw: WireTransaction,
    pub fee_sats: u64,
    pub added_at_ms: u64,
    pub in_block_hash: Option<Hash256>,
}

impl TransactionRecord {
    pub fn is_confirmed(&self) -> bool {
        self.in_block_hash.is_some()
    }
}

/// An unspent (or spent, retained for audit) transaction output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: Hash256,
    pub vout: u32,
    pub address: String,
    pub amount_sats: u64,
    pub spent: bool,
    pub spent_by_txid: Option<Hash256>,
    pub is_coinbase: bool,
    /// Height at which this output was created; used for coinbase maturity.
    /// Not itself part of the externally-observable UTXO shape but required
    /// to evaluate the maturity invariant without a second lookup.
    pub created_height: u64,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            txid: self.txid,
            vout: self.vout,
        }
    }

    pub fn is_mature(&self, tip_height: u64, coinbase_maturity: u64) -> bool {
        if !self.is_coinbase {
            return true;
        }
        tip_height >= self.created_height + coinbase_maturity
    }
}

/// A block header. Field order of `version, prev_hash, merkle_root,
/// timestamp, target, nonce, miner_address, tx_count` is a consensus rule
/// enforced by [`crate::hash::header_serialize`], not by this struct's
/// declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u32,
    pub hash: Hash256,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    pub timestamp: u64,
    pub version: u32,
    pub nonce: u64,
    pub target: Bytes32,
    pub miner_address: String,
    pub tx_count: u32,
    pub cumulative_work: Bytes32,
}

/// A connected block: its header plus the ordered list of included txids
/// (coinbase first), matching the canonical ordering rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub txids: Vec<Hash256>,
}

/// A confirmed block reward payout. Created exactly once per confirmed
/// block (and once per fairness payout within a settled epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reward {
    pub height: u64,
    pub miner_address: String,
    pub amount_sats: u64,
    pub coinbase_txid: Hash256,
    pub created_at_ms: u64,
}

/// A fixed-length height range over which fairness credits accrue before
/// being settled into spendable payouts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessEpoch {
    pub start_height: u64,
    pub end_height: u64,
    pub pool_ratio: f64,
    pub settled: bool,
}

/// Accrued near-target proof credit for one miner within one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairnessCredit {
    pub epoch_start: u64,
    pub miner_address: String,
    pub credit_units: f64,
    pub last_ms: u64,
}

/// A transaction pending confirmation, as tracked by the mempool (§3).
/// `from_addr`/`to_addr`/`amount_sats` are denormalized from `raw` for the
/// `query()` ordering and diagnostics; `raw` remains the source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub txid: Hash256,
    pub raw: WireTransaction,
    pub fee_sats: u64,
    pub added_at_ms: u64,
    pub from_addr: String,
    pub to_addr: String,
    pub amount_sats: u64,
}
