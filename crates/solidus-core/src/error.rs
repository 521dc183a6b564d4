//! Error taxonomy. Variant names are part of the wire contract: clients
//! match on them to decide whether a submission can be retried, so they are
//! kept stable even as messages are refined.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AmountError {
    #[error("invalid amount: {0}")]
    Invalid(f64),
}

/// Rejections raised while admitting a transaction into the mempool
/// (§4.4 admission pipeline).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("bad-format")]
    BadFormat,
    #[error("bad-version")]
    BadVersion,
    #[error("fee-too-low")]
    FeeTooLow,
    #[error("missing-io")]
    MissingIo,
    #[error("bad-input")]
    BadInput,
    #[error("bad-input-ref")]
    BadInputRef,
    #[error("utxo-missing-or-spent")]
    UtxoMissingOrSpent,
    #[error("coinbase-immature")]
    CoinbaseImmature,
    #[error("bad-output")]
    BadOutput,
    #[error("bad-output-amt")]
    BadOutputAmt,
    #[error("missing-sig")]
    MissingSig,
    #[error("bad-signature")]
    BadSignature,
    #[error("insufficient-input")]
    InsufficientInput,
    #[error("intra-mempool double-spend on {txid}:{vout}")]
    DoubleSpend { txid: String, vout: u32 },
    #[error("already in mempool or confirmed")]
    AlreadyExists,
}

/// Failures during local block assembly / mining (§4.5.6).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssemblyError {
    #[error("no-solution")]
    NoSolution,
    #[error("coinselect-failed")]
    CoinselectFailed,
    #[error("insufficient")]
    Insufficient,
    #[error("parse-failed")]
    ParseFailed,
}

/// Header-level validation failures (§4.5.5).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("invalid-version")]
    InvalidVersion,
    #[error("prev-link-mismatch")]
    PrevLinkMismatch,
    #[error("timestamp-decreased")]
    TimestampDecreased,
    #[error("pow-target-not-met")]
    PowTargetNotMet,
    #[error("missing-coinbase")]
    MissingCoinbase,
}

/// Rejections raised while accepting an externally-mined header (§4.5.7,
/// §4.6, §4.8).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AcceptanceError {
    #[error("stale-prev")]
    StalePrev,
    #[error("merkle-mismatch: rebuilt={rebuilt}, submitted={submitted}, txids_len={txids_len}")]
    MerkleMismatch {
        rebuilt: String,
        submitted: String,
        txids_len: usize,
    },
    #[error("header-invalid:{0}")]
    HeaderInvalid(HeaderError),
    #[error("unknown-or-expired-job")]
    UnknownOrExpiredJob,
    #[error("stale-job")]
    StaleJob,
    #[error("prev-mismatch")]
    PrevMismatch,
    #[error("addr-mismatch")]
    AddrMismatch,
    #[error("nonce-out-of-window")]
    NonceOutOfWindow,
    #[error("not-a-near-target")]
    NotANearTarget,
    #[error("ticket-expired")]
    TicketExpired,
    #[error("bad-ticket-signature")]
    BadTicketSignature,
    #[error("bad-ticket-payload")]
    BadTicketPayload,
}

impl From<HeaderError> for AcceptanceError {
    fn from(e: HeaderError) -> Self {
        AcceptanceError::HeaderInvalid(e)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")]
    InvalidPublicKey,
    #[error("invalid signature bytes")]
    InvalidSignature,
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("missing signature")]
    MissingSignature,
    #[error("address does not match public key")]
    AddressMismatch,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("transaction already in pool: {0}")]
    AlreadyExists(String),
    #[error("conflicts with pool tx {existing_txid} on outpoint {outpoint}")]
    Conflict {
        new_txid: String,
        existing_txid: String,
        outpoint: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainStateError {
    #[error("empty chain: no blocks connected")]
    EmptyChain,
    #[error("block not found: {0}")]
    BlockNotFound(String),
    #[error("height mismatch: expected {expected}, got {got}")]
    HeightMismatch { expected: u64, got: u64 },
    #[error("duplicate block: {0}")]
    DuplicateBlock(String),
}

/// Top-level error aggregator threaded through service-layer `Result`s.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Header(#[from] HeaderError),
    #[error(transparent)]
    Acceptance(#[from] AcceptanceError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
    #[error(transparent)]
    ChainState(#[from] ChainStateError),
    #[error(transparent)]
    Amount(#[from] AmountError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("storage: {0}")]
    Storage(String),
}
