//! # solidus-consensus — block assembly, mining, and external header
//! acceptance.
//!
//! Wraps `solidus-core`'s pure ledger/mempool/difficulty primitives with the
//! two state-changing operations a node performs against its `Store`:
//! producing a new block locally ([`assemble_and_mine`]) and accepting one
//! proposed by somebody else ([`accept_external_header`]).

pub mod engine;

pub use engine::{
    accept_external_header, assemble_and_mine, AcceptedHeader, EngineError,
    ExternalHeaderSubmission, MinedBlock,
};
