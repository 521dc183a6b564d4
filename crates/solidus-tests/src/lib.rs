//! Adversarial and end-to-end test suite for the chain core.
//!
//! This crate holds integration tests only; [`helpers`] is the shared
//! fixture-building code every `tests/*.rs` file pulls in.

pub mod helpers;
