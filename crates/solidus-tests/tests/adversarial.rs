//! Adversarial property-based test suite.
//!
//! Each property runs many randomized cases via `proptest`, with shrinking
//! toward a minimal failing example on a counterexample.
//!
//! Properties covered:
//! - Difficulty retarget output always stays within the configured bounds.
//! - Merkle root is deterministic and sensitive to any txid change.
//! - Block reward is non-increasing in height and never below the floor.
//! - Cumulative reward equals the sum of its per-block terms.
//! - Mempool admission of the same transaction twice is idempotent.
//! - A second spend of an already-claimed outpoint is always rejected.

use proptest::prelude::*;

use solidus_core::chain_state::Store;
use solidus_core::crypto::KeyPair;
use solidus_core::difficulty::{next_difficulty, RetargetHeader};
use solidus_core::error::AdmissionError;
use solidus_core::hash::biguint_to_bytes32;
use solidus_core::merkle::merkle_root;
use solidus_core::mempool::{self, Admitted};
use solidus_core::reward::{block_reward, cumulative_reward, REWARD_FLOOR};
use solidus_core::types::{amount_to_sats, Bytes32, Hash256};

use solidus_tests::helpers::{dev_store, seed_utxo, spend_tx};

const BOOT: u32 = 200;
const TARGET_BLOCK_TIME: u64 = 60;
const DIFF_MIN: u64 = 1;
const DIFF_MAX: u64 = 500;
const WINDOW: usize = 30;
const CLAMP: (f64, f64) = (0.85, 1.15);

fn ancestors_strategy() -> impl Strategy<Value = Vec<(u64, u64)>> {
    // (inter-block delay seconds, per-block work increment), delays and
    // increments both kept strictly positive so cumulative work and time
    // are monotonically increasing, matching real chain data.
    proptest::collection::vec((1u64..600, 1u64..10_000), 2..40)
}

fn build_ancestors(deltas: &[(u64, u64)]) -> Vec<RetargetHeader> {
    let mut timestamp = 0u64;
    let mut work = 0u64;
    deltas
        .iter()
        .map(|(dt, dw)| {
            timestamp += dt;
            work += dw;
            RetargetHeader {
                timestamp,
                cumulative_work: biguint_to_bytes32(&num_bigint::BigUint::from(work)),
            }
        })
        .collect()
}

proptest! {
    #[test]
    fn retarget_output_always_within_configured_bounds(deltas in ancestors_strategy(), next_height in BOOT..(BOOT + 100_000)) {
        let ancestors = build_ancestors(&deltas);
        let d = next_difficulty(next_height, &ancestors, BOOT, TARGET_BLOCK_TIME, 1, DIFF_MIN, DIFF_MAX, WINDOW, CLAMP);
        prop_assert!(d >= DIFF_MIN && d <= DIFF_MAX);
    }

    #[test]
    fn retarget_is_pinned_to_one_below_bootstrap(deltas in ancestors_strategy(), next_height in 0u32..BOOT) {
        let ancestors = build_ancestors(&deltas);
        let d = next_difficulty(next_height, &ancestors, BOOT, TARGET_BLOCK_TIME, 1, DIFF_MIN, DIFF_MAX, WINDOW, CLAMP);
        prop_assert_eq!(d, 1);
    }

    #[test]
    fn merkle_root_is_deterministic(seeds in proptest::collection::vec(any::<u8>(), 1..20)) {
        let txids: Vec<Hash256> = seeds.iter().map(|s| Hash256([*s; 32])).collect();
        prop_assert_eq!(merkle_root(&txids), merkle_root(&txids));
    }

    #[test]
    fn merkle_root_changes_when_any_leaf_changes(seeds in proptest::collection::vec(any::<u8>(), 2..20), flip_index in 0usize..19, flip_byte in any::<u8>()) {
        let txids: Vec<Hash256> = seeds.iter().map(|s| Hash256([*s; 32])).collect();
        let idx = flip_index % txids.len();
        let mut tampered = txids.clone();
        tampered[idx].0[0] ^= flip_byte.max(1);
        if tampered[idx] != txids[idx] {
            prop_assert_ne!(merkle_root(&txids), merkle_root(&tampered));
        }
    }

    #[test]
    fn block_reward_never_drops_below_the_floor(height in 0u64..100_000_000, initial in 1e-6f64..1_000.0, interval in 1u64..1_000_000) {
        let r = block_reward(height, initial, interval);
        prop_assert!(r >= REWARD_FLOOR);
    }

    #[test]
    fn block_reward_is_non_increasing_across_a_halving_boundary(epoch in 0u64..10, initial in 1.0f64..1_000.0, interval in 1u64..100_000) {
        let before = block_reward(epoch * interval + interval - 1, initial, interval);
        let after = block_reward((epoch + 1) * interval, initial, interval);
        prop_assert!(after <= before);
    }

    #[test]
    fn cumulative_reward_equals_the_sum_of_its_terms(start in 0u64..1_000, span in 0u64..500, initial in 1.0f64..200.0, interval in 1u64..100_000) {
        let end = start + span;
        let summed: f64 = (start..=end).map(|h| block_reward(h, initial, interval)).sum();
        prop_assert!((cumulative_reward(start, end, initial, interval) - summed).abs() < 1e-9);
    }

    #[test]
    fn admitting_the_same_transaction_twice_is_idempotent(amount in 1u64..1_000_000, fee_micros in 1u64..1000) {
        let (mut store, _params) = dev_store();
        let owner = KeyPair::generate();
        let to = KeyPair::generate().public_key().address();
        let outpoint = seed_utxo(&mut store, &owner, amount + 10_000, false, 0);
        let fee = fee_micros as f64 / 1_000_000.0;
        let tx = spend_tx(&owner, outpoint, &to, amount, fee);

        let first = mempool::admit(&store, &tx, 0.0, 1_000).unwrap();
        let Admitted::New(entry) = first else { panic!("expected a fresh admission") };
        store.mempool_insert(entry.clone());

        let second = mempool::admit(&store, &tx, 0.0, 2_000).unwrap();
        let Admitted::Existing(existing) = second else { panic!("resubmission must be recognized as existing") };
        prop_assert_eq!(existing.txid, entry.txid);
        prop_assert_eq!(store.mempool_all().len(), 1);
    }

    #[test]
    fn a_second_spend_of_an_already_claimed_outpoint_is_always_rejected(amount in 1u64..1_000_000) {
        let (mut store, _params) = dev_store();
        let owner = KeyPair::generate();
        let victim = KeyPair::generate().public_key().address();
        let attacker = KeyPair::generate().public_key().address();
        let outpoint = seed_utxo(&mut store, &owner, amount + 10_000, false, 0);

        let first = spend_tx(&owner, outpoint, &victim, amount, 0.0001);
        let second = spend_tx(&owner, outpoint, &attacker, amount, 0.0002);

        let admitted = mempool::admit(&store, &first, 0.0, 1_000).unwrap();
        let Admitted::New(entry) = admitted else { panic!("expected a fresh admission") };
        store.mempool_insert(entry);

        let err = mempool::admit(&store, &second, 0.0, 1_000).unwrap_err();
        prop_assert!(matches!(err, AdmissionError::DoubleSpend { .. }));
    }
}

#[test]
fn amount_to_sats_round_trip_is_exact_for_whole_cent_values() {
    for cents in 0u64..10_000 {
        let coins = cents as f64 / 100.0;
        let sats = amount_to_sats(coins).unwrap();
        assert_eq!(sats % 1_000_000, 0, "whole-cent amounts land on whole-sat boundaries");
    }
}

#[test]
fn merkle_root_of_a_single_leaf_is_the_leaf_itself() {
    let leaf = Hash256([7u8; 32]);
    assert_eq!(merkle_root(&[leaf]), leaf);
}

#[test]
fn empty_txid_list_has_a_defined_non_zero_root() {
    let root = merkle_root(&[]);
    assert_ne!(root, Bytes32::ZERO);
}
