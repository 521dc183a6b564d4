//! Difficulty retargeting (§4.5.4).
//!
//! Below the bootstrap height difficulty is pinned to 1. At and above it, a
//! rolling window of up to `retarget_window` headers estimates the actual
//! block interval and nudges difficulty by a clamped ratio toward the target
//! block time.

use num_bigint::BigUint;

use crate::hash::bytes32_to_biguint;
use crate::types::Bytes32;

/// One ancestor header's retarget-relevant fields.
#[derive(Debug, Clone, Copy)]
pub struct RetargetHeader {
    pub timestamp: u64,
    pub cumulative_work: Bytes32,
}

/// Compute the difficulty for the block at `next_height`, given up to
/// `retarget_window` immediately preceding headers in oldest-to-newest order
/// (`ancestors.last()` is the current tip).
///
/// `next_height` is the height of the block being produced, i.e. one past
/// the current tip. Bootstrap applies while `next_height` is below
/// `bootstrap_height`.
pub fn next_difficulty(
    next_height: u32,
    ancestors: &[RetargetHeader],
    bootstrap_height: u32,
    target_block_time_sec: u64,
    difficulty_initial: u64,
    difficulty_min: u64,
    difficulty_max: u64,
    retarget_window: usize,
    retarget_clamp: (f64, f64),
) -> u64 {
    if next_height < bootstrap_height {
        return 1;
    }

    let n = ancestors.len().min(retarget_window);
    if n < 2 {
        return difficulty_initial.max(1);
    }
    let window = &ancestors[ancestors.len() - n..];

    let actual_avg = ((window[n - 1].timestamp as i128 - window[0].timestamp as i128)
        / (n as i128 - 1))
        .max(1) as f64;

    let last_work = bytes32_to_biguint(&window[n - 1].cumulative_work);
    let prev_work = bytes32_to_biguint(&window[n - 2].cumulative_work);
    let last_diff = last_work
        .checked_sub(&prev_work)
        .unwrap_or_else(|| BigUint::from(1u8))
        .max(BigUint::from(1u8));
    let last_diff = biguint_to_u64_saturating(&last_diff);

    let (clamp_low, clamp_high) = retarget_clamp;
    let ratio = (target_block_time_sec as f64 / actual_avg).clamp(clamp_low, clamp_high);

    let new_diff = (last_diff as f64 * ratio).round() as i128;
    new_diff.clamp(difficulty_min as i128, difficulty_max as i128) as u64
}

fn biguint_to_u64_saturating(n: &BigUint) -> u64 {
    let digits = n.to_u64_digits();
    match digits.len() {
        0 => 0,
        1 => digits[0],
        _ => u64::MAX,
    }
}
