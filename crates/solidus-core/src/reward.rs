//! Monetary policy (§4.5.8).
//!
//! `block_reward(H) = max(1e-8, initial / 2^(H / halving_interval))`. Unlike
//! an integer-shift halving schedule, this stays strictly positive forever
//! at the floor value rather than truncating to zero.

/// Minimum reward a block ever pays, once halving has driven the computed
/// value below this floor.
pub const REWARD_FLOOR: f64 = 1e-8;

/// Which halving epoch a height falls in.
pub fn halving_epoch(height: u64, halving_interval_blocks: u64) -> u64 {
    height / halving_interval_blocks
}

/// The block reward (in coins, not satoshis) for a given height.
pub fn block_reward(height: u64, initial_block_reward: f64, halving_interval_blocks: u64) -> f64 {
    let epoch = halving_epoch(height, halving_interval_blocks);
    // 2^epoch as f64 overflows to infinity long before u32::MAX; at that
    // point the reward is indistinguishable from the floor.
    let divisor = 2f64.powi(epoch.min(1024) as i32);
    (initial_block_reward / divisor).max(REWARD_FLOOR)
}

/// Sum of `block_reward(h)` for `h` in `[start, end]` inclusive.
pub fn cumulative_reward(
    start: u64,
    end: u64,
    initial_block_reward: f64,
    halving_interval_blocks: u64,
) -> f64 {
    (start..=end)
        .map(|h| block_reward(h, initial_block_reward, halving_interval_blocks))
        .sum()
}
