//! Difficulty, work and timestamp rules.
//!
//! All functions here are pure functions of branch history: the caller
//! collects the relevant ancestor timestamps (oldest first) and passes them
//! in, so the same rules apply to the active chain and to side branches.
//!
//! # Difficulty target semantics
//!
//! [`BlockHeader::difficulty`](crate::types::BlockHeader) is a u64 where
//! **higher = easier**. The PoW check interprets the first 8 bytes of the
//! header hash as a little-endian u64 and requires it to be ≤ the target. A
//! target of [`MAX_TARGET`] accepts any hash.

use crate::constants::{BLOCK_TIME_SECS, DIFFICULTY_WINDOW, MEDIAN_WINDOW};
use crate::types::BlockHeader;

/// Maximum difficulty adjustment factor per window.
pub const MAX_ADJUSTMENT_FACTOR: u64 = 4;

/// Minimum difficulty target (hardest possible difficulty).
pub const MIN_TARGET: u64 = 1;

/// Maximum (easiest) difficulty target.
pub const MAX_TARGET: u64 = u64::MAX;

/// Compute the next difficulty target from a window of recent timestamps.
///
/// `timestamps` must be ordered oldest to newest. `current_target` is the
/// difficulty target of the most recent block in the window.
///
/// Returns `current_target` unchanged if fewer than 2 timestamps are provided.
/// Otherwise:
///
/// 1. `actual_time = timestamps.last() - timestamps.first()`
/// 2. `expected_time = (timestamps.len() - 1) * BLOCK_TIME_SECS`
/// 3. Clamp actual time to `[expected / 4, expected * 4]`
/// 4. `new_target = current_target * clamped_actual / expected`
/// 5. Clamp result to `[MIN_TARGET, MAX_TARGET]`
pub fn next_target(timestamps: &[u64], current_target: u64) -> u64 {
    if timestamps.len() < 2 {
        return current_target;
    }

    let actual_time = timestamps[timestamps.len() - 1].saturating_sub(timestamps[0]);
    let intervals = (timestamps.len() - 1) as u64;
    let expected_time = intervals * BLOCK_TIME_SECS;
    if expected_time == 0 {
        return current_target;
    }

    let min_time = expected_time / MAX_ADJUSTMENT_FACTOR;
    let max_time = expected_time.saturating_mul(MAX_ADJUSTMENT_FACTOR);
    let clamped = actual_time.max(min_time).min(max_time);

    // u64::MAX * (60 * 60 * 4) fits comfortably in u128.
    let result =
        (current_target as u128).saturating_mul(clamped as u128) / (expected_time as u128);

    (result.min(MAX_TARGET as u128) as u64).max(MIN_TARGET)
}

/// Expected difficulty target for a block at `height`.
///
/// `ancestor_timestamps` are the timestamps of the blocks directly below
/// `height`, oldest first, ending with the parent. Only the trailing
/// `DIFFICULTY_WINDOW + 1` are used. The first block (and a chain with only
/// one ancestor) uses `initial_target`.
pub fn next_difficulty(
    height: u64,
    parent_target: u64,
    ancestor_timestamps: &[u64],
    initial_target: u64,
) -> u64 {
    if height <= 1 {
        return initial_target;
    }
    let window = full_window_size() as usize;
    let start = ancestor_timestamps.len().saturating_sub(window);
    next_target(&ancestor_timestamps[start..], parent_target)
}

/// The number of timestamp entries used in a full difficulty window.
pub const fn full_window_size() -> u64 {
    DIFFICULTY_WINDOW + 1
}

/// Median of the trailing [`MEDIAN_WINDOW`] timestamps (oldest first).
///
/// Returns 0 for an empty slice so the first block is unconstrained.
pub fn moving_median(timestamps: &[u64]) -> u64 {
    let start = timestamps.len().saturating_sub(MEDIAN_WINDOW as usize);
    let mut window: Vec<u64> = timestamps[start..].to_vec();
    if window.is_empty() {
        return 0;
    }
    window.sort_unstable();
    window[window.len() / 2]
}

/// Work contributed by one block at `target`: `u64::MAX / target`.
///
/// A target of `u64::MAX` yields 1, so every block adds at least one unit.
pub fn work_for_target(target: u64) -> u128 {
    u128::from(u64::MAX) / u128::from(target.max(MIN_TARGET))
}

/// Check if a header hash satisfies its own difficulty target.
pub fn check_pow(header: &BlockHeader) -> bool {
    let hash = header.hash();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.0[..8]);
    u64::from_le_bytes(prefix) <= header.difficulty
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spaced_timestamps(start: u64, count: usize, interval: u64) -> Vec<u64> {
        (0..count).map(|i| start + i as u64 * interval).collect()
    }

    #[test]
    fn next_target_short_window_returns_current() {
        assert_eq!(next_target(&[], 1000), 1000);
        assert_eq!(next_target(&[100], 1000), 1000);
    }

    #[test]
    fn on_target_returns_same_difficulty() {
        let ts = spaced_timestamps(1_000_000, 61, BLOCK_TIME_SECS);
        assert_eq!(next_target(&ts, 1_000_000), 1_000_000);
    }

    #[test]
    fn slow_blocks_increase_target() {
        let ts = spaced_timestamps(1_000_000, 61, BLOCK_TIME_SECS * 2);
        assert_eq!(next_target(&ts, 1_000_000), 2_000_000);
    }

    #[test]
    fn fast_blocks_decrease_target() {
        let ts = spaced_timestamps(1_000_000, 61, BLOCK_TIME_SECS / 2);
        assert_eq!(next_target(&ts, 1_000_000), 500_000);
    }

    #[test]
    fn adjustment_clamped_both_ways() {
        let slow = spaced_timestamps(1_000_000, 61, BLOCK_TIME_SECS * 10);
        assert_eq!(next_target(&slow, 1_000_000), 4_000_000);
        let instant = vec![1_000_000; 61];
        assert_eq!(next_target(&instant, 1_000_000), 250_000);
    }

    #[test]
    fn easiest_target_never_overflows() {
        let slow = spaced_timestamps(0, 61, BLOCK_TIME_SECS * 4);
        assert_eq!(next_target(&slow, MAX_TARGET), MAX_TARGET);
    }

    #[test]
    fn first_block_uses_initial_target() {
        assert_eq!(next_difficulty(1, 5, &[], 777), 777);
    }

    #[test]
    fn next_difficulty_uses_trailing_window() {
        // A huge gap before the window must not matter.
        let mut ts = vec![0];
        ts.extend(spaced_timestamps(10_000_000, 61, BLOCK_TIME_SECS));
        assert_eq!(next_difficulty(100, 1_000_000, &ts, MAX_TARGET), 1_000_000);
    }

    #[test]
    fn median_of_trailing_window() {
        assert_eq!(moving_median(&[]), 0);
        assert_eq!(moving_median(&[5]), 5);
        assert_eq!(moving_median(&[3, 1, 2]), 2);
        // Only the last 11 count: [10..=20] has median 15.
        let ts: Vec<u64> = (0..=20).collect();
        assert_eq!(moving_median(&ts), 15);
    }

    #[test]
    fn work_is_inverse_of_target() {
        assert_eq!(work_for_target(MAX_TARGET), 1);
        assert_eq!(work_for_target(MAX_TARGET / 2), 2);
        assert_eq!(work_for_target(0), u128::from(u64::MAX));
        assert!(work_for_target(1_000) > work_for_target(2_000));
    }

    #[test]
    fn max_target_accepts_any_hash() {
        let header = BlockHeader { difficulty: MAX_TARGET, ..BlockHeader::default() };
        assert!(check_pow(&header));
    }

    #[test]
    fn min_target_rejects_typical_hash() {
        let header = BlockHeader { difficulty: 0, nonce: 42, ..BlockHeader::default() };
        assert!(!check_pow(&header));
    }
}
