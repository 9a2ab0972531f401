//! Protocol constants.
//!
//! Weights are abstract units that bound the serialized size of each block
//! element. A block's weight is the sum of its elements' weights and must stay
//! within the configured budget (default [`MAX_BLOCK_WEIGHT`]).

/// Target time between blocks in seconds.
pub const BLOCK_TIME_SECS: u64 = 60;

/// Number of block intervals in the difficulty retarget window.
pub const DIFFICULTY_WINDOW: u64 = 60;

/// Number of trailing timestamps used for the moving median.
///
/// A new header's timestamp must be strictly greater than the median of the
/// last `MEDIAN_WINDOW` timestamps on its branch.
pub const MEDIAN_WINDOW: u64 = 11;

/// Blocks a coinbase output must wait before it can be spent.
pub const COINBASE_MATURITY: u64 = 60;

/// Largest incubation (extra maturity) a regular output may request.
pub const MAX_INCUBATION: u64 = 1_440;

/// Newly minted value per block, claimed by the coinbase.
pub const BLOCK_SUBSIDY: u64 = 80 * COIN;

/// Base monetary unit.
pub const COIN: u64 = 100_000_000;

/// Weight of a single input.
pub const INPUT_WEIGHT: u64 = 1;
/// Weight of a single output (commitment plus range proof).
pub const OUTPUT_WEIGHT: u64 = 10;
/// Weight of a single kernel.
pub const KERNEL_WEIGHT: u64 = 2;

/// Default weight budget for a block body.
pub const MAX_BLOCK_WEIGHT: u64 = 80_000;

/// Largest weight a single pooled transaction may carry.
pub const MAX_TX_WEIGHT: u64 = 8_000;

/// Weight reserved in every generated block for the coinbase output and kernel.
pub const COINBASE_WEIGHT: u64 = OUTPUT_WEIGHT + KERNEL_WEIGHT;

/// Default maximum number of pooled transactions.
pub const DEFAULT_POOL_MAX_COUNT: usize = 10_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_fits_block_budget() {
        assert!(COINBASE_WEIGHT < MAX_BLOCK_WEIGHT);
        assert!(MAX_TX_WEIGHT + COINBASE_WEIGHT <= MAX_BLOCK_WEIGHT);
    }

    #[test]
    fn median_window_is_odd() {
        assert_eq!(MEDIAN_WINDOW % 2, 1);
    }
}
