//! Total difficulty arithmetic.

use num_bigint::BigUint;

/// Cumulative proof-of-work difficulty from genesis through a block.
///
/// Difficulties are unbounded non-negative integers; the canonical
/// chain-selection metric.
pub type TotalDifficulty = BigUint;

/// Check whether two difficulties are within 20% of each other.
///
/// Evaluates `|a - b| <= 0.2 * max(a, b)` exactly in integer
/// arithmetic, as `5 * |a - b| <= max(a, b)`.
pub fn within_twenty_percent(a: &TotalDifficulty, b: &TotalDifficulty) -> bool {
    let (hi, lo) = if a >= b { (a, b) } else { (b, a) };
    (hi - lo) * 5u8 <= *hi
}
