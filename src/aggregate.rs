//! Reduces per-(chromosome, pair) maxima to one global maximum per pair.
//!
//! Chromosomes share one normalization scale per generation pair, so the
//! reduction runs over every merge task's maximum before any normalize task
//! may start. Pure in-memory fold, no I/O.

use std::collections::HashMap;

/// Group `(pair, max_weight)` results by pair, keeping the greatest value.
///
/// A pair that never produced a finite positive weight ends up at 0 and its
/// files are left unscaled downstream.
pub fn reduce_pair_maxima(
    maxima: impl IntoIterator<Item = (String, f64)>,
) -> HashMap<String, f64> {
    let mut scale: HashMap<String, f64> = HashMap::new();
    for (pair, max_weight) in maxima {
        let entry = scale.entry(pair).or_insert(f64::NEG_INFINITY);
        *entry = entry.max(max_weight);
    }
    scale
}
