//! Fault injection: overwrite selected columns with random-pool content.

use crate::random::RandomPool;
use rzv_engine::{MAX_PARITY, RaidzMap};

/// Overwrite column `t` of every row for each `t` in `targets`.
///
/// Indices are physical (parity columns first). Columns are filled from the
/// start of the pool, so corrupting a column whose original content also came
/// from the pool start can leave it unchanged; reconstruction must still
/// produce the right bytes.
///
/// # Panics
///
/// If more than three targets are given or a target is outside a row.
pub fn corrupt_columns(map: &mut RaidzMap, targets: &[usize], pool: &RandomPool) {
    assert!(
        targets.len() <= MAX_PARITY,
        "at most {MAX_PARITY} columns can be corrupted"
    );
    for row in &mut map.rows {
        for &t in targets {
            pool.fill(row.cols[t].data_mut());
        }
    }
}
