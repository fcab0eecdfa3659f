//! Column-by-column comparison of a trial stripe against the golden one.
//!
//! Both functions return the number of mismatching columns; zero means the
//! stripes agree. Structural disagreement (different row counts, parity out
//! of range) is a harness bug, not a backend defect, and panics.

use rzv_engine::{MAX_PARITY, RaidzMap};
use tracing::debug;

fn assert_same_shape(trial: &RaidzMap, golden: &RaidzMap) {
    assert_eq!(
        trial.row_count(),
        golden.row_count(),
        "trial and golden stripes have different row counts"
    );
}

/// Compare the first `parity` parity columns of every row.
///
/// # Panics
///
/// If `parity` is outside `1..=3` or exceeds either map's parity, the maps
/// have different row counts, or a column empty in the golden stripe is not
/// empty in the trial.
#[must_use]
pub fn compare_parity(trial: &RaidzMap, golden: &RaidzMap, parity: usize) -> usize {
    assert!(
        (1..=MAX_PARITY).contains(&parity),
        "parity {parity} outside 1..={MAX_PARITY}"
    );
    assert!(parity <= trial.parity() && parity <= golden.parity());
    assert_same_shape(trial, golden);

    let mut mismatches = 0;
    for (r, (t, g)) in trial.rows.iter().zip(&golden.rows).enumerate() {
        for p in 0..parity {
            let (tc, gc) = (t.parity_col(p), g.parity_col(p));
            if gc.size() == 0 {
                assert_eq!(tc.size(), 0, "empty golden parity column {p} in row {r}");
                continue;
            }
            if tc.data() != gc.data() {
                debug!(row = r, parity_col = p, "parity column differs");
                mismatches += 1;
            }
        }
    }
    mismatches
}

/// Compare every data column of every row.
///
/// # Panics
///
/// If the maps have different row counts, the trial row is narrower than the
/// golden one, or a column empty in the golden stripe is not empty in the
/// trial.
#[must_use]
pub fn compare_data(trial: &RaidzMap, golden: &RaidzMap) -> usize {
    assert_same_shape(trial, golden);

    let mut mismatches = 0;
    for (r, (t, g)) in trial.rows.iter().zip(&golden.rows).enumerate() {
        for i in 0..g.data_col_count() {
            let (tc, gc) = (t.data_col(i), g.data_col(i));
            if gc.size() == 0 {
                assert_eq!(tc.size(), 0, "empty golden data column {i} in row {r}");
                continue;
            }
            if tc.data() != gc.data() {
                debug!(row = r, data_col = i, "data column differs");
                mismatches += 1;
            }
        }
    }
    mismatches
}
