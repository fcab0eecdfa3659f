//! Reconstruction failure planning.
//!
//! Every reconstruction method pairs a set of parity columns it may not use
//! with a number of lost data columns. The planner enumerates all ways to lose
//! that many data columns and runs one trial per combination.

use crate::cancel::CancelToken;
use rzv_engine::MAX_PARITY;
use rzv_error::Result;
use serde::Serialize;
use tracing::trace;

/// How many data columns a method recovers at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecFamily {
    Single,
    Double,
    Triple,
}

impl RecFamily {
    #[must_use]
    pub fn failures(self) -> usize {
        match self {
            Self::Single => 1,
            Self::Double => 2,
            Self::Triple => 3,
        }
    }
}

/// The seven reconstruction methods, named after the parity they rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RecMethod {
    P,
    Q,
    R,
    Pq,
    Pr,
    Qr,
    Pqr,
}

impl RecMethod {
    pub const ALL: [Self; 7] = [
        Self::P,
        Self::Q,
        Self::R,
        Self::Pq,
        Self::Pr,
        Self::Qr,
        Self::Pqr,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::P => "rec_p",
            Self::Q => "rec_q",
            Self::R => "rec_r",
            Self::Pq => "rec_pq",
            Self::Pr => "rec_pr",
            Self::Qr => "rec_qr",
            Self::Pqr => "rec_pqr",
        }
    }

    #[must_use]
    pub fn family(self) -> RecFamily {
        match self {
            Self::P | Self::Q | Self::R => RecFamily::Single,
            Self::Pq | Self::Pr | Self::Qr => RecFamily::Double,
            Self::Pqr => RecFamily::Triple,
        }
    }

    /// Parity columns marked unusable so the engine is forced onto this
    /// method (0 = P, 1 = Q, 2 = R).
    #[must_use]
    pub fn unusable_parity(self) -> &'static [usize] {
        match self {
            Self::P => &[1, 2],
            Self::Q => &[0, 2],
            Self::R => &[0, 1],
            Self::Pq => &[2],
            Self::Pr => &[1],
            Self::Qr => &[0],
            Self::Pqr => &[],
        }
    }

    /// Lazily enumerate every failure case over `data_cols` data columns of a
    /// stripe with `parity` parity columns.
    #[must_use]
    pub fn cases(self, data_cols: usize, parity: usize) -> FailureCases {
        FailureCases {
            method: self,
            parity,
            combos: Combinations::new(data_cols, self.family().failures()),
        }
    }
}

/// One set of distinct data-column indices in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Combination {
    idx: [usize; MAX_PARITY],
    len: usize,
}

impl Combination {
    #[must_use]
    pub fn as_slice(&self) -> &[usize] {
        &self.idx[..self.len]
    }
}

/// Lexicographic `k`-combinations of `0..n`, for `k` in `1..=3`.
#[derive(Debug, Clone)]
pub struct Combinations {
    n: usize,
    k: usize,
    current: Option<[usize; MAX_PARITY]>,
    started: bool,
}

impl Combinations {
    /// # Panics
    ///
    /// If `k` is zero or larger than three.
    #[must_use]
    pub fn new(n: usize, k: usize) -> Self {
        assert!((1..=MAX_PARITY).contains(&k), "k={k} outside 1..={MAX_PARITY}");
        Self {
            n,
            k,
            current: None,
            started: false,
        }
    }
}

impl Iterator for Combinations {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        let (n, k) = (self.n, self.k);
        if !self.started {
            self.started = true;
            if k <= n {
                self.current = Some([0, 1, 2]);
            }
        } else {
            let idx = self.current.as_mut()?;
            // Rightmost position that can still move right.
            let pos = (0..k).rev().find(|&i| idx[i] < n - k + i);
            match pos {
                Some(i) => {
                    idx[i] += 1;
                    for j in i + 1..k {
                        idx[j] = idx[j - 1] + 1;
                    }
                }
                None => self.current = None,
            }
        }
        self.current.map(|idx| Combination { idx, len: k })
    }
}

/// Columns handed to the engine for one reconstruction trial: the parity it
/// may not use followed by the lost data columns, all as physical indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureCase {
    targets: [usize; MAX_PARITY],
    len: usize,
    data_from: usize,
}

impl FailureCase {
    #[must_use]
    pub fn targets(&self) -> &[usize] {
        &self.targets[..self.len]
    }

    /// The lost data columns (physical indices).
    #[must_use]
    pub fn data_targets(&self) -> &[usize] {
        &self.targets[self.data_from..self.len]
    }
}

/// Iterator returned by [`RecMethod::cases`].
#[derive(Debug, Clone)]
pub struct FailureCases {
    method: RecMethod,
    parity: usize,
    combos: Combinations,
}

impl Iterator for FailureCases {
    type Item = FailureCase;

    fn next(&mut self) -> Option<FailureCase> {
        let combo = self.combos.next()?;
        let mut targets = [0; MAX_PARITY];
        let mut len = 0;
        for &p in self.method.unusable_parity() {
            if p < self.parity {
                targets[len] = p;
                len += 1;
            }
        }
        let data_from = len;
        for &x in combo.as_slice() {
            targets[len] = self.parity + x;
            len += 1;
        }
        Some(FailureCase {
            targets,
            len,
            data_from,
        })
    }
}

/// Tally of one method's trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PlanOutcome {
    pub cases: usize,
    /// Data-column mismatches summed over all cases.
    pub mismatches: usize,
    /// Cases with at least one mismatch.
    pub failed_cases: usize,
    pub cancelled: bool,
}

/// Run `trial` for each case until the cases run out or `cancel` fires.
/// `trial` returns the number of mismatching columns for its case.
///
/// # Errors
///
/// The first error returned by `trial`.
pub fn run_cases<I, F>(cases: I, cancel: &CancelToken, mut trial: F) -> Result<PlanOutcome>
where
    I: IntoIterator<Item = FailureCase>,
    F: FnMut(&FailureCase) -> Result<usize>,
{
    let mut outcome = PlanOutcome::default();
    for case in cases {
        if cancel.is_cancelled() {
            trace!(cases = outcome.cases, "plan cancelled");
            outcome.cancelled = true;
            break;
        }
        let mismatches = trial(&case)?;
        outcome.cases += 1;
        outcome.mismatches += mismatches;
        if mismatches != 0 {
            outcome.failed_cases += 1;
        }
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn binomial(n: usize, k: usize) -> usize {
        if k > n {
            return 0;
        }
        (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
    }

    #[test]
    fn combinations_are_lexicographic() {
        let all: Vec<Vec<usize>> = Combinations::new(4, 2)
            .map(|c| c.as_slice().to_vec())
            .collect();
        assert_eq!(
            all,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3]
            ]
        );
    }

    #[test]
    fn too_few_columns_yield_nothing() {
        assert_eq!(Combinations::new(2, 3).count(), 0);
        assert_eq!(Combinations::new(0, 1).count(), 0);
        assert_eq!(Combinations::new(3, 3).count(), 1);
    }

    #[test]
    fn method_names_and_families() {
        let names: Vec<_> = RecMethod::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(
            names,
            ["rec_p", "rec_q", "rec_r", "rec_pq", "rec_pr", "rec_qr", "rec_pqr"]
        );
        for m in RecMethod::ALL {
            assert_eq!(m.unusable_parity().len() + m.family().failures(), 3);
        }
    }

    #[test]
    fn single_failure_targets() {
        let cases: Vec<FailureCase> = RecMethod::Q.cases(3, 3).collect();
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].targets(), &[0, 2, 3]);
        assert_eq!(cases[2].targets(), &[0, 2, 5]);
        assert_eq!(cases[2].data_targets(), &[5]);
    }

    #[test]
    fn triple_failure_targets_are_all_data() {
        let first = RecMethod::Pqr.cases(8, 3).next().expect("case");
        assert_eq!(first.targets(), &[3, 4, 5]);
        assert_eq!(first.data_targets(), first.targets());
        assert_eq!(RecMethod::Pqr.cases(8, 3).count(), 56);
    }

    #[test]
    fn missing_parity_is_not_targeted() {
        let case = RecMethod::Pr.cases(4, 2).next().expect("case");
        assert_eq!(case.targets(), &[1, 2, 3]);
        assert_eq!(case.data_targets(), &[2, 3]);
    }

    #[test]
    fn run_cases_tallies_and_stops_on_cancel() {
        let cancel = CancelToken::new();
        let outcome = run_cases(RecMethod::P.cases(5, 3), &cancel, |case| {
            Ok(usize::from(case.data_targets()[0] == 4))
        })
        .expect("no errors");
        assert_eq!(outcome.cases, 5);
        assert_eq!(outcome.failed_cases, 1);
        assert!(!outcome.cancelled);

        let mut seen = 0;
        let outcome = run_cases(RecMethod::Pq.cases(6, 3), &cancel, |_| {
            seen += 1;
            if seen == 4 {
                cancel.cancel();
            }
            Ok(0)
        })
        .expect("no errors");
        assert_eq!(outcome.cases, 4);
        assert!(outcome.cancelled);
    }

    #[test]
    fn run_cases_propagates_errors() {
        let cancel = CancelToken::new();
        let err = run_cases(RecMethod::R.cases(4, 3), &cancel, |_| {
            Err(rzv_error::RzvError::InvalidTargets("boom".into()))
        });
        assert!(err.is_err());
    }

    proptest! {
        #[test]
        fn case_count_is_binomial(n in 0_usize..20, method in 0_usize..7) {
            let m = RecMethod::ALL[method];
            let k = m.family().failures();
            prop_assert_eq!(m.cases(n, 3).count(), binomial(n, k));
        }

        #[test]
        fn combinations_are_strictly_increasing(n in 1_usize..12, k in 1_usize..=3) {
            for c in Combinations::new(n, k) {
                let s = c.as_slice();
                prop_assert_eq!(s.len(), k);
                prop_assert!(s.windows(2).all(|w| w[0] < w[1]));
                prop_assert!(s.iter().all(|&x| x < n));
            }
        }
    }
}
