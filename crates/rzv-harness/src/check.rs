//! Parity-generation and reconstruction checks across every backend.

use crate::cancel::CancelToken;
use crate::compare::{compare_data, compare_parity};
use crate::golden::GoldenReference;
use crate::inject::corrupt_columns;
use crate::options::{SEPARATOR, TestOptions, Verbosity};
use crate::planner::{PlanOutcome, RecMethod, run_cases};
use crate::random::RandomPool;
use rzv_engine::{MAX_PARITY, RaidzEngine, RaidzMap};
use rzv_error::{Result, RzvError};
use serde::Serialize;
use tracing::{debug, info, warn};

const GEN_METHODS: [&str; MAX_PARITY] = ["gen_p", "gen_pq", "gen_pqr"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    Generation,
    Reconstruction,
}

/// Result of one method on one backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodOutcome {
    pub method: &'static str,
    /// Cases run (1 for parity generation).
    pub cases: usize,
    /// Mismatching columns summed over all cases.
    pub mismatches: usize,
    pub passed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendReport {
    pub name: &'static str,
    /// False when the engine reported the backend as unusable on this host.
    pub supported: bool,
    pub methods: Vec<MethodOutcome>,
}

impl BackendReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.methods.iter().filter(|m| !m.passed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckReport {
    pub kind: CheckKind,
    pub backends: Vec<BackendReport>,
    /// Stopped early by cancellation.
    pub cancelled: bool,
}

impl CheckReport {
    fn new(kind: CheckKind) -> Self {
        Self {
            kind,
            backends: Vec::new(),
            cancelled: false,
        }
    }

    /// Failed methods across all backends.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.backends.iter().map(BackendReport::failures).sum()
    }
}

/// Outcome of a full run: parity generation then reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub options: TestOptions,
    pub generation: CheckReport,
    pub reconstruction: CheckReport,
}

impl VerifyReport {
    #[must_use]
    pub fn failures(&self) -> usize {
        self.generation.failures() + self.reconstruction.failures()
    }

    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.generation.cancelled || self.reconstruction.cancelled
    }

    /// No failures and not cut short.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures() == 0 && !self.cancelled()
    }
}

/// Drives one engine through the checks for one set of options.
///
/// The golden reference is kept between checks and rebuilt only when a check
/// needs a different parity.
pub struct Verifier<'a, E: RaidzEngine + ?Sized> {
    engine: &'a mut E,
    opts: &'a TestOptions,
    pool: &'a RandomPool,
    cancel: CancelToken,
    golden: Option<GoldenReference>,
}

impl<'a, E: RaidzEngine + ?Sized> Verifier<'a, E> {
    pub fn new(
        engine: &'a mut E,
        opts: &'a TestOptions,
        pool: &'a RandomPool,
        cancel: CancelToken,
    ) -> Self {
        Self {
            engine,
            opts,
            pool,
            cancel,
            golden: None,
        }
    }

    /// Run the parity-generation check, then the reconstruction check.
    ///
    /// # Errors
    ///
    /// Propagates golden-reference and engine errors. Mismatches are not
    /// errors; they are counted in the report.
    pub fn run(&mut self) -> Result<VerifyReport> {
        let generation = self.run_gen_check()?;
        let reconstruction = self.run_rec_check()?;
        self.golden = None;
        let report = VerifyReport {
            options: self.opts.clone(),
            generation,
            reconstruction,
        };
        info!(
            failures = report.failures(),
            cancelled = report.cancelled(),
            "verification finished"
        );
        Ok(report)
    }

    /// For every non-reference backend and each parity strength 1..=3,
    /// regenerate parity on a stripe whose parity columns start out as
    /// garbage and compare against the golden parity.
    ///
    /// # Errors
    ///
    /// See [`Verifier::run`].
    pub fn run_gen_check(&mut self) -> Result<CheckReport> {
        self.opts.log(Verbosity::Info, format!("\n{SEPARATOR}\nTesting parity generation..."));
        self.for_each_backend(CheckKind::Generation, |v, golden| {
            let mut methods = Vec::with_capacity(MAX_PARITY);
            for (i, &name) in GEN_METHODS.iter().enumerate() {
                if v.cancel.is_cancelled() {
                    return Ok((methods, true));
                }
                let parity = i + 1;
                v.opts.log(Verbosity::Debug, format!("\t\tTesting method [{name}] ..."));
                let mut map = trial_map(&*v.engine, v.opts, v.pool, parity)?;
                if !v.opts.sanity {
                    v.engine.generate_parity(&mut map);
                }
                let mismatches = compare_parity(&map, golden.map(), parity);
                report_method(v.opts, name, mismatches);
                methods.push(MethodOutcome {
                    method: name,
                    cases: 1,
                    mismatches,
                    passed: mismatches == 0,
                });
            }
            Ok((methods, false))
        })
    }

    /// For every non-reference backend, run all seven reconstruction methods
    /// over every combination of lost data columns.
    ///
    /// # Errors
    ///
    /// See [`Verifier::run`].
    pub fn run_rec_check(&mut self) -> Result<CheckReport> {
        self.opts.log(Verbosity::Info, format!("\n{SEPARATOR}\nTesting data reconstruction..."));
        self.for_each_backend(CheckKind::Reconstruction, |v, golden| {
            let mut map = trial_map(&*v.engine, v.opts, v.pool, MAX_PARITY)?;
            v.engine.generate_parity(&mut map);

            let mut methods = Vec::with_capacity(RecMethod::ALL.len());
            for method in RecMethod::ALL {
                if v.cancel.is_cancelled() {
                    return Ok((methods, true));
                }
                v.opts
                    .log(Verbosity::Debug, format!("\t\tTesting method [{}] ...", method.name()));
                let outcome = run_method(
                    &*v.engine,
                    v.opts,
                    v.pool,
                    &v.cancel,
                    golden.map(),
                    &mut map,
                    method,
                )?;
                report_method(v.opts, method.name(), outcome.mismatches);
                methods.push(MethodOutcome {
                    method: method.name(),
                    cases: outcome.cases,
                    mismatches: outcome.mismatches,
                    passed: outcome.failed_cases == 0,
                });
                if outcome.cancelled {
                    return Ok((methods, true));
                }
            }
            Ok((methods, false))
        })
    }

    /// Iterate the backends after the reference, skipping those the engine
    /// reports as unsupported. `body` returns the backend's method outcomes
    /// and whether it stopped on cancellation.
    ///
    /// The golden reference is settled before any backend is selected, since
    /// building it switches the engine to the reference backend.
    fn for_each_backend<F>(&mut self, kind: CheckKind, mut body: F) -> Result<CheckReport>
    where
        F: FnMut(&mut Self, &GoldenReference) -> Result<(Vec<MethodOutcome>, bool)>,
    {
        let mut report = CheckReport::new(kind);
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        let golden = GoldenReference::reuse_or_build(
            &mut self.golden,
            &mut *self.engine,
            self.opts,
            self.pool,
            MAX_PARITY,
        )?;
        let names = self.engine.implementation_names();
        for &name in names.iter().skip(1) {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            match self.engine.set_implementation(name) {
                Ok(()) => {}
                Err(err) if err.is_unsupported() => {
                    warn!(backend = name, "skipping unsupported backend");
                    self.opts
                        .log(Verbosity::Info, format!("Testing [{name}] implementation... [SKIP]"));
                    report.backends.push(BackendReport {
                        name,
                        supported: false,
                        methods: Vec::new(),
                    });
                    continue;
                }
                Err(err) => return Err(err),
            }

            self.opts.log(Verbosity::Info, format!("Testing [{name}] implementation..."));
            let (methods, cancelled) = body(self, &golden)?;
            let backend = BackendReport {
                name,
                supported: true,
                methods,
            };
            let failures = backend.failures();
            if failures == 0 {
                self.opts.log(Verbosity::Info, format!("[{name}] ... [PASS]"));
            } else {
                warn!(?kind, backend = name, failures, "backend failed");
                self.opts
                    .log(Verbosity::Info, format!("[{name}] ... [FAIL] ({failures} method(s))"));
            }
            report.backends.push(backend);
            if cancelled {
                report.cancelled = true;
                break;
            }
        }
        self.golden = Some(golden);
        Ok(report)
    }
}

/// Lay out a trial stripe at offset zero with `parity` columns and fill its
/// parity columns with garbage.
fn trial_map<E: RaidzEngine + ?Sized>(
    engine: &E,
    opts: &TestOptions,
    pool: &RandomPool,
    parity: usize,
) -> Result<RaidzMap> {
    let size = usize::try_from(opts.size)
        .map_err(|_| RzvError::InvalidGeometry(format!("size {} overflows usize", opts.size)))?;
    let mut map = engine.map_alloc(&opts.geometry(parity, 0), &pool.payload(size))?;
    let parity_cols: Vec<usize> = (0..parity).collect();
    corrupt_columns(&mut map, &parity_cols, pool);
    Ok(map)
}

/// Run every failure case of `method` against `map`, which must carry valid
/// parity. Lost columns are overwritten before each reconstruction.
fn run_method<E: RaidzEngine + ?Sized>(
    engine: &E,
    opts: &TestOptions,
    pool: &RandomPool,
    cancel: &CancelToken,
    golden: &RaidzMap,
    map: &mut RaidzMap,
    method: RecMethod,
) -> Result<PlanOutcome> {
    let row_data_cols = map.rows.first().map_or(0, |row| row.data_col_count());
    let data_cols = opts.data_cols.min(row_data_cols);
    let parity = map.parity();
    run_cases(method.cases(data_cols, parity), cancel, |case| {
        corrupt_columns(map, case.data_targets(), pool);
        if !opts.sanity {
            engine.reconstruct(map, case.targets())?;
        }
        let mismatches = compare_data(map, golden);
        if mismatches != 0 {
            debug!(method = method.name(), targets = ?case.targets(), mismatches, "reconstruction mismatch");
            opts.log(
                Verbosity::Debug,
                format!("\t\tREC {} {:?} ... [FAIL]", method.name(), case.data_targets()),
            );
        }
        Ok(mismatches)
    })
}

fn report_method(opts: &TestOptions, name: &str, mismatches: usize) {
    if mismatches == 0 {
        opts.log(Verbosity::Debug, format!("\t\t[{name}] ... [PASS]"));
    } else {
        opts.log(Verbosity::Debug, format!("\t\t[{name}] ... [FAIL] ({mismatches} column(s))"));
    }
}

/// Verify every backend of `engine` under `opts`.
///
/// # Errors
///
/// See [`Verifier::run`].
pub fn run_test<E: RaidzEngine + ?Sized>(
    engine: &mut E,
    opts: &TestOptions,
    pool: &RandomPool,
    cancel: CancelToken,
) -> Result<VerifyReport> {
    Verifier::new(engine, opts, pool, cancel).run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rzv_engine::{Implementation, MathEngine};

    fn opts(data_cols: usize, size: u64) -> TestOptions {
        TestOptions {
            data_cols,
            size,
            ..TestOptions::default()
        }
    }

    fn pool() -> RandomPool {
        RandomPool::generate(17, 1 << 16)
    }

    #[test]
    fn every_backend_passes() {
        let mut engine = MathEngine::new();
        let pool = pool();
        let report = run_test(&mut engine, &opts(4, 1 << 13), &pool, CancelToken::new())
            .expect("verification runs");
        assert!(report.passed(), "{report:?}");
        assert_eq!(report.generation.backends.len(), Implementation::ALL.len() - 1);
        for backend in &report.reconstruction.backends {
            assert!(backend.supported);
            assert_eq!(backend.methods.len(), 7);
            let pqr = backend.methods.last().expect("rec_pqr");
            assert_eq!(pqr.method, "rec_pqr");
            assert_eq!(pqr.cases, 4);
        }
    }

    #[test]
    fn sanity_mode_fails_every_method() {
        let mut engine = MathEngine::new();
        let pool = pool();
        let mut o = opts(4, 1 << 13);
        o.sanity = true;
        let report = run_test(&mut engine, &o, &pool, CancelToken::new()).expect("runs");
        assert!(!report.passed());
        for backend in &report.generation.backends {
            assert_eq!(backend.failures(), 3);
        }
        for backend in &report.reconstruction.backends {
            assert_eq!(backend.failures(), 7);
        }
    }

    #[test]
    fn disabled_backend_is_reported_as_skipped() {
        let mut engine = MathEngine::new().without(Implementation::Swar64);
        let pool = pool();
        let report = run_test(&mut engine, &opts(3, 1 << 12), &pool, CancelToken::new())
            .expect("runs");
        assert!(report.passed());
        let swar = report
            .generation
            .backends
            .iter()
            .find(|b| b.name == "swar64")
            .expect("listed");
        assert!(!swar.supported);
        assert!(swar.methods.is_empty());
    }

    #[test]
    fn cancelled_run_reports_partial_results() {
        let mut engine = MathEngine::new();
        let pool = pool();
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = run_test(&mut engine, &opts(4, 1 << 12), &pool, cancel).expect("runs");
        assert!(report.cancelled());
        assert!(!report.passed());
        assert!(report.generation.backends.is_empty());
    }

    #[test]
    fn narrow_io_skips_methods_without_enough_columns() {
        // One sector of data: only one data column is populated.
        let mut engine = MathEngine::new();
        let pool = pool();
        let report = run_test(&mut engine, &opts(8, 512), &pool, CancelToken::new())
            .expect("runs");
        assert!(report.passed(), "{report:?}");
        let backend = &report.reconstruction.backends[0];
        assert_eq!(backend.methods[0].cases, 1);
        assert_eq!(backend.methods[6].cases, 0);
    }
}
