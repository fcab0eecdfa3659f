//! Parameter sweep: the full verification over a cross-product of
//! geometries, run on a bounded pool of worker threads.
//!
//! ```text
//!            worker fails            deadline passes
//! Running ───────────────▶ Error ◀── Timeout ◀──────── Running
//!    │                                                (scheduler)
//!    └─ cross-product exhausted ─▶ Finished
//! ```
//!
//! Error and Timeout both stop dispatch; workers already running finish.
//! A worker that fails after the timeout still moves the sweep to Error so
//! that a real mismatch is never reported as a mere timeout.

use crate::cancel::CancelToken;
use crate::check::run_test;
use crate::options::{MAX_BLOCK_SIZE, TestOptions, Verbosity};
use crate::random::{DeterministicRng, RandomPool};
use parking_lot::{Condvar, Mutex};
use rzv_engine::RaidzEngine;
use rzv_error::{EXIT_SWEEP_ERROR, EXIT_SWEEP_TIMEOUT};
use serde::Serialize;
use std::num::NonZeroUsize;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on one condvar wait; state and deadline are re-checked after.
pub const WAIT_SLICE: Duration = Duration::from_secs(1);
/// Print a progress line every this many dispatched trials.
pub const PROGRESS_EVERY: usize = 20;
/// Share of trials forced to fail in sanity mode.
pub const SANITY_FAILURE_PERCENT: u32 = 25;

pub const SWEEP_SIZES: [u64; 6] = [
    512,
    21 * 512,
    13 * 4096,
    1 << 17,
    (1 << 20) - (1 << 12),
    MAX_BLOCK_SIZE,
];
pub const SWEEP_ASHIFTS: [u32; 3] = [9, 12, 14];
pub const SWEEP_DATA_COLS: [usize; 11] = [1, 2, 3, 4, 5, 6, 7, 8, 12, 15, 16];

const SANITY_SEED_SALT: u64 = 0xD1B5_4A32_D192_ED03;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepState {
    Running,
    Finished,
    Error,
    Timeout,
}

impl SweepState {
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Running | Self::Finished => 0,
            Self::Error => EXIT_SWEEP_ERROR,
            Self::Timeout => EXIT_SWEEP_TIMEOUT,
        }
    }
}

/// One geometry of the cross-product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SweepPoint {
    pub size: u64,
    pub ashift: u32,
    pub data_cols: usize,
}

/// Worker slots: available parallelism, but never fewer than two.
#[must_use]
pub fn default_slots() -> usize {
    thread::available_parallelism()
        .map_or(1, NonZeroUsize::get)
        .max(2)
}

#[derive(Debug, Clone)]
pub struct SweepConfig {
    pub sizes: Vec<u64>,
    pub ashifts: Vec<u32>,
    pub data_cols: Vec<usize>,
    /// Stop dispatching once this much time has passed.
    pub timeout: Option<Duration>,
    pub max_slots: usize,
    /// Force a share of trials to fail so the error path is exercised.
    pub sanity: bool,
    pub sanity_failure_percent: u32,
    /// Seeds the per-trial offsets; the sanity generator derives its own
    /// seed from it.
    pub seed: u64,
    /// Expansion settings and output level are taken from here.
    pub base: TestOptions,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            sizes: SWEEP_SIZES.to_vec(),
            ashifts: SWEEP_ASHIFTS.to_vec(),
            data_cols: SWEEP_DATA_COLS.to_vec(),
            timeout: None,
            max_slots: default_slots(),
            sanity: false,
            sanity_failure_percent: SANITY_FAILURE_PERCENT,
            seed: 0,
            base: TestOptions::default(),
        }
    }
}

impl SweepConfig {
    /// Valid geometries in dispatch order (size, then ashift, then data
    /// columns). Payloads smaller than one sector are left out.
    pub fn points(&self) -> impl Iterator<Item = SweepPoint> + '_ {
        self.sizes
            .iter()
            .flat_map(move |&size| {
                self.ashifts.iter().flat_map(move |&ashift| {
                    self.data_cols.iter().map(move |&data_cols| SweepPoint {
                        size,
                        ashift,
                        data_cols,
                    })
                })
            })
            .filter(|p| p.size >= 1 << p.ashift)
    }

    /// Number of valid geometries.
    #[must_use]
    pub fn total(&self) -> usize {
        self.points().count()
    }

    /// Options for one trial. The golden offset is a random multiple of the
    /// sector size; sanity mode is never passed down to the trial itself.
    #[must_use]
    pub fn trial_options(&self, point: SweepPoint, rng: &mut DeterministicRng) -> TestOptions {
        TestOptions {
            ashift: point.ashift,
            offset: (1_u64 << point.ashift) * rng.next_u31(),
            data_cols: point.data_cols,
            size: point.size,
            expand: self.base.expand,
            expand_offset: self.base.expand_offset,
            verbosity: Verbosity::All,
            sanity: false,
        }
    }
}

#[derive(Debug)]
struct SweepShared {
    state: SweepState,
    free_slots: usize,
    failed: Option<TestOptions>,
    failures: usize,
    forced_failures: usize,
}

/// Sweep state, slot count and the failing-options snapshot behind one lock.
#[derive(Debug)]
pub struct SweepControl {
    shared: Mutex<SweepShared>,
    wakeup: Condvar,
    capacity: usize,
}

impl SweepControl {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Mutex::new(SweepShared {
                state: SweepState::Running,
                free_slots: capacity,
                failed: None,
                failures: 0,
                forced_failures: 0,
            }),
            wakeup: Condvar::new(),
            capacity,
        }
    }

    #[must_use]
    pub fn state(&self) -> SweepState {
        self.shared.lock().state
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.shared.lock().free_slots
    }

    #[must_use]
    pub fn failed_options(&self) -> Option<TestOptions> {
        self.shared.lock().failed.clone()
    }

    /// Block until a slot is free, the sweep leaves Running, `cancel` fires
    /// or `deadline` passes. Passing the deadline moves a running sweep to
    /// Timeout and cancels `cancel`.
    ///
    /// Returns `None` when no more work should be dispatched.
    pub fn acquire(&self, deadline: Option<Instant>, cancel: &CancelToken) -> Option<SlotGuard<'_>> {
        let mut shared = self.shared.lock();
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) && shared.state == SweepState::Running {
                shared.state = SweepState::Timeout;
                cancel.cancel();
                info!("sweep timed out");
            }
            if shared.state != SweepState::Running || cancel.is_cancelled() {
                return None;
            }
            if shared.free_slots > 0 {
                shared.free_slots -= 1;
                return Some(SlotGuard {
                    control: self,
                    trial: None,
                });
            }
            // Timed out waits fall through to the re-checks above.
            let _ = self.wakeup.wait_for(&mut shared, WAIT_SLICE);
        }
    }

    /// Record a failed trial. The first failure's options are kept.
    pub fn record_failure(&self, opts: &TestOptions, forced: bool) {
        self.fail(Some(opts), forced);
    }

    fn fail(&self, opts: Option<&TestOptions>, forced: bool) {
        let mut shared = self.shared.lock();
        shared.failures += 1;
        if forced {
            shared.forced_failures += 1;
        }
        if matches!(shared.state, SweepState::Running | SweepState::Timeout) {
            info!(from = ?shared.state, "sweep moved to error");
            shared.state = SweepState::Error;
        }
        if shared.failed.is_none() {
            shared.failed = opts.cloned();
        }
        drop(shared);
        self.wakeup.notify_all();
    }

    fn release(&self) {
        let mut shared = self.shared.lock();
        shared.free_slots += 1;
        drop(shared);
        self.wakeup.notify_all();
    }

    /// Wait until every slot has been returned.
    pub fn drain(&self) {
        let mut shared = self.shared.lock();
        while shared.free_slots < self.capacity {
            let _ = self.wakeup.wait_for(&mut shared, WAIT_SLICE);
        }
    }

    /// Move a still-running sweep to Finished and return the final state.
    pub fn finish(&self) -> SweepState {
        let mut shared = self.shared.lock();
        if shared.state == SweepState::Running {
            shared.state = SweepState::Finished;
        }
        shared.state
    }

    fn counts(&self) -> (usize, usize) {
        let shared = self.shared.lock();
        (shared.failures, shared.forced_failures)
    }
}

/// A held worker slot. Dropping it returns the slot; dropping it while the
/// thread is panicking also records the trial as failed.
#[derive(Debug)]
pub struct SlotGuard<'a> {
    control: &'a SweepControl,
    trial: Option<TestOptions>,
}

impl SlotGuard<'_> {
    /// Attach the options of the trial running in this slot.
    #[must_use]
    pub fn with_trial(mut self, opts: TestOptions) -> Self {
        self.trial = Some(opts);
        self
    }
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            warn!("sweep worker panicked");
            self.control.fail(self.trial.as_ref(), false);
        }
        self.control.release();
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub state: SweepState,
    /// Trials dispatched.
    pub tried: usize,
    /// Valid geometries in the cross-product.
    pub total: usize,
    pub failures: usize,
    /// Failures injected by sanity mode rather than found in a backend.
    pub forced_failures: usize,
    pub sanity: bool,
    pub elapsed_ms: u64,
    pub failed_options: Option<TestOptions>,
}

impl SweepReport {
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }
}

/// Run the sweep. Each worker builds its own engine with `make_engine`.
pub fn run_sweep<F, E>(config: &SweepConfig, pool: &RandomPool, make_engine: F) -> SweepReport
where
    F: Fn() -> E + Sync,
    E: RaidzEngine,
{
    let out = &config.base;
    let total = config.total();
    let started = Instant::now();
    let deadline = config.timeout.map(|t| started + t);
    let control = SweepControl::new(config.max_slots);
    let cancel = CancelToken::new();
    let mut offsets = DeterministicRng::new(config.seed);
    let mut sanity_rng = DeterministicRng::new(config.seed ^ SANITY_SEED_SALT);
    let mut tried = 0;
    info!(total, slots = control.capacity(), sanity = config.sanity, "sweep started");

    thread::scope(|scope| {
        let control = &control;
        let make_engine = &make_engine;
        let mut workers = Vec::new();
        for point in config.points() {
            let Some(slot) = control.acquire(deadline, &cancel) else {
                break;
            };
            tried += 1;
            if tried % PROGRESS_EVERY == 0 {
                out.log(Verbosity::All, format!("{tried}/{total}... "));
            }
            let opts = config.trial_options(point, &mut offsets);
            let forced = config.sanity && sanity_rng.percent(config.sanity_failure_percent);
            let slot = slot.with_trial(opts.clone());
            let cancel = cancel.clone();
            workers.push(scope.spawn(move || {
                run_trial(slot, &opts, forced, pool, cancel, make_engine);
            }));
        }

        out.log(Verbosity::All, "Waiting for test threads to finish...");
        control.drain();
        for worker in workers {
            // The slot guard already turned the panic into a sweep error.
            if worker.join().is_err() {
                debug!("joined panicked sweep worker");
            }
        }
    });

    let state = control.finish();
    let (failures, forced_failures) = control.counts();
    let report = SweepReport {
        state,
        tried,
        total,
        failures,
        forced_failures,
        sanity: config.sanity,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        failed_options: control.failed_options(),
    };
    print_verdict(out, &report);
    report
}

fn run_trial<F, E>(
    slot: SlotGuard<'_>,
    opts: &TestOptions,
    forced: bool,
    pool: &RandomPool,
    cancel: CancelToken,
    make_engine: &F,
) where
    F: Fn() -> E,
    E: RaidzEngine,
{
    let mut engine = make_engine();
    let failed = match run_test(&mut engine, opts, pool, cancel) {
        Ok(report) => report.failures() != 0,
        Err(err) => {
            warn!(error = %err, "sweep trial aborted");
            true
        }
    };
    if failed {
        warn!(size = opts.size, ashift = opts.ashift, data_cols = opts.data_cols, "sweep trial failed");
        slot.control.record_failure(opts, false);
    } else if forced {
        debug!(size = opts.size, ashift = opts.ashift, data_cols = opts.data_cols, "sanity mode forced failure");
        slot.control.record_failure(opts, true);
    }
    drop(slot);
}

fn print_verdict(out: &TestOptions, report: &SweepReport) {
    match report.state {
        SweepState::Running | SweepState::Finished => out.log(
            Verbosity::All,
            format!("Sweep test succeeded on {} raidz maps!", report.tried),
        ),
        SweepState::Timeout => out.log(
            Verbosity::All,
            format!(
                "Sweep timed out after {} ms; {} of {} raidz maps tried.",
                report.elapsed_ms, report.tried, report.total
            ),
        ),
        SweepState::Error => {
            let mut msg = String::from("Sweep test failed!");
            if report.sanity {
                msg.push_str(&format!(
                    " (sanity mode: {} of {} failure(s) injected)",
                    report.forced_failures, report.failures
                ));
            }
            out.log(Verbosity::All, msg);
            if let Some(failed) = &report.failed_options {
                out.log(Verbosity::All, format!("Failed options:\n{}", failed.render(true)));
            }
        }
    }
}
