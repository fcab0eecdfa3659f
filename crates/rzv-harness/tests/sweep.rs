//! Sweep scheduler end-to-end: coverage of the cross-product, the error and
//! timeout verdicts, and recovery from panicking workers.

mod common;

use common::MockEngine;
use rzv_engine::MathEngine;
use rzv_error::{EXIT_SWEEP_ERROR, EXIT_SWEEP_TIMEOUT};
use rzv_harness::sweep::SweepPoint;
use rzv_harness::{RandomPool, SweepConfig, SweepState, run_sweep};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

fn small_config() -> SweepConfig {
    SweepConfig {
        sizes: vec![512, 8192],
        ashifts: vec![9, 12],
        data_cols: vec![1, 2],
        max_slots: 2,
        seed: 7,
        ..SweepConfig::default()
    }
}

fn pool() -> RandomPool {
    RandomPool::generate(99, 1 << 16)
}

#[test]
fn visits_every_valid_geometry_once() {
    let config = small_config();
    // 512 B does not fit a 4 KiB sector.
    assert_eq!(config.total(), 6);
    let distinct: HashSet<SweepPoint> = config.points().collect();
    assert_eq!(distinct.len(), 6);

    let built = AtomicUsize::new(0);
    let report = run_sweep(&config, &pool(), || {
        built.fetch_add(1, Ordering::Relaxed);
        MathEngine::new()
    });

    assert_eq!(report.state, SweepState::Finished);
    assert_eq!(report.tried, report.total);
    assert_eq!(built.load(Ordering::Relaxed), 6);
    assert_eq!(report.failures, 0);
    assert!(report.failed_options.is_none());
    assert_eq!(report.exit_code(), 0);
}

#[test]
fn narrow_geometries_finish_clean() {
    // Sub-row payloads whose allocation rounds up differently per parity.
    let config = SweepConfig {
        sizes: vec![13 * 4096, 1 << 17],
        ashifts: vec![14],
        data_cols: vec![5, 8, 12],
        ..small_config()
    };
    let report = run_sweep(&config, &RandomPool::generate(3, 1 << 18), MathEngine::new);
    assert_eq!(report.state, SweepState::Finished);
    assert_eq!(report.tried, 6);
    assert_eq!(report.failures, 0);
}

#[test]
fn sanity_forced_failure_moves_sweep_to_error() {
    let config = SweepConfig {
        sanity: true,
        sanity_failure_percent: 100,
        ..small_config()
    };
    let report = run_sweep(&config, &pool(), MathEngine::new);

    assert_eq!(report.state, SweepState::Error);
    assert_eq!(report.exit_code(), EXIT_SWEEP_ERROR);
    assert!(report.sanity);
    assert!(report.forced_failures >= 1);
    assert_eq!(report.forced_failures, report.failures, "backends themselves are fine");

    let failed = report.failed_options.expect("failing options captured");
    assert!(config.sizes.contains(&failed.size));
    assert!(!failed.sanity, "trials never run in sanity mode themselves");
}

#[test]
fn sanity_without_forced_share_finishes() {
    let config = SweepConfig {
        sanity: true,
        sanity_failure_percent: 0,
        ..small_config()
    };
    let report = run_sweep(&config, &pool(), MathEngine::new);
    assert_eq!(report.state, SweepState::Finished);
}

#[test]
fn broken_backend_moves_sweep_to_error() {
    let report = run_sweep(&small_config(), &pool(), MockEngine::with_broken);
    assert_eq!(report.state, SweepState::Error);
    assert!(report.failures >= 1);
    assert_eq!(report.forced_failures, 0);
    assert!(report.failed_options.is_some());
    assert!(report.tried <= report.total);
}

#[test]
fn expired_timeout_dispatches_nothing() {
    let config = SweepConfig {
        timeout: Some(Duration::ZERO),
        ..small_config()
    };
    let report = run_sweep(&config, &pool(), MathEngine::new);
    assert_eq!(report.state, SweepState::Timeout);
    assert_eq!(report.exit_code(), EXIT_SWEEP_TIMEOUT);
    assert_eq!(report.tried, 0);
    assert_eq!(report.failures, 0);
}

#[test]
fn panicking_worker_flags_error_and_sweep_completes() {
    let config = SweepConfig {
        max_slots: 3,
        ..small_config()
    };
    let report = run_sweep(&config, &pool(), || {
        MockEngine::new(&["original", "panicky"])
    });
    assert_eq!(report.state, SweepState::Error);
    assert!(report.failures >= 1);
    assert!(report.failed_options.is_some());
}

#[test]
fn sweep_report_serializes() {
    let config = SweepConfig {
        timeout: Some(Duration::ZERO),
        ..small_config()
    };
    let report = run_sweep(&config, &pool(), MathEngine::new);
    let json = serde_json::to_value(&report).expect("serializes");
    assert_eq!(json["state"], "timeout");
    assert_eq!(json["total"], 6);
}
