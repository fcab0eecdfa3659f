#![forbid(unsafe_code)]
//! Verification harness for RAID-Z erasure-coding backends.
//!
//! A golden stripe is built with the engine's reference backend; every other
//! backend must reproduce its parity (P, PQ, PQR) and recover every
//! combination of one, two or three lost data columns through each of the
//! seven reconstruction methods. [`sweep`] repeats this over a cross-product
//! of geometries on a pool of worker threads.

pub mod bench;
pub mod cancel;
pub mod check;
pub mod cli;
pub mod compare;
pub mod crash;
pub mod golden;
pub mod inject;
pub mod options;
pub mod planner;
pub mod random;
pub mod sweep;

pub use cancel::CancelToken;
pub use check::{BackendReport, CheckKind, CheckReport, MethodOutcome, Verifier, VerifyReport, run_test};
pub use golden::GoldenReference;
pub use options::{TestOptions, Verbosity};
pub use planner::{FailureCase, RecFamily, RecMethod};
pub use random::RandomPool;
pub use sweep::{SweepConfig, SweepReport, SweepState, run_sweep};
