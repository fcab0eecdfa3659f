#![forbid(unsafe_code)]
//! Error types for raidz-verify.
//!
//! # Error Taxonomy
//!
//! The harness distinguishes failures that abort a run from outcomes that are
//! merely counted:
//!
//! | Condition | Representation | Effect |
//! |-----------|----------------|--------|
//! | Stripe geometry the engine cannot lay out | `InvalidGeometry` | trial aborts |
//! | Backend name not known to the engine | `UnknownImplementation` | run aborts |
//! | Backend known but not usable on this host | `UnsupportedImplementation` | backend skipped |
//! | Reconstruction targets the engine cannot solve | `InvalidTargets` | trial aborts |
//! | Reference backend disagrees with itself | `GoldenMismatch` | run aborts |
//! | Parity / data mismatch for one case | mismatch count (not an error) | method fails |
//!
//! Mismatches are never errors: they flow up the call chain as counts and only
//! decide the final verdict. An `RzvError` means the verification itself could
//! not be carried out.
//!
//! ## Exit codes
//!
//! Every variant maps to exactly one process exit code via
//! [`RzvError::exit_code`]. The mapping is exhaustive (no wildcard arms) so
//! adding a variant is a compile error until its code is assigned.

use thiserror::Error;

/// Exit code for a failed verification run or a usage error.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when a parameter sweep ended in the error state.
pub const EXIT_SWEEP_ERROR: i32 = 2;
/// Exit code when a parameter sweep hit its timeout.
pub const EXIT_SWEEP_TIMEOUT: i32 = 3;

/// Unified error type for engine and harness operations.
#[derive(Debug, Error)]
pub enum RzvError {
    /// Stripe geometry is structurally invalid (payload smaller than one
    /// sector, parity outside 1..=3, no data columns, ...).
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    /// The engine does not know a backend by this name.
    #[error("unknown implementation: {0}")]
    UnknownImplementation(String),

    /// The backend exists but cannot run on this host.
    ///
    /// The implementation iterator treats this as a skip, not a failure.
    #[error("implementation not supported on this host: {0}")]
    UnsupportedImplementation(String),

    /// Reconstruction was asked to recover more data columns than there are
    /// usable parity columns, or named a column outside the row.
    #[error("invalid reconstruction targets: {0}")]
    InvalidTargets(String),

    /// Two identically seeded stripes disagreed under the reference backend.
    ///
    /// Every later comparison would be meaningless, so the run stops here.
    #[error("golden reference inconsistent at parity {parity}: {mismatches} column(s) differ")]
    GoldenMismatch { parity: usize, mismatches: usize },
}

impl RzvError {
    /// True when this error only means "skip this backend".
    #[must_use]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedImplementation(_))
    }

    /// Process exit code for a run that terminated with this error.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidGeometry(_)
            | Self::UnknownImplementation(_)
            | Self::UnsupportedImplementation(_)
            | Self::InvalidTargets(_)
            | Self::GoldenMismatch { .. } => EXIT_FAILURE,
        }
    }
}

/// Result alias using `RzvError`.
pub type Result<T> = std::result::Result<T, RzvError>;
