//! Per-trial configuration.

use rzv_engine::{Expansion, MapGeometry};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Write as _};

/// Smallest payload shift accepted on the command line.
pub const MIN_BLOCK_SHIFT: u32 = 9;
/// Largest payload shift accepted on the command line.
pub const MAX_BLOCK_SHIFT: u32 = 24;
/// Largest payload size; also the size of the shared random buffer.
pub const MAX_BLOCK_SIZE: u64 = 1 << MAX_BLOCK_SHIFT;

pub const DOUBLE_SEPARATOR: &str = "==========================================================";
pub const SEPARATOR: &str = "----------------------------------------------------------";

/// Output level. Each `-v` raises it by one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Only sweep progress and final verdicts.
    All,
    /// Per-backend and per-method results.
    Info,
    /// Per-case detail and individual column mismatches.
    Debug,
}

impl Verbosity {
    #[must_use]
    pub fn from_count(count: usize) -> Self {
        match count {
            0 => Self::All,
            1 => Self::Info,
            _ => Self::Debug,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::All => "no",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Immutable configuration for one verification trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestOptions {
    /// log2 of the sector size.
    pub ashift: u32,
    /// Byte offset of the golden stripe.
    pub offset: u64,
    pub data_cols: usize,
    /// Payload size in bytes.
    pub size: u64,
    /// Use the expanded (multi-row) layout.
    pub expand: bool,
    /// Reflow offset for the expanded layout.
    pub expand_offset: u64,
    pub verbosity: Verbosity,
    /// Skip the real parity/reconstruction calls so the harness has to
    /// report failures.
    pub sanity: bool,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            ashift: 9,
            offset: 1,
            data_cols: 8,
            size: 1 << 19,
            expand: false,
            expand_offset: u64::MAX,
            verbosity: Verbosity::All,
            sanity: false,
        }
    }
}

fn log2(v: u64) -> u32 {
    v.checked_ilog2().unwrap_or(0)
}

impl TestOptions {
    /// Stripe geometry for `parity` columns at byte `offset`.
    #[must_use]
    pub fn geometry(&self, parity: usize, offset: u64) -> MapGeometry {
        MapGeometry {
            offset,
            size: self.size,
            ashift: self.ashift,
            data_cols: self.data_cols,
            parity,
            expansion: self.expand.then_some(Expansion {
                reflow_offset: self.expand_offset,
            }),
        }
    }

    /// Whether output at `level` should be printed.
    #[must_use]
    pub fn enabled(&self, level: Verbosity) -> bool {
        self.verbosity >= level
    }

    /// Print `msg` on stdout when the verbosity allows it.
    pub fn log(&self, level: Verbosity, msg: impl fmt::Display) {
        if self.enabled(level) {
            println!("{msg}");
        }
    }

    /// The "Running with options" block.
    #[must_use]
    pub fn render(&self, sweep: bool) -> String {
        let mut out = String::new();
        let yes_no = |b: bool| if b { "yes" } else { "no" };
        // Writing into a String cannot fail.
        let _ = writeln!(out, "{DOUBLE_SEPARATOR}");
        let _ = writeln!(out, "Running with options:");
        let _ = writeln!(out, "  (-a) zio ashift                   : {}", self.ashift);
        let _ = writeln!(out, "  (-o) zio offset                   : 1 << {}", log2(self.offset));
        let _ = writeln!(out, "  (-e) expanded map                 : {}", yes_no(self.expand));
        let _ = writeln!(out, "  (-r) reflow offset                : {:x}", self.expand_offset);
        let _ = writeln!(out, "  (-d) number of raidz data columns : {}", self.data_cols);
        let _ = writeln!(out, "  (-s) size of DATA                 : 1 << {}", log2(self.size));
        let _ = writeln!(out, "  (-S) sweep parameters             : {}", yes_no(sweep));
        let _ = writeln!(out, "  (-v) verbose                      : {}", self.verbosity.label());
        out
    }
}
