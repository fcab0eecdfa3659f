//! Throughput measurement for every backend (`-B`).

use crate::options::{TestOptions, Verbosity};
use crate::planner::RecMethod;
use crate::random::RandomPool;
use rzv_engine::{MAX_PARITY, MapGeometry, RaidzEngine, RaidzMap};
use rzv_error::{Result, RzvError};
use serde::Serialize;
use std::fmt::Write as _;
use std::hint::black_box;
use std::time::Instant;
use tracing::{info, warn};

const GEN_NAMES: [&str; MAX_PARITY] = ["gen_p", "gen_pq", "gen_pqr"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    pub data_cols: usize,
    pub ashift: u32,
    /// log2 of the per-column sizes to measure.
    pub col_shifts: Vec<u32>,
    /// Bytes of stripe data processed per measurement.
    pub byte_budget: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            data_cols: 8,
            ashift: 12,
            col_shifts: (12..=20).collect(),
            byte_budget: 1 << 24,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchRow {
    pub implementation: &'static str,
    pub method: &'static str,
    pub col_size: usize,
    pub iterations: u64,
    pub elapsed_ns: u64,
    pub mib_per_sec: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BenchReport {
    pub rows: Vec<BenchRow>,
    pub skipped: Vec<&'static str>,
}

impl BenchReport {
    /// Fixed-width table, one line per measurement.
    #[must_use]
    pub fn render_table(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:<10} {:<8} {:>10} {:>12}",
            "impl", "method", "col_size", "MiB/s"
        );
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{:<10} {:<8} {:>10} {:>12.1}",
                row.implementation, row.method, row.col_size, row.mib_per_sec
            );
        }
        for name in &self.skipped {
            let _ = writeln!(out, "{name:<10} (not supported on this host)");
        }
        out
    }
}

fn geometry(config: &BenchConfig, col_size: usize, parity: usize) -> MapGeometry {
    MapGeometry {
        offset: 0,
        size: (col_size * config.data_cols) as u64,
        ashift: config.ashift,
        data_cols: config.data_cols,
        parity,
        expansion: None,
    }
}

/// Repeat `op` until `budget` bytes of stripe data have gone through it.
fn measure(
    implementation: &'static str,
    method: &'static str,
    col_size: usize,
    stripe_bytes: u64,
    budget: u64,
    mut op: impl FnMut() -> Result<()>,
) -> Result<BenchRow> {
    let iterations = budget.div_ceil(stripe_bytes).max(1);
    let start = Instant::now();
    for _ in 0..iterations {
        op()?;
    }
    let elapsed = start.elapsed();
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let mib = (iterations * stripe_bytes) as f64 / f64::from(1_u32 << 20);
    Ok(BenchRow {
        implementation,
        method,
        col_size,
        iterations,
        elapsed_ns: u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX),
        mib_per_sec: mib / secs,
    })
}

/// Measure parity generation (P, PQ, PQR) and every reconstruction method
/// for each backend and column size.
///
/// # Errors
///
/// Engine errors other than an unsupported backend.
pub fn run_bench<E: RaidzEngine + ?Sized>(
    engine: &mut E,
    config: &BenchConfig,
    pool: &RandomPool,
    out: &TestOptions,
) -> Result<BenchReport> {
    let mut report = BenchReport::default();
    for name in engine.implementation_names() {
        match engine.set_implementation(name) {
            Ok(()) => {}
            Err(err) if err.is_unsupported() => {
                warn!(backend = name, "skipping unsupported backend");
                report.skipped.push(name);
                continue;
            }
            Err(err) => return Err(err),
        }

        for &shift in &config.col_shifts {
            let col_size = 1_usize << shift;
            let stripe_bytes = (col_size * config.data_cols) as u64;
            let payload = pool.payload(col_size * config.data_cols);

            for (p, &method) in GEN_NAMES.iter().enumerate() {
                let mut map = engine.map_alloc(&geometry(config, col_size, p + 1), &payload)?;
                let row = measure(name, method, col_size, stripe_bytes, config.byte_budget, || {
                    engine.generate_parity(black_box(&mut map));
                    Ok(())
                })?;
                report.rows.push(row);
            }

            let mut map: RaidzMap =
                engine.map_alloc(&geometry(config, col_size, MAX_PARITY), &payload)?;
            engine.generate_parity(&mut map);
            for method in RecMethod::ALL {
                let case = method
                    .cases(config.data_cols, MAX_PARITY)
                    .next()
                    .ok_or_else(|| {
                        RzvError::InvalidGeometry(format!(
                            "{} data column(s) too few for {}",
                            config.data_cols,
                            method.name()
                        ))
                    })?;
                let row = measure(
                    name,
                    method.name(),
                    col_size,
                    stripe_bytes,
                    config.byte_budget,
                    || engine.reconstruct(black_box(&mut map), case.targets()),
                )?;
                report.rows.push(row);
            }
            out.log(Verbosity::Info, format!("[{name}] column size {col_size} done"));
        }
        info!(backend = name, "benchmark finished");
    }
    Ok(report)
}
