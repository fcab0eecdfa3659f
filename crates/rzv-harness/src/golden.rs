//! The golden reference stripe.
//!
//! Built with the engine's reference backend and self-checked before any
//! other backend is compared against it.

use crate::compare::{compare_data, compare_parity};
use crate::options::{TestOptions, Verbosity};
use crate::random::RandomPool;
use rzv_engine::{RaidzEngine, RaidzMap};
use rzv_error::{Result, RzvError};
use tracing::{error, info};

/// A reference stripe with generated parity.
#[derive(Debug, Clone)]
pub struct GoldenReference {
    map: RaidzMap,
}

impl GoldenReference {
    /// Build the golden stripe for `parity` at the configured offset.
    ///
    /// Two identically filled stripes are laid out and given parity by the
    /// reference backend; if they disagree the reference itself is unusable.
    ///
    /// # Errors
    ///
    /// `GoldenMismatch` if the two stripes differ, or whatever the engine
    /// returns for backend selection or layout.
    pub fn build<E: RaidzEngine + ?Sized>(
        engine: &mut E,
        opts: &TestOptions,
        pool: &RandomPool,
        parity: usize,
    ) -> Result<Self> {
        let names = engine.implementation_names();
        let reference = names
            .first()
            .ok_or_else(|| RzvError::UnknownImplementation("<none>".into()))?;
        engine.set_implementation(reference)?;

        let geometry = opts.geometry(parity, opts.offset);
        let payload = pool.payload(usize::try_from(opts.size).map_err(|_| {
            RzvError::InvalidGeometry(format!("size {} overflows usize", opts.size))
        })?);
        let mut golden = engine.map_alloc(&geometry, &payload)?;
        let mut check = engine.map_alloc(&geometry, &payload)?;
        engine.generate_parity(&mut golden);
        engine.generate_parity(&mut check);

        let mismatches = compare_data(&golden, &check) + compare_parity(&golden, &check, parity);
        if mismatches != 0 {
            error!(parity, mismatches, "golden reference is not self-consistent");
            opts.log(
                Verbosity::All,
                format!("initializing the golden copy ... [FAIL]! ({mismatches} mismatches)"),
            );
            return Err(RzvError::GoldenMismatch { parity, mismatches });
        }

        info!(parity, rows = golden.row_count(), backend = reference, "golden reference built");
        Ok(Self { map: golden })
    }

    /// Take the reference out of `slot` if it has the requested parity,
    /// otherwise build a new one. A reference of another parity is released
    /// before its replacement is built.
    ///
    /// # Errors
    ///
    /// Same as [`GoldenReference::build`].
    pub fn reuse_or_build<E: RaidzEngine + ?Sized>(
        slot: &mut Option<Self>,
        engine: &mut E,
        opts: &TestOptions,
        pool: &RandomPool,
        parity: usize,
    ) -> Result<Self> {
        match slot.take().filter(|g| g.parity() == parity) {
            Some(golden) => Ok(golden),
            None => Self::build(engine, opts, pool, parity),
        }
    }

    #[must_use]
    pub fn map(&self) -> &RaidzMap {
        &self.map
    }

    #[must_use]
    pub fn parity(&self) -> usize {
        self.map.parity()
    }
}
