//! The engine boundary the verification harness drives.

use crate::backend::Implementation;
use crate::map::{MapGeometry, RaidzMap, map_alloc};
use rzv_error::{Result, RzvError};
use tracing::{debug, trace};

/// Operations the harness needs from an erasure-coding engine.
///
/// An engine instance carries the currently selected backend, so concurrent
/// callers each own their own instance. Freeing a map is `Drop`.
pub trait RaidzEngine: Send {
    /// Backend names in order; the first entry is the reference backend.
    fn implementation_names(&self) -> Vec<&'static str>;

    /// Select the backend used by subsequent parity/reconstruction calls.
    ///
    /// # Errors
    ///
    /// `UnsupportedImplementation` when the backend exists but cannot run on
    /// this host, `UnknownImplementation` when the name is not recognized.
    fn set_implementation(&mut self, name: &str) -> Result<()>;

    /// Name of the backend currently selected.
    fn current_implementation(&self) -> &'static str;

    /// Lay out `payload` according to `geometry`.
    ///
    /// # Errors
    ///
    /// `InvalidGeometry` when the stripe cannot be laid out.
    fn map_alloc(&self, geometry: &MapGeometry, payload: &[u8]) -> Result<RaidzMap>;

    /// Recompute every parity column from the data columns, in place.
    fn generate_parity(&self, map: &mut RaidzMap);

    /// Rebuild the columns named in `targets`, in place. Parity columns in
    /// `targets` are treated as unusable, data columns as lost.
    ///
    /// # Errors
    ///
    /// `InvalidTargets` when the loss pattern exceeds what the parity can
    /// recover.
    fn reconstruct(&self, map: &mut RaidzMap, targets: &[usize]) -> Result<()>;
}

/// The bundled engine, backed by [`Implementation`].
#[derive(Debug, Clone)]
pub struct MathEngine {
    current: Implementation,
    disabled: Vec<Implementation>,
}

impl Default for MathEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MathEngine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            current: Implementation::ALL[0],
            disabled: Vec::new(),
        }
    }

    /// Treat `imp` as unsupported on this host. The reference backend cannot
    /// be disabled.
    #[must_use]
    pub fn without(mut self, imp: Implementation) -> Self {
        if imp != Implementation::ALL[0] && !self.disabled.contains(&imp) {
            self.disabled.push(imp);
        }
        self
    }
}

impl RaidzEngine for MathEngine {
    fn implementation_names(&self) -> Vec<&'static str> {
        Implementation::ALL.iter().map(|imp| imp.name()).collect()
    }

    fn set_implementation(&mut self, name: &str) -> Result<()> {
        let imp = Implementation::from_name(name)?;
        if !imp.is_supported() || self.disabled.contains(&imp) {
            debug!(implementation = name, "backend unsupported on this host");
            return Err(RzvError::UnsupportedImplementation(name.to_owned()));
        }
        trace!(implementation = name, "backend selected");
        self.current = imp;
        Ok(())
    }

    fn current_implementation(&self) -> &'static str {
        self.current.name()
    }

    fn map_alloc(&self, geometry: &MapGeometry, payload: &[u8]) -> Result<RaidzMap> {
        map_alloc(geometry, payload)
    }

    fn generate_parity(&self, map: &mut RaidzMap) {
        self.current.generate(map);
    }

    fn reconstruct(&self, map: &mut RaidzMap, targets: &[usize]) -> Result<()> {
        self.current.reconstruct(map, targets)
    }
}
