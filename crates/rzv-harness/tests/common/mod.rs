//! Engines with deliberately misbehaving backends.

#![allow(dead_code)]

use rzv_engine::{MapGeometry, MathEngine, RaidzEngine, RaidzMap};
use rzv_error::{Result, RzvError};

/// Wraps the bundled engine and adds a few fake backends:
///
/// - `broken`: computes parity like `scalar`, then flips one byte of every
///   parity column.
/// - `absent`: always unsupported on this host.
/// - `ghost`: listed but unknown to the engine.
/// - `panicky`: panics while generating parity.
pub struct MockEngine {
    inner: MathEngine,
    names: Vec<&'static str>,
    current: &'static str,
}

impl MockEngine {
    pub fn new(names: &[&'static str]) -> Self {
        Self {
            inner: MathEngine::new(),
            names: names.to_vec(),
            current: names[0],
        }
    }

    pub fn with_broken() -> Self {
        Self::new(&["original", "scalar", "broken"])
    }
}

impl RaidzEngine for MockEngine {
    fn implementation_names(&self) -> Vec<&'static str> {
        self.names.clone()
    }

    fn set_implementation(&mut self, name: &str) -> Result<()> {
        match name {
            "broken" | "panicky" => {
                self.inner.set_implementation("scalar")?;
                self.current = if name == "broken" { "broken" } else { "panicky" };
                Ok(())
            }
            "absent" => Err(RzvError::UnsupportedImplementation(name.to_owned())),
            "ghost" => Err(RzvError::UnknownImplementation(name.to_owned())),
            other => {
                self.inner.set_implementation(other)?;
                self.current = self.inner.current_implementation();
                Ok(())
            }
        }
    }

    fn current_implementation(&self) -> &'static str {
        self.current
    }

    fn map_alloc(&self, geometry: &MapGeometry, payload: &[u8]) -> Result<RaidzMap> {
        self.inner.map_alloc(geometry, payload)
    }

    fn generate_parity(&self, map: &mut RaidzMap) {
        assert!(self.current != "panicky", "panicky backend");
        self.inner.generate_parity(map);
        if self.current == "broken" {
            for row in &mut map.rows {
                let parity = row.first_data_col;
                for col in &mut row.cols[..parity] {
                    if let Some(b) = col.data_mut().first_mut() {
                        *b ^= 0x5A;
                    }
                }
            }
        }
    }

    fn reconstruct(&self, map: &mut RaidzMap, targets: &[usize]) -> Result<()> {
        self.inner.reconstruct(map, targets)
    }
}

