//! Backend registry.
//!
//! The first entry of [`Implementation::ALL`] is the reference the harness
//! builds golden stripes with; every other entry is checked against it.

use crate::map::RaidzMap;
use crate::math::{BitwiseKernel, GfKernel, SwarKernel, TableKernel, generate_row, reconstruct_row};
use rzv_error::{Result, RzvError};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Implementation {
    /// Byte-at-a-time, shift-and-add multiply. The golden reference.
    Original,
    /// Byte-at-a-time, log/exp table multiply.
    Scalar,
    /// Eight bytes per step on 64-bit words.
    Swar64,
}

impl Implementation {
    pub const ALL: [Self; 3] = [Self::Original, Self::Scalar, Self::Swar64];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Scalar => "scalar",
            Self::Swar64 => "swar64",
        }
    }

    /// Look up a backend by name.
    ///
    /// # Errors
    ///
    /// `UnknownImplementation` for names not in [`Self::ALL`].
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|imp| imp.name() == name)
            .ok_or_else(|| RzvError::UnknownImplementation(name.to_owned()))
    }

    /// Whether this host can run the backend.
    #[must_use]
    pub fn is_supported(self) -> bool {
        match self {
            Self::Original | Self::Scalar => true,
            Self::Swar64 => cfg!(target_pointer_width = "64"),
        }
    }

    pub(crate) fn generate(self, map: &mut RaidzMap) {
        match self {
            Self::Original => generate::<BitwiseKernel>(map),
            Self::Scalar => generate::<TableKernel>(map),
            Self::Swar64 => generate::<SwarKernel>(map),
        }
    }

    pub(crate) fn reconstruct(self, map: &mut RaidzMap, targets: &[usize]) -> Result<()> {
        match self {
            Self::Original => reconstruct::<BitwiseKernel>(map, targets),
            Self::Scalar => reconstruct::<TableKernel>(map, targets),
            Self::Swar64 => reconstruct::<SwarKernel>(map, targets),
        }
    }
}

impl fmt::Display for Implementation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn generate<K: GfKernel>(map: &mut RaidzMap) {
    for row in &mut map.rows {
        generate_row::<K>(row);
    }
}

fn reconstruct<K: GfKernel>(map: &mut RaidzMap, targets: &[usize]) -> Result<()> {
    for row in &mut map.rows {
        reconstruct_row::<K>(row, targets)?;
    }
    Ok(())
}
