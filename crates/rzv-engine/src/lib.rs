#![forbid(unsafe_code)]
//! RAID-Z style erasure coding.
//!
//! Lays out an I/O as parity + data columns, generates up to three parity
//! columns (P, Q, R) and reconstructs up to three lost data columns. Several
//! backends compute the same results with different byte kernels; the
//! `rzv-harness` crate checks them against each other.

pub mod backend;
pub mod engine;
pub mod gf;
pub mod map;
pub mod math;

pub use backend::Implementation;
pub use engine::{MathEngine, RaidzEngine};
pub use map::{
    ColumnRole, Expansion, MAX_PARITY, MapGeometry, RaidzCol, RaidzMap, RaidzRow, map_alloc,
    map_alloc_expanded,
};
