//! Parity generation and reconstruction, generic over a byte kernel.
//!
//! Every backend shares the same algorithm and differs only in how it
//! performs the three primitive operations on column buffers (XOR, multiply
//! by the generator, multiply-accumulate by a constant). Keeping the
//! algorithm in one place is what makes the backends comparable at all: a
//! mismatch can only come from a kernel.
//!
//! Column coefficients: with `n` data columns, data column `i` contributes
//! `g^(n-1-i)` to parity `g`, where `g = 1, 2, 4` for P, Q, R. Q and R are
//! accumulated with Horner's rule so a short column simply stops
//! contributing XORs while the accumulator keeps being multiplied.

use crate::gf;
use crate::map::{RaidzCol, RaidzRow};
use rzv_error::{Result, RzvError};

/// Generator of each parity column.
pub const PARITY_GENERATORS: [u8; 3] = [1, 2, 4];

/// Primitive operations a backend provides.
pub trait GfKernel {
    /// `dst[..src.len()] ^= src`.
    fn xor(dst: &mut [u8], src: &[u8]);

    /// Multiply every byte of `buf` by 2.
    fn mul2(buf: &mut [u8]);

    /// Multiply every byte of `buf` by 4.
    fn mul4(buf: &mut [u8]) {
        Self::mul2(buf);
        Self::mul2(buf);
    }

    /// `dst[..src.len()] ^= c * src`.
    fn mul_xor(dst: &mut [u8], src: &[u8], c: u8);
}

/// Multiply the accumulator by parity generator `parity_idx`.
fn mul_gen<K: GfKernel>(acc: &mut [u8], parity_idx: usize) {
    match parity_idx {
        0 => {}
        1 => K::mul2(acc),
        _ => K::mul4(acc),
    }
}

/// `Σ g^(n-1-i) · D_i` over the data columns of `data`, skipping columns in
/// `missing`. Result length is `len`; columns are zero-padded.
fn horner<K: GfKernel>(data: &[RaidzCol], parity_idx: usize, missing: &[usize], len: usize) -> Vec<u8> {
    let mut acc = vec![0_u8; len];
    for (i, col) in data.iter().enumerate() {
        mul_gen::<K>(&mut acc, parity_idx);
        if missing.contains(&i) {
            continue;
        }
        let n = col.size().min(len);
        K::xor(&mut acc, &col.data()[..n]);
    }
    acc
}

/// Fill the parity columns of `row` from its data columns.
pub fn generate_row<K: GfKernel>(row: &mut RaidzRow) {
    let (parity, data) = row.split_mut();
    for (p, col) in parity.iter_mut().enumerate() {
        let len = col.size();
        let value = horner::<K>(data, p, &[], len);
        col.data_mut().copy_from_slice(&value);
    }
}

/// Recover the data columns named in `targets` (physical indices) using the
/// parity columns not named in `targets`.
///
/// The lowest-numbered usable parity columns are used, one per missing data
/// column. Zero-length targets are restored trivially.
///
/// # Errors
///
/// `InvalidTargets` if a target is out of range or there are more missing
/// data columns than usable parity columns.
pub fn reconstruct_row<K: GfKernel>(row: &mut RaidzRow, targets: &[usize]) -> Result<()> {
    let first_data = row.first_data_col;
    let ncols = row.cols.len();
    if let Some(&bad) = targets.iter().find(|&&t| t >= ncols) {
        return Err(RzvError::InvalidTargets(format!(
            "column {bad} outside row of {ncols}"
        )));
    }

    let mut missing: Vec<usize> = targets
        .iter()
        .filter(|&&t| t >= first_data)
        .map(|&t| t - first_data)
        .collect();
    missing.sort_unstable();
    missing.dedup();
    if missing.is_empty() {
        return Ok(());
    }

    let usable: Vec<usize> = (0..first_data).filter(|p| !targets.contains(p)).collect();
    let m = missing.len();
    if m > usable.len() {
        return Err(RzvError::InvalidTargets(format!(
            "{m} missing data column(s) but only {} usable parity column(s)",
            usable.len()
        )));
    }
    let parity_used = &usable[..m];

    let (parity, data) = row.split_mut();
    let n = data.len();

    // Syndromes: parity XOR the contribution of the surviving columns leaves
    // exactly the contribution of the missing ones.
    let syndromes: Vec<Vec<u8>> = parity_used
        .iter()
        .map(|&p| {
            let len = parity[p].size();
            let mut s = horner::<K>(data, p, &missing, len);
            K::xor(&mut s, parity[p].data());
            s
        })
        .collect();

    let mut coeffs = [[0_u8; 3]; 3];
    for (j, &p) in parity_used.iter().enumerate() {
        for (k, &x) in missing.iter().enumerate() {
            coeffs[j][k] = gf::pow(PARITY_GENERATORS[p], n - 1 - x);
        }
    }
    let inverse = gf::invert(&coeffs, m).ok_or_else(|| {
        RzvError::InvalidTargets(format!("singular system for columns {missing:?}"))
    })?;

    for (k, &x) in missing.iter().enumerate() {
        let col = &mut data[x];
        let len = col.size();
        let mut out = vec![0_u8; len];
        for (j, s) in syndromes.iter().enumerate() {
            let take = len.min(s.len());
            K::mul_xor(&mut out[..take], &s[..take], inverse[k][j]);
        }
        col.data_mut().copy_from_slice(&out);
    }
    Ok(())
}

/// Reference kernel: one byte at a time, multiplication by shift-and-add.
pub struct BitwiseKernel;

impl GfKernel for BitwiseKernel {
    fn xor(dst: &mut [u8], src: &[u8]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= *s;
        }
    }

    fn mul2(buf: &mut [u8]) {
        for b in buf {
            *b = gf::mul2(*b);
        }
    }

    fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= gf::mul_bitwise(*s, c);
        }
    }
}

/// Log/exp table kernel.
pub struct TableKernel;

impl GfKernel for TableKernel {
    fn xor(dst: &mut [u8], src: &[u8]) {
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= *s;
        }
    }

    fn mul2(buf: &mut [u8]) {
        for b in buf {
            *b = gf::mul(*b, 2);
        }
    }

    fn mul4(buf: &mut [u8]) {
        for b in buf {
            *b = gf::mul(*b, 4);
        }
    }

    fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
        if c == 0 {
            return;
        }
        let log_c = gf::LOG[c as usize] as usize;
        for (d, s) in dst.iter_mut().zip(src) {
            if *s != 0 {
                *d ^= gf::EXP[gf::LOG[*s as usize] as usize + log_c];
            }
        }
    }
}

/// 64-bit lane kernel: eight bytes per step for XOR and doubling,
/// per-constant product tables for multiply-accumulate.
pub struct SwarKernel;

const LANE: usize = 8;
const HIGH_BITS: u64 = 0x8080_8080_8080_8080;
const LOW_SEVEN: u64 = 0xFEFE_FEFE_FEFE_FEFE;
const POLY_LANES: u64 = 0x1D1D_1D1D_1D1D_1D1D;

fn lane_mul2(x: u64) -> u64 {
    let mask = x & HIGH_BITS;
    // 0xFF in every byte whose top bit was set.
    let mask = (mask << 1).wrapping_sub(mask >> 7);
    ((x << 1) & LOW_SEVEN) ^ (mask & POLY_LANES)
}

fn load(chunk: &[u8]) -> u64 {
    let mut bytes = [0_u8; LANE];
    bytes.copy_from_slice(chunk);
    u64::from_le_bytes(bytes)
}

impl GfKernel for SwarKernel {
    fn xor(dst: &mut [u8], src: &[u8]) {
        let dst = &mut dst[..src.len()];
        let mut d_chunks = dst.chunks_exact_mut(LANE);
        let mut s_chunks = src.chunks_exact(LANE);
        for (d, s) in d_chunks.by_ref().zip(s_chunks.by_ref()) {
            d.copy_from_slice(&(load(d) ^ load(s)).to_le_bytes());
        }
        for (d, s) in d_chunks.into_remainder().iter_mut().zip(s_chunks.remainder()) {
            *d ^= *s;
        }
    }

    fn mul2(buf: &mut [u8]) {
        let mut chunks = buf.chunks_exact_mut(LANE);
        for c in chunks.by_ref() {
            c.copy_from_slice(&lane_mul2(load(c)).to_le_bytes());
        }
        for b in chunks.into_remainder() {
            *b = gf::mul2(*b);
        }
    }

    fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
        if c == 0 {
            return;
        }
        let mut table = [0_u8; 256];
        for (v, slot) in table.iter_mut().enumerate() {
            #[allow(clippy::cast_possible_truncation)] // v < 256
            let v = v as u8;
            *slot = gf::mul(v, c);
        }
        for (d, s) in dst.iter_mut().zip(src) {
            *d ^= table[*s as usize];
        }
    }
}
