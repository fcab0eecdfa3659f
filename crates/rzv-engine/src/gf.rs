//! GF(2^8) arithmetic for RAID-Z parity.
//!
//! Field polynomial `x^8 + x^4 + x^3 + x^2 + 1` (0x11D), generator 2. P parity
//! uses coefficient 1, Q uses powers of 2 and R uses powers of 4, so every
//! coefficient the engine needs is `2^k` for some `k`.

/// Reduction polynomial including the x^8 term.
pub const POLY: u32 = 0x11D;

/// Low byte of the polynomial, XORed in when a shift carries out of bit 7.
pub const POLY_LOW: u8 = 0x1D;

/// `EXP[i] = 2^i`. Doubled so `EXP[log a + log b]` never needs a modulo.
#[allow(clippy::cast_possible_truncation)] // val < 256 after reduction
pub const EXP: [u8; 512] = {
    let mut table = [0_u8; 512];
    let mut val = 1_u32;
    let mut i = 0;
    while i < 512 {
        table[i] = val as u8;
        val <<= 1;
        if val >= 256 {
            val ^= POLY;
        }
        i += 1;
    }
    table
};

/// `LOG[a]` such that `2^LOG[a] = a`. `LOG[0]` is unused.
#[allow(clippy::cast_possible_truncation)] // i < 255
pub const LOG: [u8; 256] = {
    let mut table = [0_u8; 256];
    let mut i = 0;
    while i < 255 {
        table[EXP[i] as usize] = i as u8;
        i += 1;
    }
    table
};

/// Multiply two field elements using the log/exp tables.
#[must_use]
pub fn mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    EXP[LOG[a as usize] as usize + LOG[b as usize] as usize]
}

/// Multiply by shift-and-add, without tables.
#[must_use]
pub fn mul_bitwise(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0_u8;
    while b != 0 {
        if b & 1 != 0 {
            product ^= a;
        }
        a = mul2(a);
        b >>= 1;
    }
    product
}

/// Multiply by the generator.
#[must_use]
pub fn mul2(a: u8) -> u8 {
    let carry = a & 0x80 != 0;
    let shifted = a << 1;
    if carry { shifted ^ POLY_LOW } else { shifted }
}

/// Multiplicative inverse. Panics on zero.
#[must_use]
pub fn inv(a: u8) -> u8 {
    assert_ne!(a, 0, "GF(256) inverse of zero is undefined");
    EXP[255 - LOG[a as usize] as usize]
}

/// `2^e` for any exponent.
#[must_use]
pub fn exp2(e: usize) -> u8 {
    EXP[e % 255]
}

/// `a^e`.
#[must_use]
pub fn pow(a: u8, e: usize) -> u8 {
    if e == 0 {
        return 1;
    }
    if a == 0 {
        return 0;
    }
    EXP[(LOG[a as usize] as usize * e) % 255]
}

/// Square coefficient matrix of size at most 3.
pub type Matrix = [[u8; 3]; 3];

/// Invert the leading `n`×`n` block of `m` by Gauss-Jordan elimination.
///
/// Returns `None` when the block is singular. Entries outside the block are
/// left zero in the result.
#[must_use]
pub fn invert(m: &Matrix, n: usize) -> Option<Matrix> {
    debug_assert!(n <= 3);
    let mut a = *m;
    let mut out = [[0_u8; 3]; 3];
    for (i, row) in out.iter_mut().enumerate().take(n) {
        row[i] = 1;
    }

    for col in 0..n {
        let pivot = (col..n).find(|&r| a[r][col] != 0)?;
        a.swap(col, pivot);
        out.swap(col, pivot);

        let scale = inv(a[col][col]);
        for k in 0..n {
            a[col][k] = mul(a[col][k], scale);
            out[col][k] = mul(out[col][k], scale);
        }

        for r in 0..n {
            if r == col || a[r][col] == 0 {
                continue;
            }
            let factor = a[r][col];
            for k in 0..n {
                a[r][k] ^= mul(factor, a[col][k]);
                out[r][k] ^= mul(factor, out[col][k]);
            }
        }
    }
    Some(out)
}
