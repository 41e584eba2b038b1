// vim: tw=80
//! Arithmetic in GF(2^8), as used by RAID-Z parity
//!
//! The field is generated by the polynomial x^8 + x^4 + x^3 + x^2 + 1, so an
//! element overflowing during doubling is reduced by XOR with `0x1d`.  2 is a
//! generator: every nonzero element is some power of 2.  Addition is XOR.

use crate::types::*;

/// Low byte of the field's reducing polynomial.
pub const POLY: u8 = 0x1d;

/// Order of the multiplicative group
const ORDER: usize = 255;

/// Multiply a field element by 2.
#[inline]
pub const fn mul2(x: u8) -> u8 {
    (x << 1) ^ if x & 0x80 != 0 { POLY } else { 0 }
}

/// Multiply a field element by 4.
#[inline]
pub const fn mul4(x: u8) -> u8 {
    mul2(mul2(x))
}

/// Multiply each of the eight field elements packed into a `u64` by 2.
///
/// A mask is built from the top bit of each byte.  Shifting the mask left by
/// one and subtracting it shifted right by seven turns every `0x80` lane into
/// `0xff`, which then selects the reduction constant for exactly the lanes
/// that overflowed.
#[inline]
pub const fn mul2_u64(x: u64) -> u64 {
    let mask = x & 0x8080_8080_8080_8080;
    let mask = (mask << 1).wrapping_sub(mask >> 7);
    ((x << 1) & 0xfefe_fefe_fefe_fefe) ^ (mask & 0x1d1d_1d1d_1d1d_1d1d)
}

/// Multiply each of the eight field elements packed into a `u64` by 4.
#[inline]
pub const fn mul4_u64(x: u64) -> u64 {
    mul2_u64(mul2_u64(x))
}

const fn gen_pow2() -> [u8; 256] {
    let mut t = [0u8; 256];
    let mut x = 1u8;
    let mut i = 0;
    while i < 256 {
        t[i] = x;
        x = mul2(x);
        i += 1;
    }
    t
}

const fn gen_log2() -> [u8; 256] {
    let pow2 = gen_pow2();
    let mut t = [0u8; 256];
    let mut i = 0;
    while i < ORDER {
        t[pow2[i] as usize] = i as u8;
        i += 1;
    }
    t
}

/// Powers of 2 in the field.  `POW2[i] == 2^i`, and `POW2[255] == POW2[0]`.
pub static POW2: [u8; 256] = gen_pow2();

/// Discrete logarithms, base 2.  `LOG2[0]` is meaningless and set to 0.
pub static LOG2: [u8; 256] = gen_log2();

/// Compute `a · 2^exp`.
///
/// The result is 0 when `a` is 0, whatever the exponent.
#[inline]
pub fn exp2(a: u8, exp: u32) -> u8 {
    if a == 0 {
        0
    } else {
        let l = (LOG2[a as usize] as usize + exp as usize % ORDER) % ORDER;
        POW2[l]
    }
}

/// Multiply two field elements
#[inline]
pub fn mul(a: u8, b: u8) -> u8 {
    if b == 0 {
        0
    } else {
        exp2(a, LOG2[b as usize] as u32)
    }
}

/// Multiplicative inverse.
///
/// # Panics
///
/// If `a` is zero, which has no inverse.
#[inline]
pub fn inv(a: u8) -> u8 {
    assert!(a != 0, "Zero has no multiplicative inverse");
    POW2[(ORDER - LOG2[a as usize] as usize) % ORDER]
}

/// A lookup table for multiplying any field element by the constant `c`.
pub fn mul_table(c: u8) -> [u8; 256] {
    let mut t = [0u8; 256];
    for (x, e) in t.iter_mut().enumerate() {
        *e = mul(x as u8, c);
    }
    t
}

/// Split-nibble tables for multiplying by `c`, for `pshufb`-style lookups.
///
/// `c · x == lo[x & 0xf] ^ hi[x >> 4]`
pub fn nibble_tables(c: u8) -> ([u8; 16], [u8; 16]) {
    let mut lo = [0u8; 16];
    let mut hi = [0u8; 16];
    for i in 0..16u8 {
        lo[i as usize] = mul(i, c);
        hi[i as usize] = mul(i << 4, c);
    }
    (lo, hi)
}

/// Invert an `n × n` matrix over GF(2^8)
///
/// # Parameters
///
/// - `input`:  Row-major matrix.  Consumed as scratch space.
/// - `n`:      Size of matrix
///
/// # Returns
///
/// The row-major inverse such that `[input] × [output] = [I]`, or `ESINGULAR`
/// if the input has no inverse.
pub fn invert_matrix(mut input: Vec<u8>, n: usize) -> Result<Vec<u8>> {
    assert_eq!(input.len(), n * n);
    let mut output = vec![0u8; n * n];
    for i in 0..n {
        output[i * n + i] = 1;
    }

    for col in 0..n {
        // Find a row with a nonzero entry in this column
        let pivot = (col..n).find(|&r| input[r * n + col] != 0)
            .ok_or(Error::ESINGULAR)?;
        if pivot != col {
            for j in 0..n {
                input.swap(pivot * n + j, col * n + j);
                output.swap(pivot * n + j, col * n + j);
            }
        }

        // Normalize the pivot row
        let scale = inv(input[col * n + col]);
        for j in 0..n {
            input[col * n + j] = mul(input[col * n + j], scale);
            output[col * n + j] = mul(output[col * n + j], scale);
        }

        // Eliminate this column from every other row
        for r in (0..n).filter(|&r| r != col) {
            let f = input[r * n + col];
            if f == 0 {
                continue;
            }
            for j in 0..n {
                input[r * n + j] ^= mul(input[col * n + j], f);
                output[r * n + j] ^= mul(output[col * n + j], f);
            }
        }
    }
    Ok(output)
}

// LCOV_EXCL_STOP
