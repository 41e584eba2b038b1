// vim: tw=80
//! Parity generation and reconstruction for up to three parity columns
//!
//! Data columns are numbered `0..n` in stripe order.  Each parity column is
//! the Horner-form evaluation of the data columns:
//!
//! - P: `D0 ^ D1 ^ … ^ Dn-1`
//! - Q: `2^(n-1)·D0 ^ 2^(n-2)·D1 ^ … ^ Dn-1`
//! - R: `4^(n-1)·D0 ^ 4^(n-2)·D1 ^ … ^ Dn-1`
//!
//! Columns may have different lengths, but no data column may be longer than
//! the first one.  Bytes beyond the end of a short column count as zero.

use std::marker::PhantomData;
use crate::types::*;
use super::{
    dispatch::Dispatch,
    gf,
    kernel::{GfKernel, Kernel}
};

/// The role of one parity column
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    P = 0,
    Q = 1,
    R = 2,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::P, Role::Q, Role::R];

    /// The role of parity column `i`
    ///
    /// # Panics
    ///
    /// If `i > 2`
    pub fn of(i: usize) -> Self {
        Role::ALL[i]
    }

    /// Coefficient applied to data column `j` of `n`
    pub fn coefficient(self, j: usize, n: usize) -> u8 {
        debug_assert!(j < n);
        let e = (self as usize * (n - 1 - j)) % 255;
        gf::POW2[e]
    }
}

/// Compute one parity column from the data columns, overwriting `dst`.
///
/// `dst` must be at least as long as the longest data column that contributes
/// to it.  Longer data columns are truncated, which is useful when only a
/// prefix of a parity column is needed.  An empty column contributes nothing.
pub(super) fn accumulate(k: &Kernel, role: Role, dst: &mut [u8],
                         data: &[&[u8]])
{
    let mut iter = data.iter();
    match iter.next() {
        Some(first) => {
            let l = first.len().min(dst.len());
            dst[..l].copy_from_slice(&first[..l]);
            dst[l..].fill(0);
        },
        None => {
            dst.fill(0);
            return;
        }
    }
    for col in iter {
        let l = col.len().min(dst.len());
        let (head, tail) = dst.split_at_mut(l);
        match role {
            Role::P => k.xor(head, &col[..l]),
            Role::Q => {
                k.mul2_xor(head, &col[..l]);
                k.mul2(tail);
            },
            Role::R => {
                k.mul4_xor(head, &col[..l]);
                k.mul4(tail);
            }
        }
    }
}

/// An encoder/decoder for RAID-Z parity in GF(2^8)
///
/// Borrows the [`Dispatch`] it was created from, so a vectorized codec can
/// only be used while the vector context is held.
#[derive(Clone, Copy, Debug)]
pub struct Codec<'a> {
    kernel: Kernel,
    _dispatch: PhantomData<&'a Dispatch>,
}

impl<'a> Codec<'a> {
    /// Create a codec that runs the kernel selected by `dispatch`
    pub fn new(dispatch: &'a Dispatch) -> Self {
        Codec{kernel: dispatch.kernel(), _dispatch: PhantomData}
    }

    /// Name of the kernel in use, for diagnostics
    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Does this codec use the vector registers?
    pub fn is_vectorized(&self) -> bool {
        self.kernel.is_vectorized()
    }

    /// Generate parity columns from a complete set of data columns
    ///
    /// # Parameters
    /// - `data`:   Data columns, longest first.
    /// - `parity`: Storage for 1 to 3 parity columns, in P, Q, R order.  Each
    ///             must be as long as the first data column.  They will be
    ///             overwritten.
    pub fn encode(&self, data: &[&[u8]], parity: &mut [&mut [u8]]) {
        assert!((1..=3).contains(&parity.len()),
            "Unsupported parity level {}", parity.len());
        for (i, p) in parity.iter_mut().enumerate() {
            self.encode_one(Role::of(i), p, data);
        }
    }

    /// Generate a single parity column
    pub fn encode_one(&self, role: Role, parity: &mut [u8], data: &[&[u8]]) {
        if let Some(first) = data.first() {
            assert_eq!(parity.len(), first.len(),
                "Parity must be as long as the longest data column");
        }
        accumulate(&self.kernel, role, parity, data);
    }

    /// Reconstruct data column `x` from P.
    ///
    /// # Parameters
    /// - `x`:      Index of the missing data column
    /// - `dst`:    Storage for the missing column
    /// - `p`:      The P column
    /// - `data`:   All data columns.  The contents of `data[x]` are ignored.
    pub fn decode_p(&self, x: usize, dst: &mut [u8], p: &[u8], data: &[&[u8]])
    {
        let len = dst.len();
        dst.copy_from_slice(&p[..len]);
        for (j, col) in data.iter().enumerate().filter(|(j, _)| *j != x) {
            let l = col.len().min(len);
            self.kernel.xor(&mut dst[..l], &col[..l]);
        }
    }

    /// Reconstruct data column `x` from Q.
    ///
    /// Arguments are as for [`decode_p`](Self::decode_p).
    pub fn decode_q(&self, x: usize, dst: &mut [u8], q: &[u8], data: &[&[u8]])
    {
        let n = data.len();
        let len = dst.len();
        let others = without(data, &[x]);
        let mut qx = vec![0u8; len];
        accumulate(&self.kernel, Role::Q, &mut qx, &others);
        self.kernel.xor(&mut qx, &q[..len]);
        // Now qx holds 2^(n-1-x)·Dx.  Divide it out.
        let c = gf::POW2[(255 - (n - 1 - x) % 255) % 255];
        self.kernel.mul(dst, &qx, c);
    }

    /// Reconstruct data columns `x` and `y` from P and Q.
    ///
    /// # Parameters
    /// - `x`, `y`:     Indices of the missing data columns.  `x < y`.
    /// - `dx`, `dy`:   Storage for the missing columns
    /// - `p`, `q`:     The P and Q columns
    /// - `data`:       All data columns.  `data[x]` and `data[y]` are ignored.
    ///
    /// # Panics
    ///
    /// If `x` and `y` are 255 or more columns apart.  Their Q coefficients
    /// would be equal, so P and Q could not tell them apart.
    #[allow(clippy::too_many_arguments)]
    pub fn decode_pq(&self, x: usize, y: usize, dx: &mut [u8], dy: &mut [u8],
                     p: &[u8], q: &[u8], data: &[&[u8]])
    {
        assert!(x < y);
        assert!(y - x < 255,
            "Columns {x} and {y} share a Q coefficient");
        assert!(dy.len() <= dx.len());
        let n = data.len();
        let len = dx.len();
        let others = without(data, &[x, y]);

        // Syndromes: P and Q with the known columns' contributions removed.
        // Afterwards, ps = Dx ^ Dy and qs = 2^(n-1-x)·Dx ^ 2^(n-1-y)·Dy
        let mut ps = vec![0u8; len];
        let mut qs = vec![0u8; len];
        accumulate(&self.kernel, Role::P, &mut ps, &others);
        accumulate(&self.kernel, Role::Q, &mut qs, &others);
        self.kernel.xor(&mut ps, &p[..len]);
        self.kernel.xor(&mut qs, &q[..len]);

        // Dx = (a·ps ^ b·qs) / (a ^ 1), where a = 2^(x-y) and b = 2^-(n-1-x)
        let a = gf::POW2[(255 + x - y) % 255];
        let b = gf::POW2[(255 - (n - 1 - x) % 255) % 255];
        let tmp = 255 - u32::from(gf::LOG2[usize::from(a ^ 1)]);
        let ac = gf::exp2(a, tmp);
        let bc = gf::exp2(b, tmp);
        self.kernel.mul(dx, &ps, ac);
        self.kernel.mul_xor(dx, &qs, bc);

        // Dy = ps ^ Dx
        let ylen = dy.len();
        dy.copy_from_slice(&ps[..ylen]);
        self.kernel.xor(dy, &dx[..ylen]);
    }

    /// Reconstruct any 1 to 3 data columns using as many parity columns.
    ///
    /// Solves the linear system formed by the chosen parity rows, restricted
    /// to the missing columns, by inverting its matrix.
    ///
    /// # Parameters
    /// - `targets`:    Indices of the missing data columns, ascending
    /// - `dsts`:       Storage for each missing column
    /// - `parity`:     The parity columns to use, with their roles.  Exactly
    ///                 as many as there are targets.
    /// - `data`:       All data columns.  Targeted columns are ignored.
    pub fn decode_general(&self, targets: &[usize], dsts: &mut [&mut [u8]],
                          parity: &[(Role, &[u8])], data: &[&[u8]])
        -> Result<()>
    {
        let nt = targets.len();
        assert!((1..=3).contains(&nt));
        assert_eq!(nt, dsts.len());
        assert_eq!(nt, parity.len());
        let n = data.len();

        let mut m = Vec::with_capacity(nt * nt);
        for (role, _) in parity {
            for &t in targets {
                m.push(role.coefficient(t, n));
            }
        }
        let minv = gf::invert_matrix(m, nt)?;

        for (i, dst) in dsts.iter_mut().enumerate() {
            let len = dst.len();
            let row = &minv[i * nt..(i + 1) * nt];
            let mut parities = parity.iter().zip(row);
            if let Some(((_, pcol), c)) = parities.next() {
                self.kernel.mul(dst, &pcol[..len], *c);
            }
            for ((_, pcol), c) in parities {
                self.kernel.mul_xor(dst, &pcol[..len], *c);
            }
            for (j, col) in data.iter().enumerate() {
                if targets.contains(&j) {
                    continue;
                }
                let c = parity.iter()
                    .zip(row)
                    .fold(0, |acc, ((role, _), r)| {
                        acc ^ gf::mul(*r, role.coefficient(j, n))
                    });
                let l = col.len().min(len);
                self.kernel.mul_xor(&mut dst[..l], &col[..l], c);
            }
        }
        Ok(())
    }
}

/// Copy `data`, replacing the excluded columns with empty ones
fn without<'a>(data: &[&'a [u8]], excluded: &[usize]) -> Vec<&'a [u8]> {
    data.iter()
        .enumerate()
        .map(|(j, col)| if excluded.contains(&j) { &[][..] } else { *col })
        .collect()
}

// LCOV_EXCL_STOP
