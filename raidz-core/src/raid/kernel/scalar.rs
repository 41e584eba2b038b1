// vim: tw=80
//! Portable kernels.  Doubling works on eight bytes at a time in a `u64`.

use crate::raid::gf;
use super::GfKernel;

const W: usize = 8;

#[inline]
fn load(b: &[u8]) -> u64 {
    let mut w = [0u8; W];
    w.copy_from_slice(b);
    u64::from_ne_bytes(w)
}

/// Apply `fw` to each whole word of `dst` and `src`, and `fb` to the tail.
#[inline]
fn wordwise2<FW, FB>(dst: &mut [u8], src: &[u8], fw: FW, fb: FB)
    where FW: Fn(u64, u64) -> u64,
          FB: Fn(u8, u8) -> u8
{
    assert_eq!(dst.len(), src.len());
    let mut dwords = dst.chunks_exact_mut(W);
    let mut swords = src.chunks_exact(W);
    for (d, s) in (&mut dwords).zip(&mut swords) {
        let x = fw(load(d), load(s));
        d.copy_from_slice(&x.to_ne_bytes());
    }
    for (d, s) in dwords.into_remainder().iter_mut().zip(swords.remainder()) {
        *d = fb(*d, *s);
    }
}

/// Like `wordwise2`, but with no source operand
#[inline]
fn wordwise1<FW, FB>(dst: &mut [u8], fw: FW, fb: FB)
    where FW: Fn(u64) -> u64,
          FB: Fn(u8) -> u8
{
    let mut dwords = dst.chunks_exact_mut(W);
    for d in &mut dwords {
        let x = fw(load(d));
        d.copy_from_slice(&x.to_ne_bytes());
    }
    for d in dwords.into_remainder().iter_mut() {
        *d = fb(*d);
    }
}

pub(super) fn xor(dst: &mut [u8], src: &[u8]) {
    wordwise2(dst, src, |d, s| d ^ s, |d, s| d ^ s);
}

pub(super) fn mul2_xor(dst: &mut [u8], src: &[u8]) {
    wordwise2(dst, src, |d, s| gf::mul2_u64(d) ^ s, |d, s| gf::mul2(d) ^ s);
}

pub(super) fn mul4_xor(dst: &mut [u8], src: &[u8]) {
    wordwise2(dst, src, |d, s| gf::mul4_u64(d) ^ s, |d, s| gf::mul4(d) ^ s);
}

pub(super) fn mul2(dst: &mut [u8]) {
    wordwise1(dst, gf::mul2_u64, gf::mul2);
}

pub(super) fn mul4(dst: &mut [u8]) {
    wordwise1(dst, gf::mul4_u64, gf::mul4);
}

pub(super) fn mul(dst: &mut [u8], src: &[u8], c: u8) {
    assert_eq!(dst.len(), src.len());
    match c {
        0 => dst.fill(0),
        1 => dst.copy_from_slice(src),
        _ => {
            let table = gf::mul_table(c);
            for (d, s) in dst.iter_mut().zip(src) {
                *d = table[*s as usize];
            }
        }
    }
}

pub(super) fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
    assert_eq!(dst.len(), src.len());
    match c {
        0 => (),
        1 => xor(dst, src),
        _ => {
            let table = gf::mul_table(c);
            for (d, s) in dst.iter_mut().zip(src) {
                *d ^= table[*s as usize];
            }
        }
    }
}

/// Kernels that run on any CPU
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Scalar;

impl GfKernel for Scalar {
    fn xor(&self, dst: &mut [u8], src: &[u8]) {
        xor(dst, src)
    }

    fn mul2_xor(&self, dst: &mut [u8], src: &[u8]) {
        mul2_xor(dst, src)
    }

    fn mul4_xor(&self, dst: &mut [u8], src: &[u8]) {
        mul4_xor(dst, src)
    }

    fn mul2(&self, dst: &mut [u8]) {
        mul2(dst)
    }

    fn mul4(&self, dst: &mut [u8]) {
        mul4(dst)
    }

    fn mul(&self, dst: &mut [u8], src: &[u8], c: u8) {
        mul(dst, src, c)
    }

    fn mul_xor(&self, dst: &mut [u8], src: &[u8], c: u8) {
        mul_xor(dst, src, c)
    }
}
