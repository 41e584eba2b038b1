// vim: tw=80
//! 256-bit kernels using AVX2

use cfg_if::cfg_if;
use super::{GfKernel, scalar};

/// Kernels for CPUs with AVX2.
///
/// Only obtainable through [`Avx::detect`], so holding one proves that the CPU
/// can run it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Avx {
    _priv: ()
}

impl Avx {
    /// Return an `Avx` if and only if the running CPU supports it
    pub fn detect() -> Option<Self> {
        cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                if is_x86_feature_detected!("avx2") {
                    Some(Avx{_priv: ()})
                } else {
                    None
                }
            } else {
                None
            }
        }
    }
}

#[cfg(target_arch = "x86_64")]
mod imp {
    use std::arch::x86_64::*;
    use crate::raid::gf;
    use super::scalar;

    const W: usize = 32;

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn mul2v(x: __m256i) -> __m256i {
        let poly = _mm256_set1_epi8(gf::POLY as i8);
        let red = _mm256_blendv_epi8(_mm256_setzero_si256(), poly, x);
        _mm256_xor_si256(_mm256_add_epi8(x, x), red)
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn mul4v(x: __m256i) -> __m256i {
        mul2v(mul2v(x))
    }

    /// `pshufb` only looks up within each 128-bit lane, so the nibble tables
    /// are broadcast to both.
    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn load_tables(c: u8) -> (__m256i, __m256i) {
        let (lo, hi) = gf::nibble_tables(c);
        (_mm256_broadcastsi128_si256(_mm_loadu_si128(lo.as_ptr().cast())),
         _mm256_broadcastsi128_si256(_mm_loadu_si128(hi.as_ptr().cast())))
    }

    #[inline]
    #[target_feature(enable = "avx2")]
    unsafe fn mulcv(x: __m256i, lo: __m256i, hi: __m256i) -> __m256i {
        let mask = _mm256_set1_epi8(0x0f);
        let l = _mm256_shuffle_epi8(lo, _mm256_and_si256(x, mask));
        let h = _mm256_shuffle_epi8(hi,
            _mm256_and_si256(_mm256_srli_epi64::<4>(x), mask));
        _mm256_xor_si256(l, h)
    }

    macro_rules! binop {
        ($name:ident, $tail:path, |$d:ident, $s:ident| $body:expr) => {
            #[target_feature(enable = "avx2")]
            pub(super) unsafe fn $name(dst: &mut [u8], src: &[u8]) {
                assert_eq!(dst.len(), src.len());
                let n = dst.len() / W * W;
                let mut i = 0;
                while i < n {
                    let $d = _mm256_loadu_si256(dst.as_ptr().add(i).cast());
                    let $s = _mm256_loadu_si256(src.as_ptr().add(i).cast());
                    _mm256_storeu_si256(dst.as_mut_ptr().add(i).cast(), $body);
                    i += W;
                }
                $tail(&mut dst[n..], &src[n..]);
            }
        }
    }

    macro_rules! unop {
        ($name:ident, $tail:path, |$d:ident| $body:expr) => {
            #[target_feature(enable = "avx2")]
            pub(super) unsafe fn $name(dst: &mut [u8]) {
                let n = dst.len() / W * W;
                let mut i = 0;
                while i < n {
                    let $d = _mm256_loadu_si256(dst.as_ptr().add(i).cast());
                    _mm256_storeu_si256(dst.as_mut_ptr().add(i).cast(), $body);
                    i += W;
                }
                $tail(&mut dst[n..]);
            }
        }
    }

    binop!(xor, scalar::xor, |d, s| _mm256_xor_si256(d, s));
    binop!(mul2_xor, scalar::mul2_xor, |d, s| _mm256_xor_si256(mul2v(d), s));
    binop!(mul4_xor, scalar::mul4_xor, |d, s| _mm256_xor_si256(mul4v(d), s));
    unop!(mul2, scalar::mul2, |d| mul2v(d));
    unop!(mul4, scalar::mul4, |d| mul4v(d));

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul(dst: &mut [u8], src: &[u8], c: u8) {
        assert_eq!(dst.len(), src.len());
        let (lo, hi) = load_tables(c);
        let n = dst.len() / W * W;
        let mut i = 0;
        while i < n {
            let s = _mm256_loadu_si256(src.as_ptr().add(i).cast());
            _mm256_storeu_si256(dst.as_mut_ptr().add(i).cast(),
                                mulcv(s, lo, hi));
            i += W;
        }
        scalar::mul(&mut dst[n..], &src[n..], c);
    }

    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
        assert_eq!(dst.len(), src.len());
        if c == 0 {
            return;
        }
        let (lo, hi) = load_tables(c);
        let n = dst.len() / W * W;
        let mut i = 0;
        while i < n {
            let d = _mm256_loadu_si256(dst.as_ptr().add(i).cast());
            let s = _mm256_loadu_si256(src.as_ptr().add(i).cast());
            let r = _mm256_xor_si256(d, mulcv(s, lo, hi));
            _mm256_storeu_si256(dst.as_mut_ptr().add(i).cast(), r);
            i += W;
        }
        scalar::mul_xor(&mut dst[n..], &src[n..], c);
    }
}

// The unsafe blocks below are sound because an `Avx` only exists once
// `detect` has confirmed the CPU features that `imp` is compiled for.
cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        impl GfKernel for Avx {
            fn xor(&self, dst: &mut [u8], src: &[u8]) {
                unsafe { imp::xor(dst, src) }
            }

            fn mul2_xor(&self, dst: &mut [u8], src: &[u8]) {
                unsafe { imp::mul2_xor(dst, src) }
            }

            fn mul4_xor(&self, dst: &mut [u8], src: &[u8]) {
                unsafe { imp::mul4_xor(dst, src) }
            }

            fn mul2(&self, dst: &mut [u8]) {
                unsafe { imp::mul2(dst) }
            }

            fn mul4(&self, dst: &mut [u8]) {
                unsafe { imp::mul4(dst) }
            }

            fn mul(&self, dst: &mut [u8], src: &[u8], c: u8) {
                unsafe { imp::mul(dst, src, c) }
            }

            fn mul_xor(&self, dst: &mut [u8], src: &[u8], c: u8) {
                unsafe { imp::mul_xor(dst, src, c) }
            }
        }
    } else {
        // Unreachable in practice: `detect` never succeeds off x86_64.
        impl GfKernel for Avx {
            fn xor(&self, dst: &mut [u8], src: &[u8]) {
                scalar::xor(dst, src)
            }

            fn mul2_xor(&self, dst: &mut [u8], src: &[u8]) {
                scalar::mul2_xor(dst, src)
            }

            fn mul4_xor(&self, dst: &mut [u8], src: &[u8]) {
                scalar::mul4_xor(dst, src)
            }

            fn mul2(&self, dst: &mut [u8]) {
                scalar::mul2(dst)
            }

            fn mul4(&self, dst: &mut [u8]) {
                scalar::mul4(dst)
            }

            fn mul(&self, dst: &mut [u8], src: &[u8], c: u8) {
                scalar::mul(dst, src, c)
            }

            fn mul_xor(&self, dst: &mut [u8], src: &[u8], c: u8) {
                scalar::mul_xor(dst, src, c)
            }
        }
    }
}
