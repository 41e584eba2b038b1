// vim: tw=80
//! 128-bit kernels using SSE2, SSSE3, and SSE4.1

use cfg_if::cfg_if;
use super::{GfKernel, scalar};

/// Kernels for CPUs with SSE4.1.
///
/// Only obtainable through [`Sse4::detect`], so holding one proves that the
/// CPU can run it.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Sse4 {
    _priv: ()
}

impl Sse4 {
    /// Return an `Sse4` if and only if the running CPU supports it
    pub fn detect() -> Option<Self> {
        cfg_if! {
            if #[cfg(target_arch = "x86_64")] {
                if is_x86_feature_detected!("sse4.1") &&
                    is_x86_feature_detected!("ssse3")
                {
                    Some(Sse4{_priv: ()})
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

    const W: usize = 16;

    /// Double each byte lane.
    ///
    /// `blendv` picks the reduction constant for exactly those lanes whose
    /// high bit is set.
    #[inline]
    #[target_feature(enable = "sse2,ssse3,sse4.1")]
    unsafe fn mul2v(x: __m128i) -> __m128i {
        let poly = _mm_set1_epi8(gf::POLY as i8);
        let red = _mm_blendv_epi8(_mm_setzero_si128(), poly, x);
        _mm_xor_si128(_mm_add_epi8(x, x), red)
    }

    #[inline]
    #[target_feature(enable = "sse2,ssse3,sse4.1")]
    unsafe fn mul4v(x: __m128i) -> __m128i {
        mul2v(mul2v(x))
    }

    /// Multiply each byte lane by the constant whose nibble tables are `lo`
    /// and `hi`.
    #[inline]
    #[target_feature(enable = "sse2,ssse3,sse4.1")]
    unsafe fn mulcv(x: __m128i, lo: __m128i, hi: __m128i) -> __m128i {
        let mask = _mm_set1_epi8(0x0f);
        let l = _mm_shuffle_epi8(lo, _mm_and_si128(x, mask));
        let h = _mm_shuffle_epi8(hi, _mm_and_si128(_mm_srli_epi64::<4>(x),
                                                   mask));
        _mm_xor_si128(l, h)
    }

    macro_rules! binop {
        ($name:ident, $tail:path, |$d:ident, $s:ident| $body:expr) => {
            #[target_feature(enable = "sse2,ssse3,sse4.1")]
            pub(super) unsafe fn $name(dst: &mut [u8], src: &[u8]) {
                assert_eq!(dst.len(), src.len());
                let n = dst.len() / W * W;
                let mut i = 0;
                while i < n {
                    let $d = _mm_loadu_si128(dst.as_ptr().add(i).cast());
                    let $s = _mm_loadu_si128(src.as_ptr().add(i).cast());
                    _mm_storeu_si128(dst.as_mut_ptr().add(i).cast(), $body);
                    i += W;
                }
                $tail(&mut dst[n..], &src[n..]);
            }
        }
    }

    macro_rules! unop {
        ($name:ident, $tail:path, |$d:ident| $body:expr) => {
            #[target_feature(enable = "sse2,ssse3,sse4.1")]
            pub(super) unsafe fn $name(dst: &mut [u8]) {
                let n = dst.len() / W * W;
                let mut i = 0;
                while i < n {
                    let $d = _mm_loadu_si128(dst.as_ptr().add(i).cast());
                    _mm_storeu_si128(dst.as_mut_ptr().add(i).cast(), $body);
                    i += W;
                }
                $tail(&mut dst[n..]);
            }
        }
    }

    binop!(xor, scalar::xor, |d, s| _mm_xor_si128(d, s));
    binop!(mul2_xor, scalar::mul2_xor, |d, s| _mm_xor_si128(mul2v(d), s));
    binop!(mul4_xor, scalar::mul4_xor, |d, s| _mm_xor_si128(mul4v(d), s));
    unop!(mul2, scalar::mul2, |d| mul2v(d));
    unop!(mul4, scalar::mul4, |d| mul4v(d));

    #[target_feature(enable = "sse2,ssse3,sse4.1")]
    pub(super) unsafe fn mul(dst: &mut [u8], src: &[u8], c: u8) {
        assert_eq!(dst.len(), src.len());
        let (lo_t, hi_t) = gf::nibble_tables(c);
        let lo = _mm_loadu_si128(lo_t.as_ptr().cast());
        let hi = _mm_loadu_si128(hi_t.as_ptr().cast());
        let n = dst.len() / W * W;
        let mut i = 0;
        while i < n {
            let s = _mm_loadu_si128(src.as_ptr().add(i).cast());
            _mm_storeu_si128(dst.as_mut_ptr().add(i).cast(), mulcv(s, lo, hi));
            i += W;
        }
        scalar::mul(&mut dst[n..], &src[n..], c);
    }

    #[target_feature(enable = "sse2,ssse3,sse4.1")]
    pub(super) unsafe fn mul_xor(dst: &mut [u8], src: &[u8], c: u8) {
        assert_eq!(dst.len(), src.len());
        if c == 0 {
            return;
        }
        let (lo_t, hi_t) = gf::nibble_tables(c);
        let lo = _mm_loadu_si128(lo_t.as_ptr().cast());
        let hi = _mm_loadu_si128(hi_t.as_ptr().cast());
        let n = dst.len() / W * W;
        let mut i = 0;
        while i < n {
            let d = _mm_loadu_si128(dst.as_ptr().add(i).cast());
            let s = _mm_loadu_si128(src.as_ptr().add(i).cast());
            let r = _mm_xor_si128(d, mulcv(s, lo, hi));
            _mm_storeu_si128(dst.as_mut_ptr().add(i).cast(), r);
            i += W;
        }
        scalar::mul_xor(&mut dst[n..], &src[n..], c);
    }
}

// The unsafe blocks below are sound because an `Sse4` only exists once
// `detect` has confirmed the CPU features that `imp` is compiled for.
cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        impl GfKernel for Sse4 {
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
        impl GfKernel for Sse4 {
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
