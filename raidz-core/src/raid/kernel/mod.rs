// vim: tw=80
//! Bulk GF(2^8) kernels
//!
//! Parity generation and reconstruction are written once, against the
//! `GfKernel` operations.  Each implementation (portable scalar, SSE4, and AVX)
//! supplies the same operations and must produce bit-for-bit identical output.
//!
//! Every operation that takes both `dst` and `src` requires them to have the
//! same length.

use enum_dispatch::enum_dispatch;

mod avx;
mod scalar;
mod sse4;

pub use self::avx::Avx;
pub use self::scalar::Scalar;
pub use self::sse4::Sse4;

#[enum_dispatch]
pub trait GfKernel {
    /// `dst[i] ^= src[i]`
    fn xor(&self, dst: &mut [u8], src: &[u8]);

    /// `dst[i] = 2·dst[i] ^ src[i]`
    fn mul2_xor(&self, dst: &mut [u8], src: &[u8]);

    /// `dst[i] = 4·dst[i] ^ src[i]`
    fn mul4_xor(&self, dst: &mut [u8], src: &[u8]);

    /// `dst[i] = 2·dst[i]`
    fn mul2(&self, dst: &mut [u8]);

    /// `dst[i] = 4·dst[i]`
    fn mul4(&self, dst: &mut [u8]);

    /// `dst[i] = c·src[i]`
    fn mul(&self, dst: &mut [u8], src: &[u8], c: u8);

    /// `dst[i] ^= c·src[i]`
    fn mul_xor(&self, dst: &mut [u8], src: &[u8], c: u8);
}

/// One concrete implementation of the GF kernels.
///
/// The vectorized variants can only be constructed after the CPU has been
/// checked for the instructions they need.
#[enum_dispatch(GfKernel)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kernel {
    Scalar(Scalar),
    Sse4(Sse4),
    Avx(Avx),
}

impl Kernel {
    /// Short name, for logs and reports
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Scalar(_) => "scalar",
            Kernel::Sse4(_) => "sse4",
            Kernel::Avx(_) => "avx",
        }
    }

    /// Does this implementation use the wide vector registers?
    pub fn is_vectorized(&self) -> bool {
        !matches!(self, Kernel::Scalar(_))
    }
}

// LCOV_EXCL_STOP
