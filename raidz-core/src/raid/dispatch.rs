// vim: tw=80
//! Choosing which kernel implementation to run

use lazy_static::lazy_static;
use std::{
    fmt,
    str::FromStr
};
use super::{
    fpu::FpuGuard,
    kernel::{Avx, Kernel, Scalar, Sse4}
};

/// Which vector instructions the parity engine may use
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum VectorMode {
    /// Portable scalar code only
    Off,
    /// 128-bit SSE4.1 kernels
    Sse4,
    /// 256-bit AVX2 kernels
    Avx,
}

impl VectorMode {
    /// The next less demanding mode
    fn lower(self) -> Self {
        match self {
            VectorMode::Avx => VectorMode::Sse4,
            _ => VectorMode::Off,
        }
    }
}

impl fmt::Display for VectorMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            VectorMode::Off => "off",
            VectorMode::Sse4 => "sse4",
            VectorMode::Avx => "avx",
        };
        f.write_str(s)
    }
}

impl FromStr for VectorMode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" | "scalar" => Ok(VectorMode::Off),
            "sse4" => Ok(VectorMode::Sse4),
            "avx" => Ok(VectorMode::Avx),
            _ => Err("expected one of off, scalar, sse4, avx")
        }
    }
}

/// The CPU's vector capabilities, detected once
#[derive(Debug)]
struct Capabilities {
    sse4: Option<Sse4>,
    avx: Option<Avx>,
}

impl Capabilities {
    fn detect() -> Self {
        let caps = Capabilities {
            sse4: Sse4::detect(),
            avx: Avx::detect(),
        };
        tracing::debug!(sse4 = caps.sse4.is_some(), avx = caps.avx.is_some(),
                        "detected CPU vector capabilities");
        caps
    }

    fn kernel(&self, mode: VectorMode) -> Option<Kernel> {
        match mode {
            VectorMode::Off => Some(Kernel::from(Scalar)),
            VectorMode::Sse4 => self.sse4.map(Kernel::from),
            VectorMode::Avx => self.avx.map(Kernel::from),
        }
    }
}

lazy_static! {
    static ref CAPS: Capabilities = Capabilities::detect();
}

/// The most capable mode that the running CPU supports.
pub fn best_mode() -> VectorMode {
    if CAPS.avx.is_some() {
        VectorMode::Avx
    } else if CAPS.sse4.is_some() {
        VectorMode::Sse4
    } else {
        VectorMode::Off
    }
}

/// Every mode that the running CPU supports, least capable first
pub fn supported_modes() -> Vec<VectorMode> {
    [VectorMode::Off, VectorMode::Sse4, VectorMode::Avx].into_iter()
        .filter(|m| CAPS.kernel(*m).is_some())
        .collect()
}

/// The kernel that will run for `mode`, ignoring whether the current thread
/// may use the vector registers.  Only [`Dispatch`] may hand one out.
///
/// A mode the CPU doesn't support is lowered until one is found.
fn kernel_for(mut mode: VectorMode) -> Kernel {
    loop {
        if let Some(k) = CAPS.kernel(mode) {
            return k;
        }
        let lower = mode.lower();
        tracing::debug!(requested = %mode, using = %lower,
                        "vector mode not supported by this CPU");
        mode = lower;
    }
}

/// A kernel selection, valid for as long as it lives.
///
/// When the selected kernel is vectorized, a `Dispatch` holds the vector
/// context until it is dropped.
#[derive(Debug)]
pub struct Dispatch {
    kernel: Kernel,
    _guard: Option<FpuGuard>,
}

impl Dispatch {
    /// Select a kernel for `mode` and, if needed, acquire the vector context.
    ///
    /// Falls back to the scalar kernel if this thread may not use the vector
    /// registers.
    pub fn begin(mode: VectorMode) -> Self {
        let kernel = kernel_for(mode);
        if !kernel.is_vectorized() {
            return Dispatch{kernel, _guard: None};
        }
        match FpuGuard::begin() {
            Some(g) => Dispatch{kernel, _guard: Some(g)},
            None => {
                tracing::debug!(requested = %mode,
                                "vector context unavailable; using scalar");
                Dispatch{kernel: Kernel::from(Scalar), _guard: None}
            }
        }
    }

    pub(super) fn kernel(&self) -> Kernel {
        self.kernel
    }

    /// Name of the selected kernel, for diagnostics
    pub fn kernel_name(&self) -> &'static str {
        self.kernel.name()
    }

    /// Does the selected kernel use the vector registers?
    pub fn is_vectorized(&self) -> bool {
        self.kernel.is_vectorized()
    }
}

// LCOV_EXCL_STOP
