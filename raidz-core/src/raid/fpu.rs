// vim: tw=80
//! Scoped ownership of the vector register file
//!
//! Code that touches the wide vector registers must hold an [`FpuGuard`] for
//! as long as it does so.  Guards nest, and are released when dropped, so an
//! early return or a panic can never leak one.
//!
//! Some execution contexts may not use the vector unit at all.  Such a context
//! calls [`set_permitted(false)`](set_permitted) on its thread, after which
//! [`FpuGuard::begin`] refuses and callers fall back to scalar code.

use std::{
    cell::Cell,
    marker::PhantomData
};

thread_local! {
    static PERMITTED: Cell<bool> = const { Cell::new(true) };
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

/// Allow or forbid vector register use on the current thread.
///
/// Takes effect for guards begun afterwards.  Guards that are already held are
/// unaffected.
pub fn set_permitted(permitted: bool) {
    PERMITTED.with(|p| p.set(permitted));
}

/// May the current thread use the vector registers?
pub fn is_permitted() -> bool {
    PERMITTED.with(Cell::get)
}

/// How many guards are currently held by this thread
pub fn depth() -> u32 {
    DEPTH.with(Cell::get)
}

/// Proof that the current thread owns the vector execution context.
///
/// Not `Send`: the context belongs to the thread that acquired it.
#[derive(Debug)]
#[must_use = "the vector context is released as soon as the guard is dropped"]
pub struct FpuGuard {
    _not_send: PhantomData<*const ()>
}

impl FpuGuard {
    /// Acquire the vector context, or return `None` if this thread may not
    pub fn begin() -> Option<Self> {
        if !is_permitted() {
            return None;
        }
        let d = DEPTH.with(|d| {
            let v = d.get() + 1;
            d.set(v);
            v
        });
        if d == 1 {
            tracing::trace!("acquired vector context");
        }
        Some(FpuGuard{_not_send: PhantomData})
    }
}

impl Drop for FpuGuard {
    fn drop(&mut self) {
        let d = DEPTH.with(|d| {
            let v = d.get() - 1;
            d.set(v);
            v
        });
        if d == 0 {
            tracing::trace!("released vector context");
        }
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use std::panic;
    use super::*;

    // Each test runs on its own thread, so the thread-local state starts fresh.

    #[test]
    fn begin_and_release() {
        assert_eq!(depth(), 0);
        let g = FpuGuard::begin();
        assert!(g.is_some());
        assert_eq!(depth(), 1);
        drop(g);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn nested() {
        let g0 = FpuGuard::begin().unwrap();
        {
            let _g1 = FpuGuard::begin().unwrap();
            assert_eq!(depth(), 2);
        }
        assert_eq!(depth(), 1);
        drop(g0);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn not_permitted() {
        set_permitted(false);
        assert!(!is_permitted());
        assert!(FpuGuard::begin().is_none());
        assert_eq!(depth(), 0);
        set_permitted(true);
        assert!(FpuGuard::begin().is_some());
    }

    #[test]
    fn released_on_error_return() {
        fn fail() -> Result<(), ()> {
            Err(())
        }
        fn fallible() -> Result<(), ()> {
            let _g = FpuGuard::begin().unwrap();
            assert_eq!(depth(), 1);
            fail()?;
            Ok(())
        }
        assert!(fallible().is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn released_on_panic() {
        let r = panic::catch_unwind(|| {
            let _g = FpuGuard::begin().unwrap();
            panic!("oops");
        });
        assert!(r.is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn per_thread() {
        let _g = FpuGuard::begin().unwrap();
        set_permitted(false);
        std::thread::spawn(|| {
            assert_eq!(depth(), 0);
            assert!(is_permitted());
        }).join().unwrap();
        assert_eq!(depth(), 1);
    }
}
// LCOV_EXCL_STOP
