// vim: tw=80
//! Common type definitions used throughout the parity engine

use divbuf::{DivBuf, DivBufMut};
use enum_primitive_derive::Primitive;
use num_traits::{FromPrimitive, ToPrimitive};
use thiserror::Error;
use std::io;

/// Our `IoVec`.  Unlike the standard library's, ours is reference-counted so it
/// can have more than one owner.
pub type IoVec = DivBuf;

/// Mutable version of `IoVec`.  Uniquely owned.
pub type IoVecMut = DivBufMut;

/// The parity engine's error type.  Basically just an errno, plus a few
/// conditions that only RAID can produce.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq, Primitive)]
pub enum Error {
    // Standard errnos
    #[error("Input/output error")]
    EIO             = libc::EIO as isize,
    #[error("Device not configured")]
    ENXIO           = libc::ENXIO as isize,
    #[error("Invalid argument")]
    EINVAL          = libc::EINVAL as isize,

    //// Custom error types below
    /// A column's contents did not match what its redundancy says they should
    /// be.
    #[error("Integrity check failed")]
    EINTEGRITY      = 256,
    /// More columns are missing than the stripe has parity to cover.
    #[error("Too many missing columns to reconstruct")]
    EUNRECOVERABLE  = 257,
    /// The coefficient matrix for a reconstruction could not be inverted.
    #[error("Singular coefficient matrix")]
    ESINGULAR       = 258,
    #[error("Unknown error")]
    EUNKNOWN        = 259,
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        e.raw_os_error()
            .and_then(Error::from_i32)
            .unwrap_or(Error::EUNKNOWN)
    }
}

impl From<Error> for i32 {
    fn from(e: Error) -> Self {
        // Every variant has an explicit discriminant that fits in an i32
        e.to_i32().unwrap_or(Error::EUNKNOWN as i32)
    }
}

pub type Result<T> = ::std::result::Result<T, Error>;

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn from_io_error() {
        let e = io::Error::from_raw_os_error(libc::ENXIO);
        assert_eq!(Error::from(e), Error::ENXIO);
    }

    #[test]
    fn from_unknown_io_error() {
        let e = io::Error::new(io::ErrorKind::Other, "whatever");
        assert_eq!(Error::from(e), Error::EUNKNOWN);
    }

    #[test]
    fn into_i32() {
        assert_eq!(i32::from(Error::EIO), libc::EIO);
        assert_eq!(i32::from(Error::EUNRECOVERABLE), 257);
    }

    #[test]
    fn display() {
        assert_eq!(Error::EINTEGRITY.to_string(), "Integrity check failed");
    }
}
// LCOV_EXCL_STOP
