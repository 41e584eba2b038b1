// vim: tw=80

// I suppose I should probably fix this some day, but I just don't like the look
// of e.g. "Eio" as opposed to "EIO".
#![allow(clippy::upper_case_acronyms)]

// Matrix code just looks better to me with index loops than with a pile of
// zipped iterators.
#![allow(clippy::needless_range_loop)]

pub mod raid;
pub mod types;

pub use crate::types::*;
