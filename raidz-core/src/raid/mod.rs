// vim: tw=80
//! RAID-Z parity engine
//!
//! Computes and checks the P, Q, and R parity columns of a single stripe, and
//! reconstructs up to three missing columns from the survivors.  Everything is
//! synchronous; nothing here issues I/O.
//!
//! The usual flow is to describe a stripe with a [`MapBuilder`], then call
//! [`RaidzMap::generate_parity`] on the write path or
//! [`RaidzMap::reconstruct`] on the read path.

mod codec;
mod dispatch;
pub mod fpu;
pub mod gf;
mod kernel;
mod map;
mod report;

pub use self::codec::{Codec, Role};
pub use self::dispatch::{Dispatch, VectorMode, best_mode, supported_modes};
pub use self::map::{MAX_COLS, MapBuilder, RaidzCol, RaidzMap, Tunables};
pub use self::report::{CksumInfo, CksumReport};
