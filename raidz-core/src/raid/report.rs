// vim: tw=80
//! Deferred reporting of checksum failures
//!
//! When a block fails its checksum, the layer above wants to know what each
//! column *should* have contained, but it only learns that after trying
//! different reconstructions.  A [`CksumReport`] captures the stripe as it was
//! read, so it can be compared against the good data once that is known.

use std::sync::Arc;
use crate::types::*;
use super::{
    codec::{Codec, Role},
    dispatch::{Dispatch, VectorMode}
};

/// A copy of every column of a stripe, shared by all of its reports
#[derive(Debug)]
pub(super) struct StripeCopy {
    cols: Vec<Vec<u8>>,
    firstdatacol: usize,
}

impl StripeCopy {
    pub(super) fn new<'a, I>(cols: I, firstdatacol: usize) -> Self
        where I: IntoIterator<Item=&'a [u8]>
    {
        let cols = cols.into_iter().map(<[u8]>::to_vec).collect();
        StripeCopy{cols, firstdatacol}
    }
}

/// The good and bad contents of one column
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CksumInfo {
    /// What the column should have contained
    pub good: Vec<u8>,
    /// What was actually read
    pub bad: Vec<u8>,
}

impl CksumInfo {
    /// Number of bytes that differ
    pub fn ndiff(&self) -> usize {
        self.good.iter()
            .zip(&self.bad)
            .filter(|(g, b)| g != b)
            .count()
    }
}

/// An outstanding checksum report for one column of a stripe
#[derive(Debug)]
pub struct CksumReport {
    copy: Arc<StripeCopy>,
    col: usize,
    vector_mode: VectorMode,
}

impl CksumReport {
    pub(super) fn new(copy: Arc<StripeCopy>, col: usize,
                      vector_mode: VectorMode) -> Self
    {
        CksumReport{copy, col, vector_mode}
    }

    /// The column this report describes
    pub fn column(&self) -> usize {
        self.col
    }

    /// Complete the report, given the block's verified contents.
    ///
    /// `good_data` is the concatenation of every data column.  For a parity
    /// column, the good contents are computed from it.
    ///
    /// Returns `EINVAL` if `good_data` is not exactly as long as the stripe's
    /// data.
    pub fn finish(self, good_data: &[u8]) -> Result<CksumInfo> {
        let fdc = self.copy.firstdatacol;
        let dcols = &self.copy.cols[fdc..];
        let total: usize = dcols.iter().map(Vec::len).sum();
        if good_data.len() != total {
            return Err(Error::EINVAL);
        }
        let mut good_cols = Vec::with_capacity(dcols.len());
        let mut rest = good_data;
        for c in dcols {
            let (head, tail) = rest.split_at(c.len());
            good_cols.push(head);
            rest = tail;
        }

        let bad = self.copy.cols[self.col].clone();
        let good = if self.col >= fdc {
            good_cols[self.col - fdc].to_vec()
        } else {
            let dispatch = Dispatch::begin(self.vector_mode);
            let codec = Codec::new(&dispatch);
            let mut good = vec![0u8; bad.len()];
            codec.encode_one(Role::of(self.col), &mut good, &good_cols);
            good
        };
        Ok(CksumInfo{good, bad})
    }
}

// LCOV_EXCL_STOP
