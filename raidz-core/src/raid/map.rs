// vim: tw=80
//! The in-memory description of one RAID-Z stripe
//!
//! A [`RaidzMap`] is built by the layout layer for each I/O.  Parity columns
//! come first, in P, Q, R order, followed by the data columns and finally by
//! any padding columns.  The map doesn't do I/O itself; it only fills column
//! buffers.

use divbuf::DivBufShared;
use fixedbitset::FixedBitSet;
use std::{
    fmt,
    sync::Arc
};
use crate::types::*;
use super::{
    codec::{Codec, Role},
    dispatch::{self, Dispatch, VectorMode},
    report::{CksumReport, StripeCopy}
};

/// The most columns a stripe may span, padding included.  Beyond that, two
/// data columns would share a Q coefficient.
pub const MAX_COLS: usize = 255;

/// Per-map knobs
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Tunables {
    /// Which vector instructions to use.  Lowered automatically if the CPU
    /// can't honor it.
    pub vector_mode: VectorMode,
    /// Always use the matrix method for reconstruction, even where a
    /// specialized one would do.
    pub default_to_general: bool,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            vector_mode: dispatch::best_mode(),
            default_to_general: false,
        }
    }
}

/// One device's contribution to a stripe
pub struct RaidzCol {
    /// Index of the child device
    pub devidx: u64,
    /// Byte offset on the child device
    pub offset: u64,
    data: IoVecMut,
    /// Keeps engine-allocated buffers alive.  `None` for caller-supplied
    /// buffers.
    _backing: Option<DivBufShared>,
    gdata: Option<Vec<u8>>,
    error: Option<Error>,
    tried: bool,
    skipped: bool,
}

impl RaidzCol {
    fn new(devidx: u64, offset: u64, buf: ColBuf) -> Self {
        let (data, _backing) = match buf {
            ColBuf::Given(data) => (data, None),
            ColBuf::Alloc(size) => {
                let dbs = DivBufShared::from(vec![0u8; size]);
                let data = dbs.try_mut()
                    .expect("DivBufShared wasn't uniquely owned");
                (data, Some(dbs))
            }
        };
        RaidzCol {
            devidx,
            offset,
            data,
            _backing,
            gdata: None,
            error: None,
            tried: false,
            skipped: false,
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data[..]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data[..]
    }

    /// Surrender the column's buffer
    pub fn into_data(self) -> IoVecMut {
        self.data
    }

    /// The error recorded for this column's I/O, if any
    pub fn error(&self) -> Option<Error> {
        self.error
    }

    /// The known-good contents computed by
    /// [`RaidzMap::verify_parity`].  If the column was found to be damaged,
    /// this holds what was originally read instead.
    pub fn gdata(&self) -> Option<&[u8]> {
        self.gdata.as_deref()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn skipped(&self) -> bool {
        self.skipped
    }

    pub fn tried(&self) -> bool {
        self.tried
    }

    /// Can this column's contents not be trusted?
    fn is_missing(&self) -> bool {
        self.error.is_some() || self.skipped
    }
}

impl fmt::Debug for RaidzCol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RaidzCol")
            .field("devidx", &self.devidx)
            .field("offset", &self.offset)
            .field("size", &self.size())
            .field("error", &self.error)
            .field("tried", &self.tried)
            .field("skipped", &self.skipped)
            .finish()
    }
}

enum ColBuf {
    Given(IoVecMut),
    Alloc(usize)
}

struct ColSpec {
    devidx: u64,
    offset: u64,
    buf: ColBuf
}

impl ColSpec {
    fn size(&self) -> usize {
        match &self.buf {
            ColBuf::Given(b) => b.len(),
            ColBuf::Alloc(size) => *size
        }
    }
}

/// Assembles a [`RaidzMap`] from its columns.
///
/// Columns may be added in any order relative to the other kinds, but within
/// a kind they are kept in the order given.
#[derive(Default)]
pub struct MapBuilder {
    parity: Vec<ColSpec>,
    data: Vec<ColSpec>,
    padding: Vec<(u64, u64)>,
    skip: Option<(usize, usize)>,
    tunables: Tunables,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parity column whose buffer is supplied by the caller
    pub fn parity(mut self, devidx: u64, offset: u64, buf: IoVecMut) -> Self {
        self.parity.push(ColSpec{devidx, offset, buf: ColBuf::Given(buf)});
        self
    }

    /// Add a parity column whose buffer the map should allocate
    pub fn alloc_parity(mut self, devidx: u64, offset: u64, size: usize)
        -> Self
    {
        self.parity.push(ColSpec{devidx, offset, buf: ColBuf::Alloc(size)});
        self
    }

    /// Add a data column whose buffer is supplied by the caller
    pub fn data(mut self, devidx: u64, offset: u64, buf: IoVecMut) -> Self {
        self.data.push(ColSpec{devidx, offset, buf: ColBuf::Given(buf)});
        self
    }

    /// Add a data column whose contents will be synthesized by
    /// reconstruction, so the map should allocate it
    pub fn alloc_data(mut self, devidx: u64, offset: u64, size: usize)
        -> Self
    {
        self.data.push(ColSpec{devidx, offset, buf: ColBuf::Alloc(size)});
        self
    }

    /// Add a padding column.  Padding columns carry no data.
    pub fn padding(mut self, devidx: u64, offset: u64) -> Self {
        self.padding.push((devidx, offset));
        self
    }

    /// Override the location of the padding sectors
    pub fn skip(mut self, nskip: usize, skipstart: usize) -> Self {
        self.skip = Some((nskip, skipstart));
        self
    }

    pub fn tunables(mut self, tunables: Tunables) -> Self {
        self.tunables = tunables;
        self
    }

    /// Validate the columns and build the map
    pub fn build(self) -> Result<RaidzMap> {
        let nparity = self.parity.len();
        if !(1..=3).contains(&nparity) {
            tracing::debug!(nparity, "unsupported parity level");
            return Err(Error::EINVAL);
        }
        let Some(first) = self.data.first() else {
            tracing::debug!("stripe has no data columns");
            return Err(Error::EINVAL);
        };
        let dsize = first.size();
        if self.parity.iter().any(|p| p.size() != dsize) {
            tracing::debug!("parity column size mismatch");
            return Err(Error::EINVAL);
        }
        if self.data.windows(2).any(|w| w[0].size() < w[1].size()) {
            tracing::debug!("data columns must be sorted by size");
            return Err(Error::EINVAL);
        }

        let ncols = nparity + self.data.len();
        let scols = ncols + self.padding.len();
        if scols > MAX_COLS {
            tracing::debug!(scols, "stripe is too wide");
            return Err(Error::EINVAL);
        }
        let mut cols = Vec::with_capacity(scols);
        for spec in self.parity.into_iter().chain(self.data) {
            cols.push(RaidzCol::new(spec.devidx, spec.offset, spec.buf));
        }
        for (devidx, offset) in self.padding {
            cols.push(RaidzCol::new(devidx, offset, ColBuf::Alloc(0)));
        }

        let minsize = cols[..ncols].iter().map(RaidzCol::size).min()
            .unwrap_or(0);
        let bigcols = cols[..ncols].iter()
            .filter(|c| c.size() > minsize)
            .count();
        let asize = cols.iter().map(RaidzCol::size).sum();
        let (nskip, skipstart) = self.skip.unwrap_or((scols - ncols, bigcols));
        Ok(RaidzMap {
            cols,
            ncols,
            bigcols,
            asize,
            missing_data: 0,
            missing_parity: 0,
            firstdatacol: nparity,
            nskip,
            skipstart,
            tunables: self.tunables,
            datacopy: None,
        })
    }
}

/// How a reconstruction will restore the missing data columns
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Strategy {
    P,
    Q,
    PQ,
    General,
}

/// One RAID-Z stripe: its columns plus their fault state
pub struct RaidzMap {
    /// Every column, including padding
    cols: Vec<RaidzCol>,
    /// Number of columns, excluding padding
    ncols: usize,
    bigcols: usize,
    asize: usize,
    missing_data: usize,
    missing_parity: usize,
    firstdatacol: usize,
    nskip: usize,
    skipstart: usize,
    tunables: Tunables,
    /// Snapshot of the stripe shared with outstanding checksum reports
    datacopy: Option<Arc<StripeCopy>>,
}

impl RaidzMap {
    /// Total size of all columns, in bytes
    pub fn asize(&self) -> usize {
        self.asize
    }

    /// Number of columns larger than the smallest one
    pub fn bigcols(&self) -> usize {
        self.bigcols
    }

    pub fn col(&self, c: usize) -> &RaidzCol {
        &self.cols[c]
    }

    pub fn col_mut(&mut self, c: usize) -> &mut RaidzCol {
        &mut self.cols[c]
    }

    /// Number of columns, excluding padding
    pub fn cols(&self) -> usize {
        self.ncols
    }

    pub fn data(&self, c: usize) -> &[u8] {
        self.cols[c].data()
    }

    pub fn data_mut(&mut self, c: usize) -> &mut [u8] {
        self.cols[c].data_mut()
    }

    /// Iterate through the data columns
    pub fn data_cols(&self) -> impl Iterator<Item=&RaidzCol> {
        self.cols[self.firstdatacol..self.ncols].iter()
    }

    /// Index of the first data column.  Also the number of parity columns.
    pub fn firstdatacol(&self) -> usize {
        self.firstdatacol
    }

    /// Surrender all columns, including padding
    pub fn into_cols(self) -> Vec<RaidzCol> {
        self.cols
    }

    /// Number of data columns whose contents are missing
    pub fn missing_data(&self) -> usize {
        self.missing_data
    }

    /// Number of parity columns whose contents are missing
    pub fn missing_parity(&self) -> usize {
        self.missing_parity
    }

    /// Number of padding sectors
    pub fn nskip(&self) -> usize {
        self.nskip
    }

    /// Iterate through the parity columns
    pub fn parity_cols(&self) -> impl Iterator<Item=&RaidzCol> {
        self.cols[..self.firstdatacol].iter()
    }

    /// Number of columns, including padding
    pub fn scols(&self) -> usize {
        self.cols.len()
    }

    /// Index of the column holding the first padding sector
    pub fn skipstart(&self) -> usize {
        self.skipstart
    }

    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    /// Number of outstanding [`CksumReport`]s
    pub fn reports(&self) -> usize {
        self.datacopy.as_ref().map_or(0, |dc| Arc::strong_count(dc) - 1)
    }

    /// Adjust the missing counts after column `c` changed from `was_missing`
    fn update_missing(&mut self, c: usize, was_missing: bool) {
        let is_missing = self.cols[c].is_missing();
        if c >= self.ncols || is_missing == was_missing {
            return;
        }
        let count = if c < self.firstdatacol {
            &mut self.missing_parity
        } else {
            &mut self.missing_data
        };
        if is_missing {
            *count += 1;
        } else {
            *count -= 1;
        }
    }

    /// Record the outcome of an I/O to column `c`
    pub fn fail_column(&mut self, c: usize, error: Error) {
        let was_missing = self.cols[c].is_missing();
        let col = &mut self.cols[c];
        col.tried = true;
        col.error = Some(error);
        self.update_missing(c, was_missing);
    }

    /// Note that I/O was attempted to column `c`
    pub fn mark_tried(&mut self, c: usize) {
        self.cols[c].tried = true;
    }

    /// Note that column `c` was deliberately not read or written
    pub fn mark_skipped(&mut self, c: usize) {
        let was_missing = self.cols[c].is_missing();
        self.cols[c].skipped = true;
        self.update_missing(c, was_missing);
    }

    /// Regenerate the parity columns in `which` from the data columns.
    fn encode_parity(&mut self, codec: &Codec, which: &FixedBitSet) {
        let (parity, data) = self.cols[..self.ncols]
            .split_at_mut(self.firstdatacol);
        let data: Vec<&[u8]> = data.iter().map(RaidzCol::data).collect();
        for (i, col) in parity.iter_mut().enumerate() {
            if which.contains(i) {
                codec.encode_one(Role::of(i), col.data_mut(), &data);
            }
        }
    }

    /// Fill every parity column from the data columns.
    ///
    /// Skipped parity columns are left alone.
    #[tracing::instrument(skip(self), fields(cols = self.ncols))]
    pub fn generate_parity(&mut self) {
        let dispatch = Dispatch::begin(self.tunables.vector_mode);
        let codec = Codec::new(&dispatch);
        let mut which = FixedBitSet::with_capacity(self.firstdatacol);
        for (i, col) in self.parity_cols().enumerate() {
            which.set(i, !col.skipped);
        }
        self.encode_parity(&codec, &which);
    }

    /// Choose how to restore `ndt` data columns, given which parity columns
    /// are usable
    fn strategy(&self, ndt: usize, valid: &[usize]) -> Strategy {
        let has = |i| valid.contains(&i);
        if self.tunables.default_to_general {
            return Strategy::General;
        }
        match ndt {
            1 if has(0) => Strategy::P,
            1 if has(1) => Strategy::Q,
            2 if has(0) && has(1) => Strategy::PQ,
            _ => Strategy::General
        }
    }

    /// Restore the contents of missing columns.
    ///
    /// The columns restored are those in `targets` plus every column that has
    /// an error recorded or was skipped.  Data columns are rebuilt from the
    /// surviving data and parity; parity columns are then regenerated.
    ///
    /// # Parameters
    ///
    /// - `targets`:    Column indices to restore, in strictly increasing
    ///                 order.  May be empty.
    ///
    /// # Returns
    ///
    /// The set of parity columns that were used to rebuild data, or
    /// - `EINVAL` if `targets` is malformed
    /// - `EUNRECOVERABLE` if more columns are missing than there are parity
    ///   columns.  Nothing is written in that case.
    #[tracing::instrument(skip(self), fields(cols = self.ncols))]
    pub fn reconstruct(&mut self, targets: &[usize]) -> Result<FixedBitSet> {
        if targets.windows(2).any(|w| w[0] >= w[1]) ||
            targets.iter().any(|&t| t >= self.ncols)
        {
            return Err(Error::EINVAL);
        }
        let fdc = self.firstdatacol;
        let mut tgts = FixedBitSet::with_capacity(self.ncols);
        for &t in targets {
            tgts.insert(t);
        }
        for (c, col) in self.cols[..self.ncols].iter().enumerate() {
            if col.is_missing() {
                tgts.insert(c);
            }
        }
        let ntgts = tgts.count_ones(..);
        if ntgts > fdc {
            tracing::warn!(ntgts, nparity = fdc,
                           "too many missing columns to reconstruct");
            return Err(Error::EUNRECOVERABLE);
        }

        let mut used = FixedBitSet::with_capacity(fdc);
        if ntgts == 0 {
            return Ok(used);
        }
        let dispatch = Dispatch::begin(self.tunables.vector_mode);
        let codec = Codec::new(&dispatch);
        let dtgts: Vec<usize> = tgts.ones().filter(|&c| c >= fdc).collect();
        let valid: Vec<usize> = (0..fdc).filter(|&i| !tgts.contains(i))
            .collect();

        if !dtgts.is_empty() {
            let strategy = self.strategy(dtgts.len(), &valid);
            tracing::debug!(?strategy, targets = ?dtgts, kernel =
                            codec.kernel_name(), "reconstructing");
            let xs: Vec<usize> = dtgts.iter().map(|c| c - fdc).collect();
            let mut srcs: Vec<&[u8]> = Vec::with_capacity(self.ncols);
            let mut dsts: Vec<&mut [u8]> = Vec::with_capacity(dtgts.len());
            for (c, col) in self.cols[..self.ncols].iter_mut().enumerate() {
                if dtgts.contains(&c) {
                    srcs.push(&[]);
                    dsts.push(col.data_mut());
                } else {
                    srcs.push(col.data());
                }
            }
            let data = &srcs[fdc..];
            match strategy {
                Strategy::P => {
                    codec.decode_p(xs[0], &mut dsts[0], srcs[0], data);
                    used.insert(0);
                },
                Strategy::Q => {
                    codec.decode_q(xs[0], &mut dsts[0], srcs[1], data);
                    used.insert(1);
                },
                Strategy::PQ => {
                    if let [dx, dy] = &mut dsts[..] {
                        codec.decode_pq(xs[0], xs[1], dx, dy, srcs[0], srcs[1],
                                        data);
                    }
                    used.insert(0);
                    used.insert(1);
                },
                Strategy::General => {
                    let prows: Vec<(Role, &[u8])> = valid.iter()
                        .take(xs.len())
                        .map(|&i| (Role::of(i), srcs[i]))
                        .collect();
                    codec.decode_general(&xs, &mut dsts, &prows, data)?;
                    for &i in valid.iter().take(xs.len()) {
                        used.insert(i);
                    }
                }
            }
        }

        let mut ptgts = FixedBitSet::with_capacity(fdc);
        for i in tgts.ones().filter(|&i| i < fdc) {
            ptgts.set(i, !self.cols[i].skipped);
        }
        if ptgts.count_ones(..) > 0 {
            self.encode_parity(&codec, &ptgts);
        }
        Ok(used)
    }

    /// Check the parity columns against the data.
    ///
    /// Every parity column that was read successfully has its expected
    /// contents computed into its `gdata`.  A column that doesn't match is
    /// rewritten with the expected contents, keeps what was read in `gdata`,
    /// and is marked with `EINTEGRITY`.  The data columns must already be
    /// correct.
    ///
    /// # Returns
    ///
    /// The set of parity columns that were wrong
    #[tracing::instrument(skip(self), fields(cols = self.ncols))]
    pub fn verify_parity(&mut self) -> FixedBitSet {
        let fdc = self.firstdatacol;
        let dispatch = Dispatch::begin(self.tunables.vector_mode);
        let codec = Codec::new(&dispatch);
        let mut bad = FixedBitSet::with_capacity(fdc);
        let (parity, data) = self.cols[..self.ncols].split_at_mut(fdc);
        let data: Vec<&[u8]> = data.iter().map(RaidzCol::data).collect();
        for (i, col) in parity.iter_mut().enumerate() {
            if !col.tried || col.error.is_some() || col.skipped {
                continue;
            }
            let mut expected = vec![0u8; col.size()];
            codec.encode_one(Role::of(i), &mut expected, &data);
            if expected[..] == col.data[..] {
                col.gdata = Some(expected);
            } else {
                tracing::warn!(column = i, "parity mismatch");
                let orig = col.data.to_vec();
                col.data.copy_from_slice(&expected);
                col.gdata = Some(orig);
                bad.insert(i);
            }
        }
        for i in bad.ones() {
            self.fail_column(i, Error::EINTEGRITY);
        }
        bad
    }

    /// Begin a checksum report for column `c`.
    ///
    /// The first report snapshots the whole stripe, so that later
    /// reconstruction attempts don't change what the report describes.
    pub fn cksum_report(&mut self, c: usize) -> CksumReport {
        assert!(c < self.ncols, "Column index out of range");
        let cols = &self.cols[..self.ncols];
        let fdc = self.firstdatacol;
        let copy = self.datacopy.get_or_insert_with(|| {
            Arc::new(StripeCopy::new(cols.iter().map(RaidzCol::data), fdc))
        });
        CksumReport::new(Arc::clone(copy), c, self.tunables.vector_mode)
    }
}

impl fmt::Debug for RaidzMap {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RaidzMap")
            .field("cols", &self.ncols)
            .field("scols", &self.cols.len())
            .field("bigcols", &self.bigcols)
            .field("asize", &self.asize)
            .field("firstdatacol", &self.firstdatacol)
            .field("missing_data", &self.missing_data)
            .field("missing_parity", &self.missing_parity)
            .field("nskip", &self.nskip)
            .field("skipstart", &self.skipstart)
            .field("tunables", &self.tunables)
            .field("reports", &self.reports())
            .field("columns", &self.cols)
            .finish()
    }
}

// LCOV_EXCL_STOP
