// vim: tw=80
//! Whole-stripe tests of parity generation and reconstruction

use itertools::Itertools;
use pretty_assertions::assert_eq;
use rstest::rstest;

use raidz_core::{
    Error,
    raid::{MAX_COLS, VectorMode, fpu, supported_modes}
};

use super::*;

// 4 data columns of 512 bytes with P.  Lose column 2.
#[test_log::test]
fn p_one_missing() {
    let mut s = StripeBuilder::new().build();
    let c = s.map.firstdatacol() + 2;
    s.map.data_mut(c).fill(0);
    let used = t!(s.map.reconstruct(&[c]));
    s.assert_data_intact();
    assert_eq!(used.ones().collect::<Vec<_>>(), vec![0]);
}

// Same data with P and Q.  Lose data columns 1 and 3.
#[test_log::test]
fn pq_two_missing() {
    let mut s = StripeBuilder::new().parity(2).build();
    let fdc = s.map.firstdatacol();
    s.clobber(fdc + 1);
    s.clobber(fdc + 3);
    let used = t!(s.map.reconstruct(&[fdc + 1, fdc + 3]));
    s.assert_data_intact();
    assert_eq!(used.ones().collect::<Vec<_>>(), vec![0, 1]);
}

// P, Q, and R with 5 data columns.  Three missing data columns can be
// restored, but not four.
#[test_log::test]
fn pqr_three_missing_then_four() {
    let mut s = StripeBuilder::new()
        .parity(3)
        .sizes(&[512; 5])
        .build();
    let fdc = s.map.firstdatacol();
    let targets = [fdc, fdc + 2, fdc + 4];
    for &c in &targets {
        s.clobber(c);
    }
    let used = t!(s.map.reconstruct(&targets));
    s.assert_data_intact();
    assert_eq!(used.count_ones(..), 3);

    for &c in &targets {
        s.clobber(c);
    }
    let before = s.snapshot();
    let r = s.map.reconstruct(&[fdc, fdc + 1, fdc + 2, fdc + 4]);
    assert_eq!(r.unwrap_err(), Error::EUNRECOVERABLE);
    assert_eq!(s.snapshot(), before);
}

// Every combination of failures, for every parity level and implementation.
// The last columns are shorter than the first, and no column size is a
// multiple of any vector width.
#[rstest]
#[case(1, &[77, 77, 76])]
#[case(2, &[77, 77, 77, 76, 76])]
#[case(3, &[1, 1])]
#[case(3, &[4099, 4099, 4098, 4098, 4098, 4098])]
fn roundtrip(#[case] nparity: usize, #[case] sizes: &[usize],
             #[values(false, true)] general: bool)
{
    for mode in supported_modes() {
        let mut s = StripeBuilder::new()
            .parity(nparity)
            .sizes(sizes)
            .vector_mode(mode)
            .default_to_general(general)
            .build();
        let good = s.snapshot();
        for ntgts in 1..=nparity {
            for targets in (0..s.map.cols()).combinations(ntgts) {
                for &c in &targets {
                    s.clobber(c);
                }
                t!(s.map.reconstruct(&targets));
                assert!(s.snapshot() == good,
                    "mode={} targets={:?} general={}", mode, targets, general);
            }
        }
    }
}

const MIB4: usize = 4 << 20;

// All implementations must produce identical parity, for small and
// multi-megabyte columns alike
#[rstest]
#[case(1, &[65537, 65537, 65536, 65536, 65536, 65535, 65535])]
#[case(2, &[65537, 65537, 65536, 65536, 65536, 65535, 65535])]
#[case(3, &[65537, 65537, 65536, 65536, 65536, 65535, 65535])]
#[case(3, &[MIB4 | 3, MIB4 | 3, MIB4 | 1])]
fn implementations_agree(#[case] nparity: usize, #[case] sizes: &[usize]) {
    let reference = StripeBuilder::new()
        .parity(nparity)
        .sizes(sizes)
        .seed(7)
        .build()
        .snapshot();
    for mode in supported_modes() {
        let s = StripeBuilder::new()
            .parity(nparity)
            .sizes(sizes)
            .seed(7)
            .vector_mode(mode)
            .build();
        assert!(s.snapshot() == reference, "{} disagrees with scalar", mode);
    }
}

// Multi-megabyte columns, all three lost at once
#[test]
fn large_columns() {
    for mode in supported_modes() {
        let mut s = StripeBuilder::new()
            .parity(3)
            .sizes(&[MIB4 | 3, MIB4 | 3, MIB4 | 1, MIB4 | 1])
            .vector_mode(mode)
            .build();
        let fdc = s.map.firstdatacol();
        let targets = [fdc, fdc + 2, fdc + 3];
        for &c in &targets {
            s.clobber(c);
        }
        t!(s.map.reconstruct(&targets));
        s.assert_data_intact();
    }
}

// The widest stripe allowed.  The first and last data columns are as far
// apart as they can be, so their Q and R coefficients are the extremes.
#[rstest]
fn widest_stripe(#[values(false, true)] general: bool) {
    let ndata = MAX_COLS - 3;
    let mut sizes = vec![33; ndata];
    for s in sizes.iter_mut().skip(ndata / 2) {
        *s = 32;
    }
    for mode in supported_modes() {
        let mut s = StripeBuilder::new()
            .parity(3)
            .sizes(&sizes)
            .vector_mode(mode)
            .default_to_general(general)
            .build();
        assert_eq!(s.map.scols(), MAX_COLS);
        let fdc = s.map.firstdatacol();
        let last = s.map.cols() - 1;
        let good = s.snapshot();
        let cases = [
            vec![fdc, last],
            vec![0, fdc, last],
            vec![fdc, fdc + 127, last],
            vec![0, 1, last],
        ];
        for targets in cases {
            for &c in &targets {
                s.clobber(c);
            }
            t!(s.map.reconstruct(&targets));
            assert!(s.snapshot() == good,
                "mode={} targets={:?} general={}", mode, targets, general);
        }
    }
}

// Reconstruction results must not depend on the implementation either
#[test]
fn reconstructions_agree() {
    let mut results = Vec::new();
    for mode in supported_modes() {
        let mut s = StripeBuilder::new()
            .parity(3)
            .sizes(&[1000, 999, 999, 999])
            .vector_mode(mode)
            .build();
        let fdc = s.map.firstdatacol();
        s.map.fail_column(fdc, Error::EIO);
        s.map.mark_skipped(fdc + 3);
        t!(s.map.reconstruct(&[1]));
        results.push(s.snapshot());
    }
    assert!(results.iter().all_equal());
}

// A thread that may not use the vector unit still gets correct results
#[test]
fn vector_context_forbidden() {
    fpu::set_permitted(false);
    let mut s = StripeBuilder::new()
        .parity(2)
        .vector_mode(VectorMode::Avx)
        .build();
    let fdc = s.map.firstdatacol();
    s.clobber(fdc);
    s.clobber(fdc + 1);
    t!(s.map.reconstruct(&[fdc, fdc + 1]));
    s.assert_data_intact();
    assert_eq!(fpu::depth(), 0);
    fpu::set_permitted(true);
}

// The vector context is released even when reconstruction fails
#[test]
fn vector_context_released_on_error() {
    let mut s = StripeBuilder::new()
        .vector_mode(VectorMode::Avx)
        .build();
    assert!(s.map.reconstruct(&[1, 2]).is_err());
    assert_eq!(fpu::depth(), 0);
    t!(s.map.reconstruct(&[1]));
    assert_eq!(fpu::depth(), 0);
}

#[test]
fn padding() {
    let mut s = StripeBuilder::new()
        .parity(2)
        .sizes(&[1024, 512, 512])
        .npadding(2)
        .build();
    assert_eq!(s.map.scols(), 7);
    assert_eq!(s.map.bigcols(), 3);
    assert_eq!(s.map.nskip(), 2);
    assert_eq!(s.map.skipstart(), 3);
    // Padding columns can't be targets
    assert_eq!(s.map.reconstruct(&[5]).unwrap_err(), Error::EINVAL);
    s.clobber(2);
    t!(s.map.reconstruct(&[2]));
    s.assert_data_intact();
}

// Scrubbing finds and repairs a corrupt parity column, and the checksum
// report shows what was read from it.
#[test]
fn scrub() {
    let mut s = StripeBuilder::new().parity(2).build();
    let good_q = s.map.data(1).to_vec();
    s.map.data_mut(1)[100] ^= 0x40;
    for c in 0..s.map.cols() {
        s.map.mark_tried(c);
    }
    let report = s.map.cksum_report(1);
    let bad = s.map.verify_parity();
    assert_eq!(bad.ones().collect::<Vec<_>>(), vec![1]);
    assert_eq!(s.map.data(1), &good_q[..]);

    let good_data = s.data.concat();
    let info = t!(report.finish(&good_data));
    assert_eq!(info.good, good_q);
    assert_eq!(info.ndiff(), 1);
    assert_eq!(s.map.reports(), 0);
}
