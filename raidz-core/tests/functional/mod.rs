// vim: tw=80

use divbuf::DivBufShared;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;

use raidz_core::raid::{MapBuilder, RaidzMap, Tunables, VectorMode};

macro_rules! t {
    ($e:expr) => (match $e {
        Ok(e) => e,
        Err(e) => panic!("{} failed with {:?}", stringify!($e), e),
    })
}

/// Helper to create a stripe filled with random data
#[derive(Debug)]
struct StripeBuilder {
    /// Number of parity columns
    nparity: usize,
    /// Size of each data column in bytes, largest first
    sizes: Vec<usize>,
    /// Number of padding columns
    npadding: usize,
    /// RNG seed
    seed: u64,
    vector_mode: VectorMode,
    default_to_general: bool,
}

/// A stripe under test, together with the caller's buffer that backs its data
/// columns and a copy of their original contents.
struct Stripe {
    map: RaidzMap,
    data: Vec<Vec<u8>>,
    _dbs: DivBufShared,
}

impl Stripe {
    /// Assert that every data column holds its original contents
    fn assert_data_intact(&self) {
        let fdc = self.map.firstdatacol();
        for (j, d) in self.data.iter().enumerate() {
            assert!(self.map.data(fdc + j) == &d[..],
                "data column {} miscompares", j);
        }
    }

    fn snapshot(&self) -> Vec<Vec<u8>> {
        (0..self.map.cols())
            .map(|c| self.map.data(c).to_vec())
            .collect()
    }

    /// Scribble over column `c`, the way a failed read might
    fn clobber(&mut self, c: usize) {
        self.map.data_mut(c).fill(0xa5);
    }
}

impl StripeBuilder {
    fn build(&self) -> Stripe {
        let mut rng = XorShiftRng::seed_from_u64(self.seed);
        let total: usize = self.sizes.iter().sum();
        let contents: Vec<u8> = (0..total).map(|_| rng.gen()).collect();
        let data = {
            let mut rest = &contents[..];
            self.sizes.iter().map(|s| {
                let (head, tail) = rest.split_at(*s);
                rest = tail;
                head.to_vec()
            }).collect::<Vec<_>>()
        };
        let dbs = DivBufShared::from(contents);
        let mut buf = t!(dbs.try_mut());
        let tunables = Tunables {
            vector_mode: self.vector_mode,
            default_to_general: self.default_to_general
        };
        let mut mb = MapBuilder::new().tunables(tunables);
        for i in 0..self.nparity {
            mb = mb.alloc_parity(i as u64, 0, self.sizes[0]);
        }
        for (j, s) in self.sizes.iter().enumerate() {
            let col = buf.split_to(*s);
            mb = mb.data((self.nparity + j) as u64, 0, col);
        }
        for k in 0..self.npadding {
            mb = mb.padding((self.nparity + self.sizes.len() + k) as u64, 0);
        }
        let mut map = t!(mb.build());
        map.generate_parity();
        Stripe{map, data, _dbs: dbs}
    }

    fn default_to_general(&mut self, v: bool) -> &mut Self {
        self.default_to_general = v;
        self
    }

    fn new() -> Self {
        Self {
            nparity: 1,
            sizes: vec![512; 4],
            npadding: 0,
            seed: 42,
            vector_mode: VectorMode::Off,
            default_to_general: false,
        }
    }

    fn npadding(&mut self, n: usize) -> &mut Self {
        self.npadding = n;
        self
    }

    fn parity(&mut self, nparity: usize) -> &mut Self {
        self.nparity = nparity;
        self
    }

    fn seed(&mut self, seed: u64) -> &mut Self {
        self.seed = seed;
        self
    }

    fn sizes(&mut self, sizes: &[usize]) -> &mut Self {
        self.sizes = sizes.to_vec();
        self
    }

    fn vector_mode(&mut self, mode: VectorMode) -> &mut Self {
        self.vector_mode = mode;
        self
    }
}

mod raid;
