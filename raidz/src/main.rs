// vim: tw=80
//! Self-test and benchmark tool for the RAID-Z parity engine

use std::time::{Duration, Instant};

use clap::{crate_version, Parser};
use divbuf::DivBufShared;
use itertools::Itertools;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use raidz_core::{
    raid::{self, MapBuilder, RaidzMap, Tunables, VectorMode},
    Error,
    Result
};
use tracing_subscriber::EnvFilter;

/// Shape of the stripes to exercise
#[derive(Parser, Clone, Debug)]
struct Geometry {
    /// Highest parity level to use
    #[clap(short, long, default_value_t = 3,
           value_parser = clap::value_parser!(u8).range(1..=3))]
    parity: u8,
    /// Number of data columns
    #[clap(short, long, default_value_t = 8,
           value_parser = clap::value_parser!(u16).range(1..=252))]
    data_cols: u16,
    /// Size of the largest data column, in bytes
    #[clap(short, long, default_value_t = 128 * 1024)]
    size: usize,
}

impl Geometry {
    /// Data column sizes.  The trailing third of the columns are one byte
    /// short, like a stripe that doesn't divide evenly.
    fn sizes(&self) -> Vec<usize> {
        let n = usize::from(self.data_cols);
        (0..n).map(|j| {
            if j >= n - n / 3 && self.size > 1 {
                self.size - 1
            } else {
                self.size
            }
        }).collect()
    }
}

/// A stripe, plus the buffer that backs its data columns
struct Stripe {
    map: RaidzMap,
    _dbs: DivBufShared,
}

impl Stripe {
    fn new(contents: &[u8], nparity: usize, sizes: &[usize],
           vector_mode: VectorMode) -> Result<Self>
    {
        let dbs = DivBufShared::from(contents.to_vec());
        let mut buf = dbs.try_mut()
            .expect("DivBufShared wasn't uniquely owned");
        let tunables = Tunables{vector_mode, default_to_general: false};
        let mut mb = MapBuilder::new().tunables(tunables);
        for i in 0..nparity {
            mb = mb.alloc_parity(i as u64, 0, sizes[0]);
        }
        for (j, s) in sizes.iter().enumerate() {
            mb = mb.data((nparity + j) as u64, 0, buf.split_to(*s));
        }
        let mut map = mb.build()?;
        map.generate_parity();
        Ok(Stripe{map, _dbs: dbs})
    }

    fn snapshot(&self) -> Vec<Vec<u8>> {
        (0..self.map.cols())
            .map(|c| self.map.data(c).to_vec())
            .collect()
    }
}

fn random_contents(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = XorShiftRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen()).collect()
}

fn modes(requested: Option<VectorMode>) -> Vec<VectorMode> {
    match requested {
        Some(m) => vec![m],
        None => raid::supported_modes()
    }
}

#[derive(Parser, Clone, Debug)]
/// Check that every implementation round-trips every failure combination
struct Test {
    #[clap(flatten)]
    geometry: Geometry,
    /// Random seed
    #[clap(long, default_value_t = 0)]
    seed: u64,
}

impl Test {
    fn main(self, vector_mode: Option<VectorMode>) -> Result<()> {
        let sizes = self.geometry.sizes();
        let contents = random_contents(self.seed, sizes.iter().sum());
        for nparity in 1..=usize::from(self.geometry.parity) {
            let reference = Stripe::new(&contents, nparity, &sizes,
                                        VectorMode::Off)?
                .snapshot();
            for mode in modes(vector_mode) {
                let mut stripe = Stripe::new(&contents, nparity, &sizes,
                                             mode)?;
                if stripe.snapshot() != reference {
                    tracing::error!(nparity, %mode,
                                    "parity differs from scalar");
                    return Err(Error::EINTEGRITY);
                }
                let mut n = 0;
                for ntgts in 1..=nparity {
                    for targets in (0..stripe.map.cols()).combinations(ntgts)
                    {
                        for &c in &targets {
                            stripe.map.data_mut(c).fill(0);
                        }
                        stripe.map.reconstruct(&targets)?;
                        if stripe.snapshot() != reference {
                            tracing::error!(nparity, %mode, ?targets,
                                            "reconstruction miscompare");
                            return Err(Error::EINTEGRITY);
                        }
                        n += 1;
                    }
                }
                println!("parity {nparity} {mode:>6}: {n} reconstructions OK");
            }
        }
        Ok(())
    }
}

si_scale::scale_fn!(bytes_per_sec,
                    base: B1000,
                    constraint: UnitAndAbove,
                    mantissa_fmt: "{:.1}",
                    groupings: '_',
                    unit: "B/s");

fn rate(bytes: usize, iterations: u32, elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64().max(f64::MIN_POSITIVE);
    bytes_per_sec(bytes as f64 * f64::from(iterations) / secs)
}

#[derive(Parser, Clone, Debug)]
/// Measure generation and reconstruction throughput
struct Bench {
    #[clap(flatten)]
    geometry: Geometry,
    /// Repetitions of each measurement
    #[clap(short, long, default_value_t = 100,
           value_parser = clap::value_parser!(u32).range(1..))]
    iterations: u32,
}

impl Bench {
    fn main(self, vector_mode: Option<VectorMode>) -> Result<()> {
        let sizes = self.geometry.sizes();
        let total: usize = sizes.iter().sum();
        let contents = random_contents(0, total);
        let mut table = tabular::Table::new("{:>}  {:<}  {:>}  {:>}");
        let mut hrow = tabular::Row::new();
        for h in ["PARITY", "IMPL", "GENERATE", "RECONSTRUCT"] {
            hrow.add_cell(h);
        }
        table.add_row(hrow);
        for nparity in 1..=usize::from(self.geometry.parity) {
            // Lose as many of the largest data columns as the parity allows
            let targets: Vec<usize> = (nparity..)
                .take(nparity.min(sizes.len()))
                .collect();
            let rbytes: usize = sizes.iter().take(targets.len()).sum();
            for mode in modes(vector_mode) {
                let mut stripe = Stripe::new(&contents, nparity, &sizes,
                                             mode)?;
                let start = Instant::now();
                for _ in 0..self.iterations {
                    stripe.map.generate_parity();
                }
                let generate = rate(total, self.iterations, start.elapsed());

                let start = Instant::now();
                for _ in 0..self.iterations {
                    stripe.map.reconstruct(&targets)?;
                }
                let reconstruct = rate(rbytes, self.iterations,
                                       start.elapsed());
                tracing::debug!(nparity, %mode, %generate, %reconstruct,
                                "measured");
                let row = tabular::Row::new()
                    .with_cell(nparity)
                    .with_cell(mode)
                    .with_cell(generate)
                    .with_cell(reconstruct);
                table.add_row(row);
            }
        }
        print!("{table}");
        Ok(())
    }
}

#[derive(Parser, Clone, Debug)]
enum SubCommand {
    Test(Test),
    Bench(Bench),
}

#[derive(Parser, Clone, Debug)]
#[clap(version = crate_version!())]
struct Cli {
    /// Use this vector mode instead of every mode the CPU supports
    #[clap(long, global = true)]
    vector_mode: Option<VectorMode>,
    #[clap(subcommand)]
    cmd: SubCommand,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let cli: Cli = Cli::parse();
    match cli.cmd {
        SubCommand::Test(test) => test.main(cli.vector_mode),
        SubCommand::Bench(bench) => bench.main(cli.vector_mode),
    }
}

#[cfg(test)]
mod t {
    use clap::error::ErrorKind::*;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(Vec::new())]
    #[case(vec!["raidz"])]
    fn missing_arg(#[case] args: Vec<&str>) {
        let e = Cli::try_parse_from(args).unwrap_err();
        assert!(
            e.kind() == MissingRequiredArgument ||
                e.kind() == DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[rstest]
    #[case(vec!["raidz", "test", "--parity", "0"])]
    #[case(vec!["raidz", "test", "--parity", "4"])]
    #[case(vec!["raidz", "test", "--data-cols", "0"])]
    #[case(vec!["raidz", "bench", "--iterations", "0"])]
    #[case(vec!["raidz", "--vector-mode", "mmx", "test"])]
    fn invalid_value(#[case] args: Vec<&str>) {
        let e = Cli::try_parse_from(args).unwrap_err();
        assert_eq!(e.kind(), ValueValidation);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(vec!["raidz", "test"]).unwrap();
        assert_eq!(cli.vector_mode, None);
        if let SubCommand::Test(test) = cli.cmd {
            assert_eq!(test.geometry.parity, 3);
            assert_eq!(test.geometry.data_cols, 8);
            assert_eq!(test.geometry.size, 131072);
            assert_eq!(test.seed, 0);
        } else {
            panic!("Wrong subcommand");
        }
    }

    #[test]
    fn bench() {
        let args = vec!["raidz", "bench", "-p", "2", "-d", "5", "-s", "4096",
                        "-i", "7", "--vector-mode", "sse4"];
        let cli = Cli::try_parse_from(args).unwrap();
        assert_eq!(cli.vector_mode, Some(VectorMode::Sse4));
        if let SubCommand::Bench(bench) = cli.cmd {
            assert_eq!(bench.geometry.parity, 2);
            assert_eq!(bench.geometry.data_cols, 5);
            assert_eq!(bench.geometry.size, 4096);
            assert_eq!(bench.iterations, 7);
        } else {
            panic!("Wrong subcommand");
        }
    }

    #[test]
    fn sizes() {
        let g = Geometry{parity: 1, data_cols: 6, size: 100};
        assert_eq!(g.sizes(), vec![100, 100, 100, 100, 99, 99]);
    }

    // A small end-to-end run of the self test
    #[test]
    fn self_test() {
        let test = Test {
            geometry: Geometry{parity: 3, data_cols: 4, size: 33},
            seed: 1
        };
        test.main(None).unwrap();
    }
}
