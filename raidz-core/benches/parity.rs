use criterion::{
    criterion_group,
    criterion_main,
    BenchmarkId,
    Criterion,
    Throughput
};
use divbuf::DivBufShared;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use raidz_core::raid::{
    MapBuilder,
    RaidzMap,
    Tunables,
    VectorMode,
    supported_modes
};

const NDATA: usize = 8;
const COLSIZE: usize = 128 * 1024;

fn mkmap(nparity: usize, mode: VectorMode) -> (DivBufShared, RaidzMap) {
    let mut rng = XorShiftRng::seed_from_u64(0);
    let v: Vec<u8> = (0..NDATA * COLSIZE).map(|_| rng.gen()).collect();
    let dbs = DivBufShared::from(v);
    let mut buf = dbs.try_mut().unwrap();
    let tunables = Tunables{vector_mode: mode, default_to_general: false};
    let mut mb = MapBuilder::new().tunables(tunables);
    for i in 0..nparity {
        mb = mb.alloc_parity(i as u64, 0, COLSIZE);
    }
    for j in 0..NDATA {
        mb = mb.data((nparity + j) as u64, 0, buf.split_to(COLSIZE));
    }
    let mut map = mb.build().unwrap();
    map.generate_parity();
    (dbs, map)
}

fn generate(c: &mut Criterion) {
    let mut g = c.benchmark_group("generate");
    g.throughput(Throughput::Bytes((NDATA * COLSIZE) as u64));
    for nparity in 1..=3 {
        for mode in supported_modes() {
            let (_dbs, mut map) = mkmap(nparity, mode);
            let id = BenchmarkId::new(mode.to_string(), nparity);
            g.bench_function(id, |b| b.iter(|| map.generate_parity()));
        }
    }
    g.finish();
}

fn reconstruct(c: &mut Criterion) {
    let mut g = c.benchmark_group("reconstruct");
    for nparity in 1..=3 {
        g.throughput(Throughput::Bytes((nparity * COLSIZE) as u64));
        // Lose the first data columns, which forces the use of every parity
        // column
        let targets: Vec<usize> = (nparity..2 * nparity).collect();
        for mode in supported_modes() {
            let (_dbs, mut map) = mkmap(nparity, mode);
            let id = BenchmarkId::new(mode.to_string(), nparity);
            g.bench_function(id, |b| b.iter(|| {
                map.reconstruct(&targets).unwrap()
            }));
        }
    }
    g.finish();
}

criterion_group!(benches, generate, reconstruct);
criterion_main!(benches);
