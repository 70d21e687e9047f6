use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use csnet::engine::ClusterDescriptor;
use csnet::linalg::{block_diag, LinearOperator, OperatorExt, Product};
use csnet::nc::packing::{pack_ternary, unpack_ternary};
use csnet::nc::NcMatrixBuffer;
use csnet::random::{RandomKind, RandomMatrixFactory};
use csnet::transform::{SparsifyingTransform, TransformKind};
use nalgebra::DVector;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn bench_transforms(c: &mut Criterion) {
    for kind in [TransformKind::Dct, TransformKind::Dft] {
        for n in [64usize, 256, 1024] {
            let psi = SparsifyingTransform::new(kind, n);
            let x = DVector::from_fn(n, |i, _| (i as f64 * 0.1).sin());
            c.bench_with_input(BenchmarkId::new(format!("{:?}", kind), n), &n, |b, _| {
                b.iter(|| psi.apply(&x).unwrap());
            });
        }
    }
}

fn bench_spatial_operator(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(5);
    let mut blocks = Vec::new();
    let mut total_rows = 0;
    let mut total_nodes = 0;
    for id in 1..=3u8 {
        let desc = ClusterDescriptor::with_sequential_nodes(id, 64, 32, 32, id as u64, 85, id as u64 * 100);
        let phi = desc.spatial_matrix(RandomKind::standard_gaussian(), false).unwrap();
        blocks.push(phi.compose(desc.precoding_operator()).unwrap().boxed());
        total_rows += desc.l;
        total_nodes += desc.num_nodes();
    }
    let phi = block_diag(blocks);
    let mut omega = NcMatrixBuffer::new(total_rows);
    for r in 0..total_rows {
        let block = r / 32;
        let row: Vec<f64> = (0..total_rows)
            .map(|c| if c / 32 == block && rng.gen_bool(0.5) { 1.0 } else { 0.0 })
            .collect();
        omega.append_row(&row).unwrap();
    }
    let a = Product::new(omega.boxed(), phi.boxed()).unwrap();
    let x = DVector::from_fn(total_nodes, |i, _| i as f64);
    let y = DVector::from_element(total_rows, 1.0);
    c.bench_function("spatial_apply", |b| b.iter(|| a.apply(&x).unwrap()));
    c.bench_function("spatial_adjoint", |b| b.iter(|| a.apply_adjoint(&y).unwrap()));
}

fn bench_matrix_factory(c: &mut Criterion) {
    c.bench_function("gaussian_128x256", |b| {
        b.iter(|| RandomMatrixFactory::build(9, 128, 256, RandomKind::standard_gaussian(), true).unwrap())
    });
}

fn bench_packing(c: &mut Criterion) {
    let coeffs: Vec<f64> = (0..1024).map(|i| ((i % 3) as f64) - 1.0).collect();
    let packed = pack_ternary(&coeffs).unwrap();
    c.bench_function("pack_ternary_1024", |b| b.iter(|| pack_ternary(&coeffs).unwrap()));
    c.bench_function("unpack_ternary_1024", |b| b.iter(|| unpack_ternary(&packed, 1024).unwrap()));
}

criterion_group!(
    operator_benches,
    bench_transforms,
    bench_spatial_operator,
    bench_matrix_factory,
    bench_packing
);
criterion_main!(operator_benches);
