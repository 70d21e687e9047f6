use approx::assert_relative_eq;
use csnet::engine::ClusterDescriptor;
use csnet::linalg::{block_diag, dot, DenseOperator, Diagonal, LinearOperator, OperatorExt, Product};
use csnet::nc::NcMatrixBuffer;
use csnet::random::RandomKind;
use csnet::transform::{SparsifyingTransform, TransformKind};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

fn random_vector(n: usize, rng: &mut StdRng) -> DVector<f64> {
    DVector::from_fn(n, |_, _| rng.sample(StandardNormal))
}

fn adjoint_gap(a: &dyn LinearOperator, rng: &mut StdRng) -> (f64, f64) {
    let x = random_vector(a.cols(), rng);
    let y = random_vector(a.rows(), rng);
    let lhs = dot(&a.apply(&x).unwrap(), &y);
    let rhs = dot(&x, &a.apply_adjoint(&y).unwrap());
    ((lhs - rhs).abs(), x.norm() * y.norm())
}

fn coding_block(rows: usize, width: usize, rng: &mut StdRng) -> NcMatrixBuffer {
    let mut omega = NcMatrixBuffer::new(width);
    for _ in 0..rows {
        let row: Vec<f64> = (0..width).map(|_| if rng.gen_bool(0.5) { 1.0 } else { -1.0 }).collect();
        omega.append_row(&row).unwrap();
    }
    omega
}

#[test]
fn coded_spatial_blocks_are_adjoint_consistent() {
    let mut rng = StdRng::seed_from_u64(1);
    let c0 = ClusterDescriptor::with_sequential_nodes(1, 32, 16, 6, 11, 10, 100);
    let c1 = ClusterDescriptor::with_sequential_nodes(2, 32, 16, 4, 12, 7, 200)
        .with_precoding(vec![true, false, true, true, false, true, true]);

    let mut blocks = Vec::new();
    for c in [&c0, &c1] {
        let omega = coding_block(c.l, c.l, &mut rng);
        let phi = c.spatial_matrix(RandomKind::standard_gaussian(), false).unwrap();
        let op = Product::chain(vec![omega.boxed(), phi.boxed(), c.precoding_operator().boxed()]).unwrap();
        blocks.push(op);
    }
    let a = block_diag(blocks);
    assert_eq!((a.rows(), a.cols()), (10, 17));

    for _ in 0..10 {
        let (gap, scale) = adjoint_gap(&a, &mut rng);
        assert!(gap <= 1e-9 * scale, "gap {} scale {}", gap, scale);
    }
}

#[test]
fn block_diagonal_applies_blocks_independently() {
    let a1 = DenseOperator::new(DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]));
    let a2 = DenseOperator::new(DMatrix::from_row_slice(1, 3, &[1.0, -1.0, 0.5]));
    let x1 = DVector::from_vec(vec![1.0, -1.0]);
    let x2 = DVector::from_vec(vec![2.0, 2.0, 4.0]);
    let expected1 = a1.apply(&x1).unwrap();
    let expected2 = a2.apply(&x2).unwrap();

    let d = block_diag(vec![a1.boxed(), a2.boxed()]);
    let y = d.apply(&DVector::from_vec(vec![1.0, -1.0, 2.0, 2.0, 4.0])).unwrap();
    assert_eq!(y.rows(0, 2).into_owned(), expected1);
    assert_eq!(y.rows(2, 1).into_owned(), expected2);
    assert_eq!(d.row_range(1), (2, 3));
    assert_eq!(d.col_range(1), (2, 5));
}

#[test]
fn product_matches_dense_product() {
    let mut rng = StdRng::seed_from_u64(4);
    let a = DMatrix::from_fn(5, 7, |_, _| rng.sample(StandardNormal));
    let b = DMatrix::from_fn(7, 3, |_, _| rng.sample(StandardNormal));
    let p = DenseOperator::new(a.clone()).compose(DenseOperator::new(b.clone())).unwrap();
    let expected = &a * &b;
    let dense = p.to_dense();
    for (u, v) in dense.iter().zip(expected.iter()) {
        assert_relative_eq!(u, v, epsilon = 1e-12);
    }
}

#[test]
fn composition_checks_shapes() {
    let a = DenseOperator::new(DMatrix::zeros(3, 4));
    let b = DenseOperator::new(DMatrix::zeros(5, 2));
    assert!(a.compose(b).is_err());
    let d = Diagonal::from_mask(&[true, false, true]);
    assert!(d.apply(&DVector::zeros(2)).is_err());
}

#[test]
fn transforms_round_trip() {
    let mut rng = StdRng::seed_from_u64(9);
    for kind in [TransformKind::Dct, TransformKind::Dft] {
        for n in [8, 31, 64] {
            let psi = SparsifyingTransform::new(kind, n);
            let x = random_vector(n, &mut rng);
            let back = psi.apply_adjoint(&psi.apply(&x).unwrap()).unwrap();
            for (u, v) in back.iter().zip(x.iter()) {
                assert_relative_eq!(u, v, epsilon = 1e-10);
            }
            let (gap, scale) = adjoint_gap(&psi, &mut rng);
            assert!(gap <= 1e-9 * scale);
        }
    }
}

#[test]
fn scaled_and_transposed_compose() {
    let mut rng = StdRng::seed_from_u64(2);
    let m = DMatrix::from_fn(4, 6, |_, _| rng.sample(StandardNormal));
    let t = DenseOperator::new(m.clone()).transposed().scale(2.0);
    assert_eq!((t.rows(), t.cols()), (6, 4));
    let expected = m.transpose() * 2.0;
    for (u, v) in t.to_dense().iter().zip(expected.iter()) {
        assert_relative_eq!(u, v, epsilon = 1e-12);
    }
}
