use csnet::error::SolverError;
use csnet::linalg::{DenseOperator, LinearOperator, OperatorExt};
use csnet::random::{RandomKind, RandomMatrixFactory};
use csnet::solver::{CsSolver, Prepared, Solver, SolverKind};
use csnet::transform::SparsifyingTransform;
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn sparse_signal(n: usize, k: usize, rng: &mut StdRng) -> DVector<f64> {
    let mut x = DVector::zeros(n);
    let mut placed = 0;
    while placed < k {
        let j = rng.gen_range(0..n);
        if x[j] == 0.0 {
            let sign = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
            x[j] = sign * rng.gen_range(1.0..2.0);
            placed += 1;
        }
    }
    x
}

fn snr_db(x0: &DVector<f64>, x: &DVector<f64>) -> f64 {
    20.0 * (x0.norm() / (x0 - x).norm().max(1e-300)).log10()
}

#[test]
fn omp_round_trip_reaches_forty_db() {
    let mut rng = StdRng::seed_from_u64(1);
    let (m, n, k) = (64, 256, 6);
    let a = RandomMatrixFactory::build(17, m, n, RandomKind::standard_gaussian(), true).unwrap();
    let solver = Solver::new(SolverKind::Omp);
    let prepared = solver.prepare(&a).unwrap();
    for _ in 0..5 {
        let x0 = sparse_signal(n, k, &mut rng);
        let y = a.apply(&x0).unwrap();
        let sol = prepared.solve(&y, 0).unwrap();
        assert!(snr_db(&x0, &sol.x) >= 40.0);
        assert!(sol.converged);
    }
}

#[test]
fn every_solver_recovers_a_sparse_vector() {
    let mut rng = StdRng::seed_from_u64(3);
    let (m, n, k) = (64, 128, 4);
    let a = RandomMatrixFactory::build(5, m, n, RandomKind::standard_gaussian(), false).unwrap();
    let x0 = sparse_signal(n, k, &mut rng);
    let y = a.apply(&x0).unwrap();

    for kind in SolverKind::ALL {
        let solver = Solver::new(kind);
        let sol = solver.solve(&y, &a, k).unwrap();
        let snr = snr_db(&x0, &sol.x);
        assert!(snr >= 40.0, "{} reached {:.1} dB", kind, snr);
        assert!(sol.iterations <= solver.params().max_iter);
    }
}

#[test]
fn converged_flag_matches_residual_bound() {
    let mut rng = StdRng::seed_from_u64(8);
    let a = RandomMatrixFactory::build(9, 48, 96, RandomKind::Bernoulli, true).unwrap();
    let x0 = sparse_signal(96, 3, &mut rng);
    let y = a.apply(&x0).unwrap();
    for kind in [SolverKind::Amp, SolverKind::Sl0] {
        let solver = Solver::with_params(kind, 1e-6, 1000).unwrap();
        let sol = solver.solve(&y, &a, 0).unwrap();
        let residual = (&y - a.apply(&sol.x).unwrap()).norm();
        assert!((residual - sol.residual).abs() < 1e-9);
        assert_eq!(sol.converged, residual <= 1e-6);
    }
}

#[test]
fn recovery_through_a_sparsifying_basis() {
    let mut rng = StdRng::seed_from_u64(12);
    let n = 128;
    let psi = SparsifyingTransform::dct(n);
    let theta0 = sparse_signal(n, 5, &mut rng);
    let x0 = DVector::from_vec(psi.inverse(theta0.as_slice()).unwrap());

    let phi = RandomMatrixFactory::build(77, 60, n, RandomKind::standard_gaussian(), false).unwrap();
    let y = phi.apply(&x0).unwrap();
    let a = (&phi).compose((&psi).transposed()).unwrap();
    let sol = Solver::new(SolverKind::Omp).solve(&y, &a, 5).unwrap();
    let x = psi.apply_adjoint(&sol.x).unwrap();
    assert!(snr_db(&x0, &x) >= 40.0);
}

#[test]
fn oversized_sparsity_is_rejected() {
    let a = DenseOperator::new(DMatrix::from_element(4, 8, 1.0));
    let err = Solver::new(SolverKind::Cosamp)
        .solve(&DVector::zeros(4), &a, 9)
        .unwrap_err();
    assert_eq!(err, SolverError::InvalidSparsity { k: 9, n: 8 });
}

#[test]
fn rhs_length_is_checked() {
    let a = DenseOperator::new(DMatrix::identity(4, 4));
    let err = Solver::new(SolverKind::Omp).solve(&DVector::zeros(3), &a, 1).unwrap_err();
    assert!(matches!(err, SolverError::Dimension(_)));
}

#[test]
fn invalid_parameters_are_rejected() {
    assert!(matches!(
        Solver::with_params(SolverKind::Bp, -1.0, 10),
        Err(SolverError::InvalidParameter(_))
    ));
    assert!(matches!(
        Solver::with_params(SolverKind::Bp, 1e-3, 0),
        Err(SolverError::InvalidParameter(_))
    ));
}
