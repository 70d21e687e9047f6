//! Approximate Message Passing with a soft-threshold denoiser.
//!
//! The adapter works on `A/√m` and divides the solution by `√m` at the end,
//! so callers keep the contract `y ≈ A·x` for the `A` they passed in. Before
//! iterating, the scaled system is row-whitened through its SVD
//! (`U·S·Vᵀ·x = y  ⇔  Vᵀ·x = S⁻¹·Uᵀ·y`) and rescaled to unit-norm columns on
//! average, which keeps the iteration stable when network-coding mixing makes
//! the rows strongly correlated.

use super::{check_finite, check_rhs, debias, soft_threshold, support_of, Prepared, Solution, SolverParams};
use crate::error::SolverError;
use nalgebra::{DMatrix, DVector};

/// Threshold multiplier on the estimated effective noise level.
const ALPHA: f64 = 1.5;
const STEP_TOL: f64 = 1e-10;
const BLOWUP: f64 = 1e12;

pub struct AmpSystem {
    a: DMatrix<f64>,
    /// Whitened, column-balanced operator `√(n/r)·V_rᵀ` of shape `r × n`.
    w: DMatrix<f64>,
    /// Maps `y` to the whitened measurements, `√(n/r)·S_r⁻¹·U_rᵀ`.
    whiten: DMatrix<f64>,
    sqrt_m: f64,
    params: SolverParams,
}

impl AmpSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Result<Self, SolverError> {
        let (m, n) = a.shape();
        let sqrt_m = (m.max(1) as f64).sqrt();
        let scaled = &a / sqrt_m;
        let svd = scaled.svd(true, true);
        let u = svd
            .u
            .ok_or_else(|| SolverError::Numerical("svd did not produce U".into()))?;
        let v_t = svd
            .v_t
            .ok_or_else(|| SolverError::Numerical("svd did not produce Vᵀ".into()))?;
        let s = svd.singular_values;
        let smax = s.max();
        let eps = smax * f64::EPSILON * m.max(n) as f64;
        let keep: Vec<usize> = (0..s.len()).filter(|&i| smax > 0.0 && s[i] > eps).collect();
        let r = keep.len();

        let balance = if r > 0 { (n as f64 / r as f64).sqrt() } else { 1.0 };
        let mut w = DMatrix::zeros(r, n);
        let mut whiten = DMatrix::zeros(r, m);
        for (row, &i) in keep.iter().enumerate() {
            w.row_mut(row).copy_from(&(v_t.row(i) * balance));
            let ui = u.column(i).transpose() * (balance / s[i]);
            whiten.row_mut(row).copy_from(&ui);
        }

        Ok(Self {
            a,
            w,
            whiten,
            sqrt_m,
            params,
        })
    }

    /// Runs the AMP recursion on the whitened system; returns the estimate in
    /// the `A/√m` domain and the iteration count.
    fn iterate(&self, yt: &DVector<f64>) -> Result<(DVector<f64>, usize), SolverError> {
        let (r, n) = self.w.shape();
        let mut x = DVector::zeros(n);
        let mut z = yt.clone();
        let y_norm = yt.norm().max(f64::MIN_POSITIVE);
        let mut iterations = 0;

        while iterations < self.params.max_iter {
            iterations += 1;
            let h = &x + self.w.tr_mul(&z);
            let tau = ALPHA * z.norm() / (r as f64).sqrt();
            let x_new = h.map(|v| soft_threshold(v, tau));
            let active = x_new.iter().filter(|v| **v != 0.0).count() as f64;
            let onsager = &z * (active / r as f64);
            z = yt - &self.w * &x_new + onsager;

            check_finite(&x_new, "amp")?;
            if x_new.norm() > BLOWUP * (1.0 + y_norm) {
                return Err(SolverError::Divergence(format!(
                    "amp estimate grew to {:.3e} after {} iterations",
                    x_new.norm(),
                    iterations
                )));
            }
            let step = (&x_new - &x).norm();
            x = x_new;
            if step <= STEP_TOL * (1.0 + x.norm()) || z.norm() <= STEP_TOL * y_norm {
                break;
            }
        }
        Ok((x, iterations))
    }
}

impl Prepared for AmpSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, _k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let tol = self.params.tolerance;
        if self.w.nrows() == 0 || y.amax() == 0.0 {
            return Ok(Solution::new(&self.a, y, DVector::zeros(self.a.ncols()), 0, tol));
        }
        let yt = &self.whiten * y;
        let (x_scaled, iterations) = self.iterate(&yt)?;
        let x = x_scaled / self.sqrt_m;
        let supp = support_of(&x, 0.0);
        let x = debias(&self.a, y, x, &supp)?;
        Ok(Solution::new(&self.a, y, x, iterations, tol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn sparse_problem(m: usize, n: usize, seed: u64) -> (DMatrix<f64>, DVector<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = DMatrix::from_fn(m, n, |_, _| rng.sample::<f64, _>(StandardNormal));
        let mut x0 = DVector::zeros(n);
        for j in [2usize, 19, 33, 58, 71, 96] {
            x0[j] = if j % 2 == 0 { 1.0 + j as f64 / 100.0 } else { -1.5 };
        }
        (a, x0)
    }

    #[test]
    fn rescale_contract_holds_for_public_operator() {
        let (a, x0) = sparse_problem(50, 120, 5);
        let y = &a * &x0;
        let sys = AmpSystem::new(a.clone(), SolverParams::default()).unwrap();
        let sol = sys.solve(&y, 0).unwrap();
        assert!(sol.converged);
        assert!((&y - &a * &sol.x).norm() <= 1e-3);
        assert!((&sol.x - &x0).norm() / x0.norm() < 1e-6);
    }

    #[test]
    fn survives_correlated_rows() {
        let (a, x0) = sparse_problem(40, 120, 6);
        // mix the rows with a random ±1 matrix
        let mut rng = StdRng::seed_from_u64(7);
        let omega = DMatrix::from_fn(40, 40, |_, _| if rng.gen_bool(0.5) { 1.0 } else { -1.0 });
        let mixed = &omega * &a;
        let y = &mixed * &x0;
        let sys = AmpSystem::new(mixed, SolverParams::default()).unwrap();
        let sol = sys.solve(&y, 0).unwrap();
        assert!((&sol.x - &x0).norm() / x0.norm() < 1e-6);
    }

    #[test]
    fn zero_rhs_is_trivial() {
        let a = DMatrix::from_element(2, 4, 1.0);
        let sys = AmpSystem::new(a, SolverParams::default()).unwrap();
        let sol = sys.solve(&DVector::zeros(2), 0).unwrap();
        assert_eq!(sol.iterations, 0);
        assert!(sol.converged);
    }
}
