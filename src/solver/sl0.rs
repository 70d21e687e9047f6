//! Smoothed-ℓ₀: approximate the ℓ₀ norm by `n − Σ exp(−x²/2σ²)` and follow
//! its maximiser on the feasible set while `σ` shrinks geometrically.
//!
//! Like AMP, the adapter runs on `A/√m` and divides the result by `√m`.

use super::{check_finite, check_rhs, debias, pseudo_inverse, support_of, Prepared, Solution, SolverParams};
use crate::error::SolverError;
use nalgebra::{DMatrix, DVector};

const SIGMA_DECAY: f64 = 0.5;
const SIGMA_MIN_REL: f64 = 1e-5;
const INNER_LOOPS: usize = 3;
const MU: f64 = 2.0;
const SUPPORT_REL: f64 = 1e-3;

pub struct Sl0System {
    a: DMatrix<f64>,
    scaled: DMatrix<f64>,
    pinv: DMatrix<f64>,
    sqrt_m: f64,
    params: SolverParams,
}

impl Sl0System {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Result<Self, SolverError> {
        let sqrt_m = (a.nrows().max(1) as f64).sqrt();
        let scaled = &a / sqrt_m;
        let pinv = pseudo_inverse(&scaled)?;
        Ok(Self {
            a,
            scaled,
            pinv,
            sqrt_m,
            params,
        })
    }
}

impl Prepared for Sl0System {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, _k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let tol = self.params.tolerance;
        let mut x = &self.pinv * y;
        let peak = x.amax();
        if peak == 0.0 {
            return Ok(Solution::new(&self.a, y, DVector::zeros(self.a.ncols()), 0, tol));
        }

        let mut sigma = 2.0 * peak;
        let sigma_min = SIGMA_MIN_REL * peak;
        let mut iterations = 0;
        while sigma > sigma_min && iterations < self.params.max_iter {
            iterations += 1;
            let two_s2 = 2.0 * sigma * sigma;
            for _ in 0..INNER_LOOPS {
                let delta = x.map(|v| v * (-v * v / two_s2).exp());
                x -= delta * MU;
                let correction = &self.pinv * (&self.scaled * &x - y);
                x -= correction;
            }
            sigma *= SIGMA_DECAY;
        }
        check_finite(&x, "sl0")?;

        let x = x / self.sqrt_m;
        let supp = support_of(&x, SUPPORT_REL);
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

    #[test]
    fn recovers_and_rescales() {
        let mut rng = StdRng::seed_from_u64(31);
        let a = DMatrix::from_fn(40, 100, |_, _| rng.sample::<f64, _>(StandardNormal));
        let mut x0 = DVector::zeros(100);
        for (j, v) in [(5usize, 1.1), (25, -1.4), (50, 2.0), (64, -1.0), (88, 1.6)] {
            x0[j] = v;
        }
        let y = &a * &x0;
        let sys = Sl0System::new(a.clone(), SolverParams::default()).unwrap();
        let sol = sys.solve(&y, 0).unwrap();
        assert!((&y - &a * &sol.x).norm() <= 1e-3);
        assert!((&sol.x - &x0).norm() / x0.norm() < 1e-6);
        assert!(sol.iterations <= SolverParams::default().max_iter);
    }

    #[test]
    fn respects_iteration_cap() {
        let a = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 0.5, -1.0, 0.3, 1.0]);
        let params = SolverParams {
            tolerance: 1e-6,
            max_iter: 2,
        };
        let sol = Sl0System::new(a, params)
            .unwrap()
            .solve(&DVector::from_vec(vec![1.0, 1.0]), 0)
            .unwrap();
        assert_eq!(sol.iterations, 2);
    }
}
