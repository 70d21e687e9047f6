//! Basis Pursuit: `min ‖x‖₁ subject to A·x = y`, solved with ADMM.
//!
//! The `x`-update is the Euclidean projection onto the affine set
//! `{x : A·x = y}`, which with `A⁺` precomputed is `v − A⁺(A·v − y)`. The
//! `z`-update is a soft threshold. Once the iterate settles on a small
//! support the result is refit on that support.

use super::{check_finite, check_rhs, debias, pseudo_inverse, soft_threshold, support_of, Prepared, Solution, SolverParams};
use crate::error::SolverError;
use nalgebra::{DMatrix, DVector};

const ABS_TOL: f64 = 1e-9;
const REL_TOL: f64 = 1e-7;
const SUPPORT_REL: f64 = 1e-3;
const DEBIAS_EVERY: usize = 10;

pub struct BasisPursuitSystem {
    a: DMatrix<f64>,
    pinv: DMatrix<f64>,
    params: SolverParams,
}

impl BasisPursuitSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Result<Self, SolverError> {
        let pinv = pseudo_inverse(&a)?;
        Ok(Self { a, pinv, params })
    }

    fn project(&self, v: &DVector<f64>, q: &DVector<f64>) -> DVector<f64> {
        v - &self.pinv * (&self.a * v) + q
    }

    /// Support refit, accepted only when it already meets the tolerance.
    fn try_finish(&self, y: &DVector<f64>, z: &DVector<f64>) -> Result<Option<DVector<f64>>, SolverError> {
        let supp = support_of(z, SUPPORT_REL);
        if supp.is_empty() || 2 * supp.len() > self.a.nrows() {
            return Ok(None);
        }
        let fit = debias(&self.a, y, z.clone(), &supp)?;
        if (y - &self.a * &fit).norm() <= self.params.tolerance {
            Ok(Some(fit))
        } else {
            Ok(None)
        }
    }
}

impl Prepared for BasisPursuitSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, _k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let n = self.a.ncols();
        let tol = self.params.tolerance;
        let q = &self.pinv * y;
        if q.amax() == 0.0 {
            return Ok(Solution::new(&self.a, y, DVector::zeros(n), 0, tol));
        }
        let tau = 0.05 * q.amax();
        let sqrt_n = (n as f64).sqrt();

        let mut x = q.clone();
        let mut z = x.map(|v| soft_threshold(v, tau));
        let mut u = &x - &z;
        let mut iterations = 0;

        while iterations < self.params.max_iter {
            iterations += 1;
            x = self.project(&(&z - &u), &q);
            let z_old = std::mem::replace(&mut z, (&x + &u).map(|v| soft_threshold(v, tau)));
            u += &x - &z;

            let primal = (&x - &z).norm();
            let dual = (&z - &z_old).norm();
            let eps_primal = ABS_TOL * sqrt_n + REL_TOL * x.norm().max(z.norm());
            let eps_dual = ABS_TOL * sqrt_n + REL_TOL * u.norm();
            if primal <= eps_primal && dual <= eps_dual {
                break;
            }
            if iterations % DEBIAS_EVERY == 0 {
                if let Some(fit) = self.try_finish(y, &z)? {
                    check_finite(&fit, "basis pursuit")?;
                    return Ok(Solution::new(&self.a, y, fit, iterations, tol));
                }
            }
        }

        check_finite(&x, "basis pursuit")?;
        let x = match self.try_finish(y, &z)? {
            Some(fit) => fit,
            None => {
                let supp = support_of(&z, SUPPORT_REL);
                debias(&self.a, y, x, &supp)?
            }
        };
        Ok(Solution::new(&self.a, y, x, iterations, tol))
    }
}
