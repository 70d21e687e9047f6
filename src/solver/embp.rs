//! Expectation-maximisation belief propagation.
//!
//! Scalar-variance generalised AMP with a Bernoulli-Gaussian signal prior
//! `x ~ (1−ρ)·δ₀ + ρ·N(θ, φ)` and an additive white Gaussian output channel
//! of variance `Δ`. After every message-passing sweep the prior parameters
//! `ρ, θ, φ` and the noise variance `Δ` are re-estimated by EM from the
//! current posteriors. The sparsity prior `k` seeds `ρ = k/n`.

use super::{
    check_finite, check_rhs, debias, least_squares_on, resolve_sparsity, top_k, Prepared, Solution, SolverKind,
    SolverParams,
};
use crate::error::SolverError;
use nalgebra::{DMatrix, DVector};

const DAMPING: f64 = 0.5;
const STEP_TOL: f64 = 1e-9;
const VAR_FLOOR: f64 = 1e-30;
const LOG_CLAMP: f64 = 700.0;

pub struct EmbpSystem {
    a: DMatrix<f64>,
    a_sq: DMatrix<f64>,
    params: SolverParams,
}

#[derive(Debug, Clone, Copy)]
struct Prior {
    rho: f64,
    theta: f64,
    phi: f64,
    delta: f64,
}

impl EmbpSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Self {
        let a_sq = a.map(|v| v * v);
        Self { a, a_sq, params }
    }

    /// Posterior mean, variance and activity probability of one coordinate
    /// given the pseudo-observation `r ~ N(x, nu_r)`.
    fn denoise(prior: &Prior, r: f64, nu_r: f64) -> (f64, f64, f64, f64, f64) {
        let nu = 1.0 / (1.0 / nu_r + 1.0 / prior.phi);
        let gamma = nu * (r / nu_r + prior.theta / prior.phi);
        let log_ratio = 0.5 * ((nu_r + prior.phi) / nu_r).ln() - r * r / (2.0 * nu_r)
            + (r - prior.theta).powi(2) / (2.0 * (nu_r + prior.phi));
        let odds = ((1.0 - prior.rho) / prior.rho).ln() + log_ratio;
        let pi = 1.0 / (1.0 + odds.clamp(-LOG_CLAMP, LOG_CLAMP).exp());
        let mean = pi * gamma;
        let var = (pi * (nu + gamma * gamma) - mean * mean).max(0.0);
        (mean, var, pi, gamma, nu)
    }

    fn initial_prior(&self, y: &DVector<f64>, k: usize) -> Prior {
        let (m, n) = self.a.shape();
        let rho = (k as f64 / n as f64).clamp(1e-6, 1.0 - 1e-6);
        let fro = self.a_sq.sum().max(VAR_FLOOR);
        let energy = y.norm_squared();
        let snr = 100.0;
        let delta = (energy / ((snr + 1.0) * m as f64)).max(VAR_FLOOR);
        let phi = ((energy - m as f64 * delta) / (fro * rho)).max(VAR_FLOOR);
        Prior {
            rho,
            theta: 0.0,
            phi,
            delta,
        }
    }

    /// Returns the posterior mean, the activity probabilities and the sweep count.
    fn run(&self, y: &DVector<f64>, k: usize) -> Result<(DVector<f64>, DVector<f64>, usize), SolverError> {
        let (m, n) = self.a.shape();
        let mut prior = self.initial_prior(y, k);

        let mut x = DVector::from_element(n, prior.rho * prior.theta);
        let mut nu_x = DVector::from_element(n, prior.rho * prior.phi);
        let mut s = DVector::zeros(m);
        let mut pi = DVector::from_element(n, prior.rho);
        let mut iterations = 0;

        while iterations < self.params.max_iter {
            iterations += 1;

            // output side
            let nu_p = &self.a_sq * &nu_x;
            let p = &self.a * &x - nu_p.component_mul(&s);
            let s_new = DVector::from_fn(m, |i, _| (y[i] - p[i]) / (nu_p[i] + prior.delta));
            let nu_s = nu_p.map(|v| 1.0 / (v + prior.delta));
            s = &s * (1.0 - DAMPING) + s_new * DAMPING;

            // input side
            let nu_r = self.a_sq.tr_mul(&nu_s).map(|v| 1.0 / v.max(VAR_FLOOR));
            let r = &x + nu_r.component_mul(&self.a.tr_mul(&s));

            let mut x_new = DVector::zeros(n);
            let mut gammas = DVector::zeros(n);
            let mut nus = DVector::zeros(n);
            for j in 0..n {
                let (mean, var, p_j, g, v) = Self::denoise(&prior, r[j], nu_r[j]);
                x_new[j] = mean;
                nu_x[j] = var;
                pi[j] = p_j;
                gammas[j] = g;
                nus[j] = v;
            }
            check_finite(&x_new, "embp")?;
            let x_next = &x * (1.0 - DAMPING) + &x_new * DAMPING;

            // EM re-estimation of the prior
            let pi_sum = pi.sum();
            if pi_sum > 0.0 {
                prior.rho = (pi_sum / n as f64).clamp(1e-6, 1.0 - 1e-6);
                prior.theta = pi.dot(&gammas) / pi_sum;
                let spread: f64 = (0..n)
                    .map(|j| pi[j] * ((prior.theta - gammas[j]).powi(2) + nus[j]))
                    .sum();
                prior.phi = (spread / pi_sum).max(VAR_FLOOR);
            }
            let z = &p + nu_p.component_mul(&s);
            let resid: f64 = (0..m)
                .map(|i| (y[i] - z[i]).powi(2) + nu_p[i] * prior.delta / (nu_p[i] + prior.delta))
                .sum();
            prior.delta = (resid / m as f64).max(VAR_FLOOR.max(1e-16 * y.norm_squared() / m as f64));

            let step = (&x_next - &x).norm();
            x = x_next;
            if step <= STEP_TOL * (1.0 + x.norm()) {
                break;
            }
        }
        Ok((x, pi, iterations))
    }
}

impl Prepared for EmbpSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let (m, n) = self.a.shape();
        let k = resolve_sparsity(SolverKind::Embp, k, m, n)?;
        let tol = self.params.tolerance;
        if y.amax() == 0.0 {
            return Ok(Solution::new(&self.a, y, DVector::zeros(n), 0, tol));
        }

        let (x, pi, iterations) = self.run(y, k)?;

        // refit on the most probable support, falling back to the k largest
        let active: Vec<usize> = (0..n).filter(|&j| pi[j] > 0.5).collect();
        let mut x = debias(&self.a, y, x, &active)?;
        let strongest = top_k(&x, k.min(m));
        let alt = least_squares_on(&self.a, y, &strongest)?;
        if (y - &self.a * &alt).norm() < (y - &self.a * &x).norm() {
            x = alt;
        }
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
    fn recovers_sparse_vector() {
        let mut rng = StdRng::seed_from_u64(41);
        let a = DMatrix::from_fn(64, 128, |_, _| rng.sample::<f64, _>(StandardNormal));
        let mut x0 = DVector::zeros(128);
        for (j, v) in [(1usize, 1.3), (30, -1.1), (61, 1.7), (99, -1.5), (120, 1.2), (127, -1.9)] {
            x0[j] = v;
        }
        let y = &a * &x0;
        let sol = EmbpSystem::new(a, SolverParams::default()).solve(&y, 6).unwrap();
        let snr = 20.0 * (x0.norm() / (&sol.x - &x0).norm().max(1e-300)).log10();
        assert!(snr >= 40.0, "snr {}", snr);
    }

    #[test]
    fn denoiser_shrinks_small_observations() {
        let prior = Prior {
            rho: 0.1,
            theta: 0.0,
            phi: 1.0,
            delta: 1e-3,
        };
        let (small, _, p_small, _, _) = EmbpSystem::denoise(&prior, 0.01, 0.01);
        let (large, _, p_large, _, _) = EmbpSystem::denoise(&prior, 2.0, 0.01);
        assert!(p_small < 0.5 && p_large > 0.99);
        assert!(small.abs() < 0.01);
        assert!((large - 2.0).abs() < 0.05);
    }
}
