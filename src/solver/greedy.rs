//! Greedy pursuits: OMP, CoSaMP, ROMP and Subspace Pursuit.
//!
//! All four pick atoms by correlating the residual with the columns of `A`
//! (normalised by the column norm, so masked or zero columns are never
//! picked) and refit by least squares on the current support.

use super::{
    check_rhs, column_norms, debias, least_squares_on, resolve_sparsity, support_of, top_k, Prepared, Solution,
    SolverKind, SolverParams,
};
use crate::error::SolverError;
use nalgebra::{DMatrix, DVector};

const NORM_FLOOR: f64 = 1e-12;

/// `Aᵀ·r` with every entry divided by its column norm.
fn normalized_proxy(a: &DMatrix<f64>, norms: &[f64], r: &DVector<f64>) -> DVector<f64> {
    let mut c = a.tr_mul(r);
    for (v, &nrm) in c.iter_mut().zip(norms) {
        *v = if nrm > NORM_FLOOR { *v / nrm } else { 0.0 };
    }
    c
}

fn merge(into: &mut Vec<usize>, extra: &[usize]) {
    for &j in extra {
        if !into.contains(&j) {
            into.push(j);
        }
    }
}

fn residual(a: &DMatrix<f64>, y: &DVector<f64>, x: &DVector<f64>) -> DVector<f64> {
    y - a * x
}

pub struct OmpSystem {
    a: DMatrix<f64>,
    norms: Vec<f64>,
    params: SolverParams,
}

impl OmpSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Self {
        let norms = column_norms(&a);
        Self { a, norms, params }
    }
}

impl Prepared for OmpSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let (m, n) = self.a.shape();
        let k = resolve_sparsity(SolverKind::Omp, k, m, n)?.min(m);
        let tol = self.params.tolerance;

        let mut r = y.clone();
        // Orthonormal basis of the selected atoms, grown by Gram-Schmidt.
        let mut basis: Vec<DVector<f64>> = Vec::with_capacity(k);
        let mut support = Vec::with_capacity(k);
        let mut chosen = vec![false; n];
        let mut iterations = 0;

        while support.len() < k && iterations < self.params.max_iter {
            if r.norm() <= tol {
                break;
            }
            let corr = self.a.tr_mul(&r);
            let mut best = None;
            let mut best_val = 0.0;
            for j in 0..n {
                if chosen[j] || self.norms[j] <= NORM_FLOOR {
                    continue;
                }
                let c = corr[j].abs() / self.norms[j];
                if c > best_val {
                    best_val = c;
                    best = Some(j);
                }
            }
            let j = match best {
                Some(j) => j,
                None => break,
            };
            chosen[j] = true;
            iterations += 1;

            let mut q = self.a.column(j).into_owned();
            for _ in 0..2 {
                for b in &basis {
                    let p = b.dot(&q);
                    q.axpy(-p, b, 1.0);
                }
            }
            let qn = q.norm();
            if qn <= 1e-10 * self.norms[j] {
                // already in the span of the support
                continue;
            }
            q /= qn;
            let p = q.dot(&r);
            r.axpy(-p, &q, 1.0);
            basis.push(q);
            support.push(j);
        }

        let x = least_squares_on(&self.a, y, &support)?;
        Ok(Solution::new(&self.a, y, x, iterations, tol))
    }
}

pub struct CosampSystem {
    a: DMatrix<f64>,
    norms: Vec<f64>,
    params: SolverParams,
}

impl CosampSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Self {
        let norms = column_norms(&a);
        Self { a, norms, params }
    }
}

impl Prepared for CosampSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let (m, n) = self.a.shape();
        let k = resolve_sparsity(SolverKind::Cosamp, k, m, n)?.min(m);
        let tol = self.params.tolerance;

        let mut x = DVector::zeros(n);
        let mut r = y.clone();
        let mut prev = r.norm();
        let mut iterations = 0;

        while iterations < self.params.max_iter && prev > tol {
            iterations += 1;
            let proxy = normalized_proxy(&self.a, &self.norms, &r);
            let mut cand = support_of(&x, 0.0);
            merge(&mut cand, &top_k(&proxy, 2 * k));
            let b = least_squares_on(&self.a, y, &cand)?;

            let keep = top_k(&b, k);
            let mut pruned = DVector::zeros(n);
            for &j in &keep {
                pruned[j] = b[j];
            }
            let r_new = residual(&self.a, y, &pruned);
            let rn = r_new.norm();
            if rn >= prev {
                break;
            }
            x = pruned;
            r = r_new;
            if prev - rn <= 1e-12 * prev {
                break;
            }
            prev = rn;
        }

        let supp = support_of(&x, 0.0);
        let x = debias(&self.a, y, x, &supp)?;
        Ok(Solution::new(&self.a, y, x, iterations, tol))
    }
}

pub struct SubspacePursuitSystem {
    a: DMatrix<f64>,
    norms: Vec<f64>,
    params: SolverParams,
}

impl SubspacePursuitSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Self {
        let norms = column_norms(&a);
        Self { a, norms, params }
    }
}

impl Prepared for SubspacePursuitSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let (m, n) = self.a.shape();
        let k = resolve_sparsity(SolverKind::Sp, k, m, n)?.min(m);
        let tol = self.params.tolerance;

        let mut support = top_k(&normalized_proxy(&self.a, &self.norms, y), k);
        let mut x = least_squares_on(&self.a, y, &support)?;
        let mut r = residual(&self.a, y, &x);
        let mut iterations = 0;

        while iterations < self.params.max_iter && r.norm() > tol {
            iterations += 1;
            let proxy = normalized_proxy(&self.a, &self.norms, &r);
            let mut cand = support.clone();
            merge(&mut cand, &top_k(&proxy, k));
            let b = least_squares_on(&self.a, y, &cand)?;
            let next = top_k(&b, k);
            let x_next = least_squares_on(&self.a, y, &next)?;
            let r_next = residual(&self.a, y, &x_next);
            if r_next.norm() >= r.norm() {
                break;
            }
            support = next;
            x = x_next;
            r = r_next;
        }

        Ok(Solution::new(&self.a, y, x, iterations, tol))
    }
}

pub struct RompSystem {
    a: DMatrix<f64>,
    norms: Vec<f64>,
    params: SolverParams,
}

impl RompSystem {
    pub fn new(a: DMatrix<f64>, params: SolverParams) -> Self {
        let norms = column_norms(&a);
        Self { a, norms, params }
    }

    /// Among `cand` (sorted by descending `|u|`), the run of comparable
    /// magnitudes (`|u_i| ≤ 2|u_j|`) with the largest energy.
    fn regularize(u: &DVector<f64>, cand: &[usize]) -> Vec<usize> {
        let mut best: &[usize] = &[];
        let mut best_energy = -1.0;
        for start in 0..cand.len() {
            let top = u[cand[start]].abs();
            let mut end = start;
            while end + 1 < cand.len() && top <= 2.0 * u[cand[end + 1]].abs() {
                end += 1;
            }
            let group = &cand[start..=end];
            let energy: f64 = group.iter().map(|&j| u[j] * u[j]).sum();
            if energy > best_energy {
                best_energy = energy;
                best = group;
            }
        }
        best.to_vec()
    }
}

impl Prepared for RompSystem {
    fn rows(&self) -> usize {
        self.a.nrows()
    }

    fn cols(&self) -> usize {
        self.a.ncols()
    }

    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError> {
        check_rhs(&self.a, y)?;
        let (m, n) = self.a.shape();
        let k = resolve_sparsity(SolverKind::Romp, k, m, n)?;
        let limit = (2 * k).min(m);
        let tol = self.params.tolerance;

        let mut support: Vec<usize> = Vec::with_capacity(limit);
        let mut x = DVector::zeros(n);
        let mut r = y.clone();
        let mut iterations = 0;

        while support.len() < limit && iterations < self.params.max_iter && r.norm() > tol {
            iterations += 1;
            let mut u = normalized_proxy(&self.a, &self.norms, &r);
            for &j in &support {
                u[j] = 0.0;
            }
            let cand: Vec<usize> = top_k(&u, k).into_iter().filter(|&j| u[j] != 0.0).collect();
            if cand.is_empty() {
                break;
            }
            let mut group = Self::regularize(&u, &cand);
            group.truncate(limit - support.len());
            merge(&mut support, &group);
            x = least_squares_on(&self.a, y, &support)?;
            r = residual(&self.a, y, &x);
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

    fn problem(m: usize, n: usize, k: usize, seed: u64) -> (DMatrix<f64>, DVector<f64>, DVector<f64>) {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = DMatrix::from_fn(m, n, |_, _| rng.sample::<f64, _>(StandardNormal));
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
        let y = &a * &x;
        (a, x, y)
    }

    fn rel_err(x: &DVector<f64>, x0: &DVector<f64>) -> f64 {
        (x - x0).norm() / x0.norm()
    }

    #[test]
    fn omp_recovers_sparse_vector() {
        let (a, x0, y) = problem(40, 100, 5, 11);
        let sol = OmpSystem::new(a, SolverParams::default()).solve(&y, 5).unwrap();
        assert!(rel_err(&sol.x, &x0) < 1e-8);
        assert!(sol.converged);
        assert!(sol.iterations <= 5);
    }

    #[test]
    fn cosamp_recovers_sparse_vector() {
        let (a, x0, y) = problem(40, 100, 5, 12);
        let sol = CosampSystem::new(a, SolverParams::default()).solve(&y, 5).unwrap();
        assert!(rel_err(&sol.x, &x0) < 1e-8);
    }

    #[test]
    fn subspace_pursuit_recovers_sparse_vector() {
        let (a, x0, y) = problem(40, 100, 5, 13);
        let sol = SubspacePursuitSystem::new(a, SolverParams::default()).solve(&y, 5).unwrap();
        assert!(rel_err(&sol.x, &x0) < 1e-8);
    }

    #[test]
    fn romp_recovers_sparse_vector() {
        let (a, x0, y) = problem(50, 100, 5, 14);
        let sol = RompSystem::new(a, SolverParams::default()).solve(&y, 5).unwrap();
        assert!(rel_err(&sol.x, &x0) < 1e-8);
    }

    #[test]
    fn omp_skips_zero_columns() {
        let mut a = DMatrix::identity(3, 4);
        a[(0, 0)] = 0.0;
        let y = DVector::from_vec(vec![1.0, 2.0, 0.0]);
        let sol = OmpSystem::new(a, SolverParams::default()).solve(&y, 2).unwrap();
        assert_eq!(sol.x[0], 0.0);
        assert!((sol.x[1] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn romp_regularization_picks_comparable_run() {
        let u = DVector::from_vec(vec![10.0, 1.0, 0.9, 0.8, 0.7]);
        let group = RompSystem::regularize(&u, &[0, 1, 2, 3, 4]);
        assert_eq!(group, vec![0]);
        let u = DVector::from_vec(vec![3.0, 2.0, 1.9, 1.8, 0.1]);
        let group = RompSystem::regularize(&u, &[0, 1, 2, 3, 4]);
        assert_eq!(group, vec![0, 1, 2, 3]);
    }
}
