// Copyright (c) 2024, The csnet Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Sparse Recovery Solvers
//!
//! Every algorithm recovers `x` from `y ≈ A·x` under a sparsity prior and
//! shares one interface, [`CsSolver`]. Solving many right-hand sides against
//! the same operator (the stage-1 columns of a sequence) goes through
//! [`CsSolver::prepare`], which densifies and factorises `A` once and hands
//! back a [`Prepared`] system that is cheap to solve repeatedly and can be
//! shared across threads.
//!
//! | Algorithm | Uses `k` | Internal `1/√m` rescale |
//! |-----------|----------|-------------------------|
//! | OMP       | yes      | no                      |
//! | BP        | no       | no                      |
//! | AMP       | no       | yes                     |
//! | CoSaMP    | yes      | no                      |
//! | ROMP      | yes      | no                      |
//! | SP        | yes      | no                      |
//! | SL0       | no       | yes                     |
//! | EMBP      | yes      | no                      |
//!
//! When a solver needs `k` and is given `0`, the default
//! `k = ⌊m / log₁₀ n⌋` (`⌊m / log₁₀² n⌋` for ROMP) is substituted.

mod amp;
mod bp;
mod embp;
mod greedy;
mod sl0;

use crate::error::{CsError, SolverError};
use crate::linalg::LinearOperator;
use nalgebra::{DMatrix, DVector};
use std::fmt;

pub use amp::AmpSystem;
pub use bp::BasisPursuitSystem;
pub use embp::EmbpSystem;
pub use greedy::{CosampSystem, OmpSystem, RompSystem, SubspacePursuitSystem};
pub use sl0::Sl0System;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SolverKind {
    Omp,
    Bp,
    Amp,
    Cosamp,
    Romp,
    Sp,
    Sl0,
    Embp,
}

impl SolverKind {
    pub const ALL: [SolverKind; 8] = [
        SolverKind::Omp,
        SolverKind::Bp,
        SolverKind::Amp,
        SolverKind::Cosamp,
        SolverKind::Romp,
        SolverKind::Sp,
        SolverKind::Sl0,
        SolverKind::Embp,
    ];

    pub fn requires_sparsity(&self) -> bool {
        matches!(
            self,
            SolverKind::Omp | SolverKind::Cosamp | SolverKind::Romp | SolverKind::Sp | SolverKind::Embp
        )
    }

    /// Whether the adapter runs on `A/√m` and rescales the solution.
    pub fn normalizes_internally(&self) -> bool {
        matches!(self, SolverKind::Amp | SolverKind::Sl0)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SolverKind::Omp => "OMP",
            SolverKind::Bp => "BP",
            SolverKind::Amp => "AMP",
            SolverKind::Cosamp => "CoSaMP",
            SolverKind::Romp => "ROMP",
            SolverKind::Sp => "SP",
            SolverKind::Sl0 => "SL0",
            SolverKind::Embp => "EMBP",
        }
    }
}

impl fmt::Display for SolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SolverKind {
    type Err = CsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "omp" => Ok(SolverKind::Omp),
            "bp" | "basis_pursuit" => Ok(SolverKind::Bp),
            "amp" => Ok(SolverKind::Amp),
            "cosamp" => Ok(SolverKind::Cosamp),
            "romp" => Ok(SolverKind::Romp),
            "sp" | "subspace_pursuit" => Ok(SolverKind::Sp),
            "sl0" => Ok(SolverKind::Sl0),
            "embp" => Ok(SolverKind::Embp),
            other => Err(CsError::Config(format!("unknown solver '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// Absolute residual bound `‖y − A·x‖₂` that counts as converged.
    pub tolerance: f64,
    pub max_iter: usize,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-3,
            max_iter: 1000,
        }
    }
}

/// Result of one successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub x: DVector<f64>,
    pub iterations: usize,
    pub converged: bool,
    pub residual: f64,
}

impl Solution {
    pub(crate) fn new(a: &DMatrix<f64>, y: &DVector<f64>, x: DVector<f64>, iterations: usize, tol: f64) -> Self {
        let residual = (y - a * &x).norm();
        Self {
            x,
            iterations,
            converged: residual <= tol,
            residual,
        }
    }
}

/// A solver bound to one operator.
pub trait Prepared: Send + Sync {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    /// Recovers `x` from `y`; `k` is the sparsity prior (`0` = default).
    /// Solvers that do not use a prior ignore it.
    fn solve(&self, y: &DVector<f64>, k: usize) -> Result<Solution, SolverError>;
}

pub trait CsSolver: Send + Sync {
    fn kind(&self) -> SolverKind;
    fn params(&self) -> SolverParams;

    fn set_tolerance(&mut self, tol: f64) -> Result<(), SolverError>;
    fn set_max_iter(&mut self, max_iter: usize) -> Result<(), SolverError>;

    fn prepare(&self, a: &dyn LinearOperator) -> Result<Box<dyn Prepared>, SolverError>;

    fn solve(&self, y: &DVector<f64>, a: &dyn LinearOperator, k: usize) -> Result<Solution, SolverError> {
        self.prepare(a)?.solve(y, k)
    }
}

/// The concrete solver: one [`SolverKind`] and its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Solver {
    kind: SolverKind,
    params: SolverParams,
}

impl Solver {
    pub fn new(kind: SolverKind) -> Self {
        Self {
            kind,
            params: SolverParams::default(),
        }
    }

    pub fn with_params(kind: SolverKind, tolerance: f64, max_iter: usize) -> Result<Self, SolverError> {
        let mut s = Self::new(kind);
        s.set_tolerance(tolerance)?;
        s.set_max_iter(max_iter)?;
        Ok(s)
    }
}

impl CsSolver for Solver {
    fn kind(&self) -> SolverKind {
        self.kind
    }

    fn params(&self) -> SolverParams {
        self.params
    }

    fn set_tolerance(&mut self, tol: f64) -> Result<(), SolverError> {
        if !tol.is_finite() || tol < 0.0 {
            return Err(SolverError::InvalidParameter(format!(
                "tolerance must be finite and >= 0, got {}",
                tol
            )));
        }
        self.params.tolerance = tol;
        Ok(())
    }

    fn set_max_iter(&mut self, max_iter: usize) -> Result<(), SolverError> {
        if max_iter == 0 {
            return Err(SolverError::InvalidParameter("max_iter must be >= 1".into()));
        }
        self.params.max_iter = max_iter;
        Ok(())
    }

    fn prepare(&self, a: &dyn LinearOperator) -> Result<Box<dyn Prepared>, SolverError> {
        let dense = a.to_dense();
        let p = self.params;
        Ok(match self.kind {
            SolverKind::Omp => Box::new(OmpSystem::new(dense, p)),
            SolverKind::Cosamp => Box::new(CosampSystem::new(dense, p)),
            SolverKind::Romp => Box::new(RompSystem::new(dense, p)),
            SolverKind::Sp => Box::new(SubspacePursuitSystem::new(dense, p)),
            SolverKind::Bp => Box::new(BasisPursuitSystem::new(dense, p)?),
            SolverKind::Amp => Box::new(AmpSystem::new(dense, p)?),
            SolverKind::Sl0 => Box::new(Sl0System::new(dense, p)?),
            SolverKind::Embp => Box::new(EmbpSystem::new(dense, p)),
        })
    }
}

/// Substitutes the default sparsity for `k = 0` and checks `k ≤ n`.
pub fn resolve_sparsity(kind: SolverKind, k: usize, m: usize, n: usize) -> Result<usize, SolverError> {
    let k = if k == 0 { default_sparsity(kind, m, n) } else { k };
    if k > n {
        return Err(SolverError::InvalidSparsity { k, n });
    }
    Ok(k)
}

/// `⌊m / log₁₀ n⌋`, or `⌊m / log₁₀² n⌋` for ROMP; at least 1.
pub fn default_sparsity(kind: SolverKind, m: usize, n: usize) -> usize {
    let lg = (n as f64).log10();
    let denom = if kind == SolverKind::Romp { lg * lg } else { lg };
    if denom <= 0.0 || !denom.is_finite() {
        return m.max(1);
    }
    ((m as f64 / denom).floor() as usize).max(1)
}

pub(crate) fn check_rhs(a: &DMatrix<f64>, y: &DVector<f64>) -> Result<(), SolverError> {
    if a.nrows() != y.len() {
        return Err(crate::error::DimensionMismatch::new("solver rhs", a.nrows(), y.len()).into());
    }
    Ok(())
}

pub(crate) fn check_finite(x: &DVector<f64>, what: &str) -> Result<(), SolverError> {
    if x.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(SolverError::Divergence(format!("{} produced non-finite values", what)))
    }
}

/// Minimum-norm least-squares solution of `A·x = y` through the SVD.
pub(crate) fn least_squares(a: &DMatrix<f64>, y: &DVector<f64>) -> Result<DVector<f64>, SolverError> {
    if a.ncols() == 0 {
        return Ok(DVector::zeros(0));
    }
    let svd = a.clone().svd(true, true);
    let smax = svd.singular_values.max();
    if smax <= 0.0 {
        return Ok(DVector::zeros(a.ncols()));
    }
    let eps = smax * f64::EPSILON * a.nrows().max(a.ncols()) as f64;
    svd.solve(y, eps)
        .map_err(|e| SolverError::Numerical(e.to_string()))
}

/// Moore-Penrose pseudo-inverse, dropping singular values below the usual
/// rank-revealing threshold.
pub(crate) fn pseudo_inverse(a: &DMatrix<f64>) -> Result<DMatrix<f64>, SolverError> {
    let (m, n) = a.shape();
    if m == 0 || n == 0 {
        return Ok(DMatrix::zeros(n, m));
    }
    let svd = a.clone().svd(true, true);
    let smax = svd.singular_values.max();
    if smax <= 0.0 {
        return Ok(DMatrix::zeros(n, m));
    }
    let eps = smax * f64::EPSILON * m.max(n) as f64;
    svd.pseudo_inverse(eps)
        .map_err(|e| SolverError::Numerical(e.to_string()))
}

/// Least squares restricted to the columns in `support`, scattered back into
/// a length-`n` vector.
pub(crate) fn least_squares_on(
    a: &DMatrix<f64>,
    y: &DVector<f64>,
    support: &[usize],
) -> Result<DVector<f64>, SolverError> {
    let mut x = DVector::zeros(a.ncols());
    if support.is_empty() {
        return Ok(x);
    }
    let sub = a.select_columns(support.iter());
    let xs = least_squares(&sub, y)?;
    for (i, &j) in support.iter().enumerate() {
        x[j] = xs[i];
    }
    Ok(x)
}

/// Replaces `x` by the least-squares fit on `support` when that fit explains
/// `y` at least as well. Supports larger than `m` are left alone.
pub(crate) fn debias(
    a: &DMatrix<f64>,
    y: &DVector<f64>,
    x: DVector<f64>,
    support: &[usize],
) -> Result<DVector<f64>, SolverError> {
    if support.is_empty() || support.len() > a.nrows() {
        return Ok(x);
    }
    let fit = least_squares_on(a, y, support)?;
    let r_fit = (y - a * &fit).norm();
    let r_x = (y - a * &x).norm();
    if r_fit <= r_x * (1.0 + 1e-9) + f64::EPSILON {
        Ok(fit)
    } else {
        Ok(x)
    }
}

/// Indices of the non-zero entries whose magnitude exceeds `rel · max|x|`.
pub(crate) fn support_of(x: &DVector<f64>, rel: f64) -> Vec<usize> {
    let peak = x.amax();
    if peak == 0.0 {
        return Vec::new();
    }
    x.iter()
        .enumerate()
        .filter(|(_, v)| v.abs() > rel * peak)
        .map(|(i, _)| i)
        .collect()
}

/// Indices of the `k` largest magnitudes, in descending order.
pub(crate) fn top_k(v: &DVector<f64>, k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..v.len()).collect();
    idx.sort_by(|&a, &b| {
        v[b].abs()
            .partial_cmp(&v[a].abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    idx.truncate(k);
    idx
}

pub(crate) fn soft_threshold(v: f64, t: f64) -> f64 {
    if v > t {
        v - t
    } else if v < -t {
        v + t
    } else {
        0.0
    }
}

pub(crate) fn column_norms(a: &DMatrix<f64>) -> Vec<f64> {
    a.column_iter().map(|c| c.norm()).collect()
}
