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

//! # Seeded Random Sensing Matrices
//!
//! Every sensing matrix in the network (per-node temporal `Φ_{jk}`,
//! per-cluster spatial `Φ_k`) is fully determined by `(seed, m, n, kind)`,
//! which is what lets the sink rebuild the senders' matrices without ever
//! receiving them.
//!
//! Draws go through a thread-local process stream. A [`SeedScope`] saves that
//! stream, reseeds it for the duration of one construction and restores it on
//! drop, so building a matrix never perturbs other consumers of the stream.

use crate::error::{CsError, DimensionMismatch, Result};
use crate::linalg::{check_len, LinearOperator, OpResult, RowSelection};
use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::cell::RefCell;

/// Seed of the process stream before anyone calls [`set_global_seed`].
pub const DEFAULT_GLOBAL_SEED: u64 = 1;

thread_local! {
    static GLOBAL_RNG: RefCell<StdRng> = RefCell::new(StdRng::seed_from_u64(DEFAULT_GLOBAL_SEED));
}

/// Reseeds the calling thread's process stream.
pub fn set_global_seed(seed: u64) {
    GLOBAL_RNG.with(|g| *g.borrow_mut() = StdRng::seed_from_u64(seed));
}

/// Runs `f` with exclusive access to the calling thread's process stream.
pub fn with_global_rng<T>(f: impl FnOnce(&mut StdRng) -> T) -> T {
    GLOBAL_RNG.with(|g| f(&mut g.borrow_mut()))
}

/// Copy of the current process stream state.
pub fn global_snapshot() -> StdRng {
    GLOBAL_RNG.with(|g| g.borrow().clone())
}

/// Reseeds the process stream and restores the previous state on drop.
pub struct SeedScope {
    saved: Option<StdRng>,
}

impl SeedScope {
    pub fn enter(seed: u64) -> Self {
        let saved = GLOBAL_RNG.with(|g| {
            std::mem::replace(&mut *g.borrow_mut(), StdRng::seed_from_u64(seed))
        });
        Self { saved: Some(saved) }
    }
}

impl Drop for SeedScope {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            GLOBAL_RNG.with(|g| *g.borrow_mut() = saved);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RandomKind {
    /// Entries i.i.d. `N(mean, variance)`.
    Gaussian { mean: f64, variance: f64 },
    /// Entries in {+1, −1} with equal probability.
    Bernoulli,
    /// First `m` rows of a seeded row permutation of `I_n`.
    Identity,
}

impl RandomKind {
    pub const fn standard_gaussian() -> Self {
        RandomKind::Gaussian {
            mean: 0.0,
            variance: 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RandomKind::Gaussian { .. } => "gaussian",
            RandomKind::Bernoulli => "bernoulli",
            RandomKind::Identity => "identity",
        }
    }
}

impl Default for RandomKind {
    fn default() -> Self {
        Self::standard_gaussian()
    }
}

impl std::str::FromStr for RandomKind {
    type Err = CsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gaussian" | "normal" | "gauss" => Ok(Self::standard_gaussian()),
            "bernoulli" | "pm1" => Ok(RandomKind::Bernoulli),
            "identity" | "identity_subsampled" => Ok(RandomKind::Identity),
            other => Err(CsError::Config(format!("unknown random matrix kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Entries {
    Dense(DMatrix<f64>),
    Selection(RowSelection),
}

/// A seeded `m × n` sensing matrix, optionally scaled by `1/√m`.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomMatrix {
    kind: RandomKind,
    seed: u64,
    scale: f64,
    entries: Entries,
}

impl RandomMatrix {
    pub fn kind(&self) -> RandomKind {
        self.kind
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn is_normalized(&self) -> bool {
        self.scale != 1.0
    }

    /// Selected identity rows, for [`RandomKind::Identity`] matrices.
    pub fn selected_rows(&self) -> Option<&[usize]> {
        match &self.entries {
            Entries::Selection(sel) => Some(sel.indices()),
            Entries::Dense(_) => None,
        }
    }
}

impl LinearOperator for RandomMatrix {
    fn rows(&self) -> usize {
        match &self.entries {
            Entries::Dense(m) => m.nrows(),
            Entries::Selection(s) => s.rows(),
        }
    }

    fn cols(&self) -> usize {
        match &self.entries {
            Entries::Dense(m) => m.ncols(),
            Entries::Selection(s) => s.cols(),
        }
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        let y = match &self.entries {
            Entries::Dense(m) => {
                check_len("random apply", m.ncols(), x)?;
                m * x
            }
            Entries::Selection(s) => s.apply(x)?,
        };
        Ok(if self.scale != 1.0 { y * self.scale } else { y })
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        let x = match &self.entries {
            Entries::Dense(m) => {
                check_len("random adjoint", m.nrows(), y)?;
                m.tr_mul(y)
            }
            Entries::Selection(s) => s.apply_adjoint(y)?,
        };
        Ok(if self.scale != 1.0 { x * self.scale } else { x })
    }

    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column", self.cols(), i)?;
        let c = match &self.entries {
            Entries::Dense(m) => m.column(i).into_owned(),
            Entries::Selection(s) => s.column(i)?,
        };
        Ok(c * self.scale)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        let d = match &self.entries {
            Entries::Dense(m) => m.clone(),
            Entries::Selection(s) => s.to_dense(),
        };
        d * self.scale
    }
}

/// Deterministic constructor for [`RandomMatrix`].
pub struct RandomMatrixFactory;

impl RandomMatrixFactory {
    /// Builds the `m × n` matrix of `kind` drawn from `seed`.
    ///
    /// The draws run inside a [`SeedScope`], so the process stream is left
    /// exactly as it was found.
    pub fn build(seed: u64, m: usize, n: usize, kind: RandomKind, normalize: bool) -> Result<RandomMatrix> {
        let _scope = SeedScope::enter(seed);
        let entries = with_global_rng(|rng| Self::draw(rng, m, n, kind))?;
        let scale = if normalize && m > 0 {
            1.0 / (m as f64).sqrt()
        } else {
            1.0
        };
        Ok(RandomMatrix {
            kind,
            seed,
            scale,
            entries,
        })
    }

    fn draw(rng: &mut StdRng, m: usize, n: usize, kind: RandomKind) -> Result<Entries> {
        match kind {
            RandomKind::Gaussian { mean, variance } => {
                let normal = Normal::new(mean, variance.sqrt())
                    .map_err(|e| CsError::Config(format!("invalid gaussian parameters: {}", e)))?;
                let vals: Vec<f64> = (0..m * n).map(|_| normal.sample(rng)).collect();
                Ok(Entries::Dense(DMatrix::from_row_slice(m, n, &vals)))
            }
            RandomKind::Bernoulli => {
                let vals: Vec<f64> = (0..m * n)
                    .map(|_| {
                        let u: f64 = rng.gen();
                        if u < 0.5 {
                            -1.0
                        } else {
                            1.0
                        }
                    })
                    .collect();
                Ok(Entries::Dense(DMatrix::from_row_slice(m, n, &vals)))
            }
            RandomKind::Identity => {
                if m > n {
                    return Err(DimensionMismatch::new("identity subsampling", n, m).into());
                }
                let mut perm: Vec<usize> = (0..n).collect();
                // n - 2 integer draws
                for i in 0..n.saturating_sub(2) {
                    let j = rng.gen_range(i..n);
                    perm.swap(i, j);
                }
                perm.truncate(m);
                Ok(Entries::Selection(RowSelection::new(perm, n)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_restores_stream() {
        set_global_seed(7);
        let before = global_snapshot();
        {
            let _s = SeedScope::enter(99);
            with_global_rng(|r| r.gen::<u64>());
        }
        let mut a = before;
        let b: u64 = with_global_rng(|r| r.gen());
        assert_eq!(a.gen::<u64>(), b);
    }

    #[test]
    fn bernoulli_entries_are_signs() {
        let m = RandomMatrixFactory::build(3, 8, 16, RandomKind::Bernoulli, false).unwrap();
        assert!(m.to_dense().iter().all(|&v| v == 1.0 || v == -1.0));
        let d = m.to_dense();
        let plus = d.iter().filter(|&&v| v > 0.0).count();
        assert!(plus > 20 && plus < 108);
    }

    #[test]
    fn normalization_scales_by_inverse_sqrt_m() {
        let raw = RandomMatrixFactory::build(5, 4, 6, RandomKind::Bernoulli, false).unwrap();
        let norm = RandomMatrixFactory::build(5, 4, 6, RandomKind::Bernoulli, true).unwrap();
        let diff = raw.to_dense() * 0.5 - norm.to_dense();
        assert!(diff.amax() < 1e-15);
        assert!(norm.is_normalized());
    }

    #[test]
    fn identity_rejects_too_many_rows() {
        assert!(RandomMatrixFactory::build(1, 5, 4, RandomKind::Identity, false).is_err());
    }

    #[test]
    fn kind_parses() {
        assert_eq!("Bernoulli".parse::<RandomKind>().unwrap(), RandomKind::Bernoulli);
        assert!("foo".parse::<RandomKind>().is_err());
    }
}
