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

//! # Network-Coding Coefficient Buffer
//!
//! Every packet reaching the sink carries the coefficients describing how it
//! linearly combines the cluster-head output rows of the current sequence.
//! The sink stacks these rows into `Ω` (one row per received packet, width
//! `L = Σ l_k`) and uses it as the leftmost factor of the stage-1 operator.
//!
//! Rows are mostly sparse (a packet only ever mixes rows of a single cluster,
//! and with coding disabled it is one-hot), so `Ω` is kept in compressed
//! sparse row form and applied without densifying.

pub mod packing;

use crate::error::{CsError, DimensionMismatch};
use crate::linalg::{check_len, LinearOperator, OpResult};
use nalgebra::DVector;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Value domain of freshly drawn network-coding coefficients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NcCoeffKind {
    /// Real-valued standard normal draws.
    Normal,
    /// ±1 with equal probability. Transported 2-bit packed.
    #[default]
    Bernoulli,
    /// Uniform on {0, 1}.
    Uniform,
}

impl NcCoeffKind {
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        match self {
            NcCoeffKind::Normal => StandardNormal.sample(rng),
            NcCoeffKind::Bernoulli => {
                if rng.gen::<f64>() < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            NcCoeffKind::Uniform => {
                if rng.gen_bool(0.5) {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// True when every value of the domain fits the 2-bit ternary packing.
    pub fn is_ternary(&self) -> bool {
        !matches!(self, NcCoeffKind::Normal)
    }
}

impl std::str::FromStr for NcCoeffKind {
    type Err = CsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "normal" | "gaussian" => Ok(NcCoeffKind::Normal),
            "bernoulli" | "pm1" => Ok(NcCoeffKind::Bernoulli),
            "uniform" => Ok(NcCoeffKind::Uniform),
            other => Err(CsError::Config(format!("unknown NC coefficient kind '{}'", other))),
        }
    }
}

/// Row-append-only CSR matrix `Ω` of fixed width `L`.
#[derive(Debug, Clone, Default)]
pub struct NcMatrixBuffer {
    values: Vec<f64>,
    col_indices: Vec<usize>,
    row_ptr: Vec<usize>,
    width: usize,
}

impl NcMatrixBuffer {
    pub fn new(width: usize) -> Self {
        Self {
            values: Vec::new(),
            col_indices: Vec::new(),
            row_ptr: vec![0],
            width,
        }
    }

    /// Sets the column width and drops every row.
    pub fn set_width(&mut self, width: usize) {
        self.width = width;
        self.reset();
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn num_rows(&self) -> usize {
        self.row_ptr.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn reset(&mut self) {
        self.values.clear();
        self.col_indices.clear();
        self.row_ptr.clear();
        self.row_ptr.push(0);
    }

    /// Appends a dense row; only its non-zeros are stored.
    pub fn append_row(&mut self, coeffs: &[f64]) -> OpResult<()> {
        DimensionMismatch::check("nc append_row", self.width, coeffs.len())?;
        for (col, &v) in coeffs.iter().enumerate() {
            if v != 0.0 {
                self.values.push(v);
                self.col_indices.push(col);
            }
        }
        self.row_ptr.push(self.values.len());
        Ok(())
    }

    pub fn append_zero_row(&mut self) {
        self.row_ptr.push(self.values.len());
    }

    /// Appends the canonical basis row `e_col`.
    pub fn append_unit_row(&mut self, col: usize) -> OpResult<()> {
        DimensionMismatch::check_index("nc unit row", self.width, col)?;
        self.values.push(1.0);
        self.col_indices.push(col);
        self.row_ptr.push(self.values.len());
        Ok(())
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        (start..end)
            .find(|&i| self.col_indices[i] == col)
            .map(|i| self.values[i])
            .unwrap_or(0.0)
    }

    /// Stored `(column, value)` pairs of `row`.
    pub fn row_entries(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let (start, end) = (self.row_ptr[row], self.row_ptr[row + 1]);
        (start..end).map(move |i| (self.col_indices[i], self.values[i]))
    }

    pub fn row_dense(&self, row: usize) -> Vec<f64> {
        let mut out = vec![0.0; self.width];
        for (c, v) in self.row_entries(row) {
            out[c] = v;
        }
        out
    }
}

impl LinearOperator for NcMatrixBuffer {
    fn rows(&self) -> usize {
        self.num_rows()
    }

    fn cols(&self) -> usize {
        self.width
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("nc apply", self.width, x)?;
        let mut out = DVector::zeros(self.num_rows());
        for r in 0..self.num_rows() {
            out[r] = self.row_entries(r).map(|(c, v)| v * x[c]).sum();
        }
        Ok(out)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("nc adjoint", self.num_rows(), y)?;
        let mut out = DVector::zeros(self.width);
        for r in 0..self.num_rows() {
            for (c, v) in self.row_entries(r) {
                out[c] += v * y[r];
            }
        }
        Ok(out)
    }

    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("nc row", self.num_rows(), i)?;
        Ok(DVector::from_vec(self.row_dense(i)))
    }
}
