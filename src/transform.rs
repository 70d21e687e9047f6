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

//! # Sparsifying Transforms
//!
//! Square orthonormal bases `Ψ` in which the sensed signals are sparse. Both
//! kinds are computed with an FFT rather than a dense matrix:
//!
//! * **DCT**: orthonormal DCT-II forward, DCT-III inverse, through a
//!   zero-padded FFT of length `2n`.
//! * **DFT**: the real orthonormal Fourier basis. Coefficient 0 is the DC
//!   term, coefficients `2k−1, 2k` are the scaled real and imaginary parts of
//!   bin `k`, and for even `n` the last coefficient is the Nyquist bin. This
//!   is the real projection of the complex DFT that keeps `Ψ·Ψᵀ = I`.
//!
//! As a [`LinearOperator`], `apply` is the forward transform and
//! `apply_adjoint` the inverse.

use crate::error::{CsError, DimensionMismatch};
use crate::linalg::{check_len, LinearOperator, OpResult};
use nalgebra::DVector;
use rustfft::num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransformKind {
    Dct,
    Dft,
}

impl std::str::FromStr for TransformKind {
    type Err = CsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dct" => Ok(TransformKind::Dct),
            "dft" | "fft" | "fourier" => Ok(TransformKind::Dft),
            other => Err(CsError::Config(format!("unknown transform '{}'", other))),
        }
    }
}

pub struct SparsifyingTransform {
    kind: TransformKind,
    n: usize,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl fmt::Debug for SparsifyingTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparsifyingTransform")
            .field("kind", &self.kind)
            .field("n", &self.n)
            .finish()
    }
}

impl SparsifyingTransform {
    pub fn new(kind: TransformKind, n: usize) -> Self {
        let mut planner = FftPlanner::<f64>::new();
        let len = match kind {
            TransformKind::Dct => 2 * n,
            TransformKind::Dft => n,
        };
        Self {
            kind,
            n,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn dct(n: usize) -> Self {
        Self::new(TransformKind::Dct, n)
    }

    pub fn dft(n: usize) -> Self {
        Self::new(TransformKind::Dft, n)
    }

    pub fn kind(&self) -> TransformKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Analysis: `θ = forward(x)`. `x` must have length `n`.
    pub fn forward(&self, x: &[f64]) -> OpResult<Vec<f64>> {
        DimensionMismatch::check("transform forward", self.n, x.len())?;
        if self.n == 0 {
            return Ok(Vec::new());
        }
        Ok(match self.kind {
            TransformKind::Dct => self.dct_forward(x),
            TransformKind::Dft => self.dft_forward(x),
        })
    }

    /// Synthesis: `x = inverse(θ)`. `θ` must have length `n`.
    pub fn inverse(&self, theta: &[f64]) -> OpResult<Vec<f64>> {
        DimensionMismatch::check("transform inverse", self.n, theta.len())?;
        if self.n == 0 {
            return Ok(Vec::new());
        }
        Ok(match self.kind {
            TransformKind::Dct => self.dct_inverse(theta),
            TransformKind::Dft => self.dft_inverse(theta),
        })
    }

    fn dct_scale(&self, k: usize) -> f64 {
        let n = self.n as f64;
        if k == 0 {
            (1.0 / n).sqrt()
        } else {
            (2.0 / n).sqrt()
        }
    }

    fn dct_forward(&self, x: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut buf = vec![Complex64::new(0.0, 0.0); 2 * n];
        for (b, &v) in buf.iter_mut().zip(x) {
            *b = Complex64::new(v, 0.0);
        }
        self.forward.process(&mut buf);
        (0..n)
            .map(|k| {
                let phase = -std::f64::consts::PI * k as f64 / (2 * n) as f64;
                let w = Complex64::new(phase.cos(), phase.sin());
                self.dct_scale(k) * (w * buf[k]).re
            })
            .collect()
    }

    fn dct_inverse(&self, theta: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut buf = vec![Complex64::new(0.0, 0.0); 2 * n];
        for k in 0..n {
            let phase = std::f64::consts::PI * k as f64 / (2 * n) as f64;
            let w = Complex64::new(phase.cos(), phase.sin());
            buf[k] = w * (self.dct_scale(k) * theta[k]);
        }
        self.inverse.process(&mut buf);
        buf[..n].iter().map(|c| c.re).collect()
    }

    fn dft_forward(&self, x: &[f64]) -> Vec<f64> {
        let n = self.n;
        let mut buf: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
        self.forward.process(&mut buf);
        let norm = (n as f64).sqrt();
        let mut out = vec![0.0; n];
        out[0] = buf[0].re / norm;
        let half = (n - 1) / 2;
        for k in 1..=half {
            out[2 * k - 1] = std::f64::consts::SQRT_2 * buf[k].re / norm;
            out[2 * k] = std::f64::consts::SQRT_2 * buf[k].im / norm;
        }
        if n % 2 == 0 && n > 1 {
            out[n - 1] = buf[n / 2].re / norm;
        }
        out
    }

    fn dft_inverse(&self, theta: &[f64]) -> Vec<f64> {
        let n = self.n;
        let norm = (n as f64).sqrt();
        let mut buf = vec![Complex64::new(0.0, 0.0); n];
        buf[0] = Complex64::new(theta[0] * norm, 0.0);
        let half = (n - 1) / 2;
        for k in 1..=half {
            let g = Complex64::new(theta[2 * k - 1], theta[2 * k]) * (norm / std::f64::consts::SQRT_2);
            buf[k] = g;
            buf[n - k] = g.conj();
        }
        if n % 2 == 0 && n > 1 {
            buf[n / 2] = Complex64::new(theta[n - 1] * norm, 0.0);
        }
        self.inverse.process(&mut buf);
        buf.iter().map(|c| c.re / n as f64).collect()
    }
}

impl LinearOperator for SparsifyingTransform {
    fn rows(&self) -> usize {
        self.n
    }

    fn cols(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("transform apply", self.n, x)?;
        Ok(DVector::from_vec(self.forward(x.as_slice())?))
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("transform adjoint", self.n, y)?;
        Ok(DVector::from_vec(self.inverse(y.as_slice())?))
    }
}
