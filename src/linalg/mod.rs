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

//! # Linear Operator Algebra
//!
//! A [`LinearOperator`] is a real linear map `A: ℝⁿ → ℝᵐ` that only needs to
//! know how to apply itself and its adjoint. Products, block-diagonal stacks
//! and scalar multiples of operators are operators again and are evaluated
//! lazily: `(A·B)·x` is computed as `A·(B·x)` and never materialises `A·B`.
//!
//! Concrete leaves are dense matrices ([`DenseOperator`]), diagonal matrices
//! ([`Diagonal`], used for spatial precoding), row selections of the identity
//! ([`RowSelection`]) and anything else that implements the trait (random
//! matrices, sparsifying transforms, the network-coding buffer).

use crate::error::DimensionMismatch;
use nalgebra::{DMatrix, DVector};

mod combinators;
mod dense;

pub use combinators::{block_diag, BlockDiag, Product, Scaled, Transposed};
pub use dense::{DenseOperator, Diagonal, RowSelection};

pub type OpResult<T> = std::result::Result<T, DimensionMismatch>;

/// Owned, type-erased operator. The lifetime lets compositions borrow
/// operators owned elsewhere (e.g. the engine's network-coding buffer).
pub type BoxedOperator<'a> = Box<dyn LinearOperator + 'a>;

pub trait LinearOperator: Send + Sync {
    fn rows(&self) -> usize;
    fn cols(&self) -> usize;

    /// `y = A·x`
    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>>;

    /// `x = Aᵀ·y`
    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>>;

    /// Column `i` of `A`.
    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column", self.cols(), i)?;
        let mut e = DVector::zeros(self.cols());
        e[i] = 1.0;
        self.apply(&e)
    }

    /// Row `i` of `A`, returned as a column vector.
    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column_adjoint", self.rows(), i)?;
        let mut e = DVector::zeros(self.rows());
        e[i] = 1.0;
        self.apply_adjoint(&e)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.rows(), self.cols());
        for j in 0..self.cols() {
            if let Ok(col) = self.column(j) {
                out.set_column(j, &col);
            }
        }
        out
    }

    fn to_dense_adjoint(&self) -> DMatrix<f64> {
        self.to_dense().transpose()
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for &T {
    fn rows(&self) -> usize {
        (**self).rows()
    }
    fn cols(&self) -> usize {
        (**self).cols()
    }
    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        (**self).apply(x)
    }
    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        (**self).apply_adjoint(y)
    }
    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        (**self).column(i)
    }
    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        (**self).column_adjoint(i)
    }
    fn to_dense(&self) -> DMatrix<f64> {
        (**self).to_dense()
    }
    fn to_dense_adjoint(&self) -> DMatrix<f64> {
        (**self).to_dense_adjoint()
    }
}

impl<T: LinearOperator + ?Sized> LinearOperator for Box<T> {
    fn rows(&self) -> usize {
        (**self).rows()
    }
    fn cols(&self) -> usize {
        (**self).cols()
    }
    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        (**self).apply(x)
    }
    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        (**self).apply_adjoint(y)
    }
    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        (**self).column(i)
    }
    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        (**self).column_adjoint(i)
    }
    fn to_dense(&self) -> DMatrix<f64> {
        (**self).to_dense()
    }
    fn to_dense_adjoint(&self) -> DMatrix<f64> {
        (**self).to_dense_adjoint()
    }
}

/// Builder-style combinators available on every sized operator.
pub trait OperatorExt: LinearOperator + Sized {
    /// `self · right`; fails when `self.cols() != right.rows()`.
    fn compose<'a, R>(self, right: R) -> OpResult<Product<'a>>
    where
        Self: 'a,
        R: LinearOperator + 'a,
    {
        Product::new(Box::new(self), Box::new(right))
    }

    fn scale<'a>(self, alpha: f64) -> Scaled<'a>
    where
        Self: 'a,
    {
        Scaled::new(alpha, Box::new(self))
    }

    /// `selfᵀ`
    fn transposed<'a>(self) -> Transposed<'a>
    where
        Self: 'a,
    {
        Transposed::new(Box::new(self))
    }

    fn boxed<'a>(self) -> BoxedOperator<'a>
    where
        Self: 'a,
    {
        Box::new(self)
    }
}

impl<T: LinearOperator + Sized> OperatorExt for T {}

/// Checks a vector length against an operator dimension.
pub(crate) fn check_len(context: &'static str, expected: usize, v: &DVector<f64>) -> OpResult<()> {
    DimensionMismatch::check(context, expected, v.len())
}

/// `⟨a, b⟩`
pub fn dot(a: &DVector<f64>, b: &DVector<f64>) -> f64 {
    a.dot(b)
}

/// Relative residual `‖y − A·x‖₂ / ‖y‖₂` (or the absolute residual when `y = 0`).
pub fn relative_residual(a: &dyn LinearOperator, x: &DVector<f64>, y: &DVector<f64>) -> OpResult<f64> {
    let r = y - a.apply(x)?;
    let ny = y.norm();
    Ok(if ny > 0.0 { r.norm() / ny } else { r.norm() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_column_matches_dense() {
        let m = DMatrix::from_row_slice(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let op = DenseOperator::new(m.clone());
        let c = op.column(1).unwrap();
        assert_eq!(c, DVector::from_vec(vec![2.0, 5.0]));
        let r = op.column_adjoint(1).unwrap();
        assert_eq!(r, DVector::from_vec(vec![4.0, 5.0, 6.0]));
        assert_eq!(op.to_dense(), m);
    }

    #[test]
    fn out_of_range_column_is_dimension_error() {
        let op = DenseOperator::new(DMatrix::zeros(2, 3));
        let err = op.column(3).unwrap_err();
        assert_eq!(err.expected, 3);
        assert_eq!(err.found, 3);
        assert!(op.column_adjoint(2).is_err());
    }

    #[test]
    fn borrowed_operator_composes() {
        let a = DenseOperator::new(DMatrix::identity(3, 3) * 2.0);
        let b = DenseOperator::new(DMatrix::identity(3, 3));
        let p = (&a).compose(&b).unwrap();
        let y = p.apply(&DVector::from_element(3, 1.0)).unwrap();
        assert_eq!(y, DVector::from_element(3, 2.0));
    }
}
