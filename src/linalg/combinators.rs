use super::{check_len, BoxedOperator, LinearOperator, OpResult};
use crate::error::DimensionMismatch;
use nalgebra::{DMatrix, DVector};

/// `left · right`, applied right to left.
pub struct Product<'a> {
    left: BoxedOperator<'a>,
    right: BoxedOperator<'a>,
}

impl<'a> Product<'a> {
    pub fn new(left: BoxedOperator<'a>, right: BoxedOperator<'a>) -> OpResult<Self> {
        DimensionMismatch::check("product", left.cols(), right.rows())?;
        Ok(Self { left, right })
    }

    /// Left-to-right product of a non-empty chain `A₀·A₁·…·A_{k−1}`.
    pub fn chain(mut ops: Vec<BoxedOperator<'a>>) -> OpResult<BoxedOperator<'a>> {
        let last = ops
            .pop()
            .ok_or_else(|| DimensionMismatch::new("product chain", 1, 0))?;
        let mut acc = last;
        while let Some(op) = ops.pop() {
            acc = Box::new(Product::new(op, acc)?);
        }
        Ok(acc)
    }
}

impl LinearOperator for Product<'_> {
    fn rows(&self) -> usize {
        self.left.rows()
    }

    fn cols(&self) -> usize {
        self.right.cols()
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        let inner = self.right.apply(x)?;
        self.left.apply(&inner)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        let inner = self.left.apply_adjoint(y)?;
        self.right.apply_adjoint(&inner)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        self.left.to_dense() * self.right.to_dense()
    }
}

/// `diag(A₁, …, A_K)`; rows and columns are the sums of the blocks'.
pub struct BlockDiag<'a> {
    blocks: Vec<BoxedOperator<'a>>,
    row_offsets: Vec<usize>,
    col_offsets: Vec<usize>,
}

impl<'a> BlockDiag<'a> {
    pub fn new(blocks: Vec<BoxedOperator<'a>>) -> Self {
        let mut row_offsets = Vec::with_capacity(blocks.len() + 1);
        let mut col_offsets = Vec::with_capacity(blocks.len() + 1);
        let (mut r, mut c) = (0, 0);
        row_offsets.push(0);
        col_offsets.push(0);
        for b in &blocks {
            r += b.rows();
            c += b.cols();
            row_offsets.push(r);
            col_offsets.push(c);
        }
        Self {
            blocks,
            row_offsets,
            col_offsets,
        }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Row range `[start, end)` owned by block `k`.
    pub fn row_range(&self, k: usize) -> (usize, usize) {
        (self.row_offsets[k], self.row_offsets[k + 1])
    }

    /// Column range `[start, end)` owned by block `k`.
    pub fn col_range(&self, k: usize) -> (usize, usize) {
        (self.col_offsets[k], self.col_offsets[k + 1])
    }
}

/// Convenience constructor for [`BlockDiag::new`].
pub fn block_diag<'a>(blocks: Vec<BoxedOperator<'a>>) -> BlockDiag<'a> {
    BlockDiag::new(blocks)
}

impl LinearOperator for BlockDiag<'_> {
    fn rows(&self) -> usize {
        *self.row_offsets.last().unwrap_or(&0)
    }

    fn cols(&self) -> usize {
        *self.col_offsets.last().unwrap_or(&0)
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("block diagonal apply", self.cols(), x)?;
        let mut out = DVector::zeros(self.rows());
        for (k, block) in self.blocks.iter().enumerate() {
            let (c0, c1) = self.col_range(k);
            let (r0, r1) = self.row_range(k);
            let part = block.apply(&x.rows(c0, c1 - c0).into_owned())?;
            out.rows_mut(r0, r1 - r0).copy_from(&part);
        }
        Ok(out)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("block diagonal adjoint", self.rows(), y)?;
        let mut out = DVector::zeros(self.cols());
        for (k, block) in self.blocks.iter().enumerate() {
            let (c0, c1) = self.col_range(k);
            let (r0, r1) = self.row_range(k);
            let part = block.apply_adjoint(&y.rows(r0, r1 - r0).into_owned())?;
            out.rows_mut(c0, c1 - c0).copy_from(&part);
        }
        Ok(out)
    }

    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column", self.cols(), i)?;
        let mut out = DVector::zeros(self.rows());
        for (k, block) in self.blocks.iter().enumerate() {
            let (c0, c1) = self.col_range(k);
            if i >= c0 && i < c1 {
                let (r0, r1) = self.row_range(k);
                let part = block.column(i - c0)?;
                out.rows_mut(r0, r1 - r0).copy_from(&part);
                break;
            }
        }
        Ok(out)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.rows(), self.cols());
        for (k, block) in self.blocks.iter().enumerate() {
            let (c0, c1) = self.col_range(k);
            let (r0, r1) = self.row_range(k);
            out.view_mut((r0, c0), (r1 - r0, c1 - c0))
                .copy_from(&block.to_dense());
        }
        out
    }
}

/// `α·A`
pub struct Scaled<'a> {
    alpha: f64,
    inner: BoxedOperator<'a>,
}

impl<'a> Scaled<'a> {
    pub fn new(alpha: f64, inner: BoxedOperator<'a>) -> Self {
        Self { alpha, inner }
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}

impl LinearOperator for Scaled<'_> {
    fn rows(&self) -> usize {
        self.inner.rows()
    }

    fn cols(&self) -> usize {
        self.inner.cols()
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        Ok(self.inner.apply(x)? * self.alpha)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        Ok(self.inner.apply_adjoint(y)? * self.alpha)
    }

    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        Ok(self.inner.column(i)? * self.alpha)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        self.inner.to_dense() * self.alpha
    }
}

/// `Aᵀ`, with `apply` and `apply_adjoint` swapped.
pub struct Transposed<'a> {
    inner: BoxedOperator<'a>,
}

impl<'a> Transposed<'a> {
    pub fn new(inner: BoxedOperator<'a>) -> Self {
        Self { inner }
    }
}

impl LinearOperator for Transposed<'_> {
    fn rows(&self) -> usize {
        self.inner.cols()
    }

    fn cols(&self) -> usize {
        self.inner.rows()
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        self.inner.apply_adjoint(x)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        self.inner.apply(y)
    }

    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        self.inner.column_adjoint(i)
    }

    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        self.inner.column(i)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        self.inner.to_dense_adjoint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::{DenseOperator, OperatorExt};

    fn dense(rows: usize, cols: usize, vals: &[f64]) -> DenseOperator {
        DenseOperator::new(DMatrix::from_row_slice(rows, cols, vals))
    }

    #[test]
    fn product_rejects_nonconforming() {
        let a = dense(2, 3, &[0.0; 6]);
        let b = dense(2, 2, &[0.0; 4]);
        assert!(a.compose(b).is_err());
    }

    #[test]
    fn product_matches_dense_product() {
        let a = dense(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let b = dense(3, 2, &[1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let expected = a.matrix() * b.matrix();
        let p = a.compose(b).unwrap();
        assert_eq!(p.to_dense(), expected);
        let x = DVector::from_vec(vec![1.0, -1.0]);
        assert_eq!(p.apply(&x).unwrap(), &expected * &x);
    }

    #[test]
    fn block_diag_stacks_blocks() {
        let a = dense(1, 2, &[1.0, 1.0]);
        let b = dense(2, 1, &[2.0, 3.0]);
        let d = block_diag(vec![a.boxed(), b.boxed()]);
        assert_eq!((d.rows(), d.cols()), (3, 3));
        let y = d.apply(&DVector::from_vec(vec![1.0, 2.0, 10.0])).unwrap();
        assert_eq!(y, DVector::from_vec(vec![3.0, 20.0, 30.0]));
        assert_eq!(d.column(2).unwrap(), DVector::from_vec(vec![0.0, 2.0, 3.0]));
        assert_eq!(d.row_range(1), (1, 3));
    }

    #[test]
    fn scaled_scales_both_directions() {
        let a = dense(1, 2, &[1.0, 2.0]).scale(-2.0);
        assert_eq!(
            a.apply(&DVector::from_vec(vec![1.0, 1.0])).unwrap()[0],
            -6.0
        );
        assert_eq!(
            a.apply_adjoint(&DVector::from_vec(vec![1.0])).unwrap(),
            DVector::from_vec(vec![-2.0, -4.0])
        );
    }

    #[test]
    fn transposed_swaps_directions() {
        let a = dense(2, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let expected = a.matrix().transpose();
        let t = Transposed::new(a.boxed());
        assert_eq!((t.rows(), t.cols()), (3, 2));
        assert_eq!(t.to_dense(), expected);
        assert_eq!(t.column(1).unwrap(), DVector::from_vec(vec![4.0, 5.0, 6.0]));
    }

    #[test]
    fn chain_multiplies_left_to_right() {
        let a = dense(1, 2, &[1.0, 1.0]);
        let b = dense(2, 2, &[2.0, 0.0, 0.0, 3.0]);
        let c = dense(2, 1, &[1.0, 1.0]);
        let p = Product::chain(vec![a.boxed(), b.boxed(), c.boxed()]).unwrap();
        assert_eq!(p.apply(&DVector::from_vec(vec![1.0])).unwrap()[0], 5.0);
        assert!(Product::chain(Vec::new()).is_err());
    }
}
