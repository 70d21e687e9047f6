use super::{check_len, LinearOperator, OpResult};
use crate::error::DimensionMismatch;
use nalgebra::{DMatrix, DVector};

/// Explicit `m × n` matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseOperator {
    matrix: DMatrix<f64>,
}

impl DenseOperator {
    pub fn new(matrix: DMatrix<f64>) -> Self {
        Self { matrix }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn into_matrix(self) -> DMatrix<f64> {
        self.matrix
    }
}

impl From<DMatrix<f64>> for DenseOperator {
    fn from(matrix: DMatrix<f64>) -> Self {
        Self::new(matrix)
    }
}

impl LinearOperator for DenseOperator {
    fn rows(&self) -> usize {
        self.matrix.nrows()
    }

    fn cols(&self) -> usize {
        self.matrix.ncols()
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("dense apply", self.cols(), x)?;
        Ok(&self.matrix * x)
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("dense adjoint", self.rows(), y)?;
        Ok(self.matrix.tr_mul(y))
    }

    fn column(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column", self.cols(), i)?;
        Ok(self.matrix.column(i).into_owned())
    }

    fn column_adjoint(&self, i: usize) -> OpResult<DVector<f64>> {
        DimensionMismatch::check_index("column_adjoint", self.rows(), i)?;
        Ok(self.matrix.row(i).transpose())
    }

    fn to_dense(&self) -> DMatrix<f64> {
        self.matrix.clone()
    }
}

/// Square diagonal matrix. With 0/1 entries this is the spatial precoding
/// matrix `B` that masks out non-participating source nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagonal {
    diag: DVector<f64>,
}

impl Diagonal {
    pub fn new(diag: DVector<f64>) -> Self {
        Self { diag }
    }

    pub fn from_mask(mask: &[bool]) -> Self {
        Self::new(DVector::from_iterator(
            mask.len(),
            mask.iter().map(|&b| if b { 1.0 } else { 0.0 }),
        ))
    }

    pub fn is_identity(&self) -> bool {
        self.diag.iter().all(|&d| d == 1.0)
    }
}

impl LinearOperator for Diagonal {
    fn rows(&self) -> usize {
        self.diag.len()
    }

    fn cols(&self) -> usize {
        self.diag.len()
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("diagonal apply", self.cols(), x)?;
        Ok(self.diag.component_mul(x))
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("diagonal adjoint", self.rows(), y)?;
        Ok(self.diag.component_mul(y))
    }
}

/// The first `m` rows of a row permutation of `I_n`; row `r` picks
/// coordinate `indices[r]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSelection {
    indices: Vec<usize>,
    n: usize,
}

impl RowSelection {
    pub fn new(indices: Vec<usize>, n: usize) -> OpResult<Self> {
        for &i in &indices {
            DimensionMismatch::check_index("row selection", n, i)?;
        }
        Ok(Self { indices, n })
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }
}

impl LinearOperator for RowSelection {
    fn rows(&self) -> usize {
        self.indices.len()
    }

    fn cols(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("selection apply", self.n, x)?;
        Ok(DVector::from_iterator(
            self.indices.len(),
            self.indices.iter().map(|&i| x[i]),
        ))
    }

    fn apply_adjoint(&self, y: &DVector<f64>) -> OpResult<DVector<f64>> {
        check_len("selection adjoint", self.indices.len(), y)?;
        let mut out = DVector::zeros(self.n);
        for (r, &i) in self.indices.iter().enumerate() {
            out[i] += y[r];
        }
        Ok(out)
    }

    fn to_dense(&self) -> DMatrix<f64> {
        let mut out = DMatrix::zeros(self.indices.len(), self.n);
        for (r, &i) in self.indices.iter().enumerate() {
            out[(r, i)] = 1.0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selection_picks_coordinates() {
        let sel = RowSelection::new(vec![2, 0], 3).unwrap();
        let y = sel.apply(&DVector::from_vec(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(y, DVector::from_vec(vec![3.0, 1.0]));
        let x = sel.apply_adjoint(&DVector::from_vec(vec![5.0, 7.0])).unwrap();
        assert_eq!(x, DVector::from_vec(vec![7.0, 0.0, 5.0]));
        assert!(RowSelection::new(vec![3], 3).is_err());
    }

    #[test]
    fn mask_zeroes_entries() {
        let b = Diagonal::from_mask(&[true, false, true]);
        let y = b.apply(&DVector::from_element(3, 2.0)).unwrap();
        assert_eq!(y, DVector::from_vec(vec![2.0, 0.0, 2.0]));
        assert!(!b.is_identity());
    }

    #[test]
    fn dense_rejects_wrong_length() {
        let op = DenseOperator::new(DMatrix::zeros(2, 3));
        assert!(op.apply(&DVector::zeros(2)).is_err());
        assert!(op.apply_adjoint(&DVector::zeros(3)).is_err());
    }
}
