//! Small dense matrices for least-squares fits and spline bases.
//!
//! A thin row-major facade over `nalgebra::DMatrix`. No sparse or banded
//! storage: the matrices built by this crate are at most a few hundred
//! elements on a side.

use std::ops::{AddAssign, Index, IndexMut, Mul, MulAssign, SubAssign};

use nalgebra::{DMatrix, DVector, RealField, Scalar};

#[derive(Clone, Debug, PartialEq)]
pub struct Matrix<T: Scalar>(DMatrix<T>);

impl<T: RealField + Copy> Matrix<T> {

    pub fn zeros(rows: usize, cols: usize) -> Self { Self(DMatrix::zeros(rows, cols)) }

    pub fn identity(n: usize) -> Self { Self(DMatrix::identity(n, n)) }

    /// Build from row-major `data`
    ///
    /// # Panics
    /// Panics if `data.len() != rows * cols`.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<T>) -> Self {
        assert_eq!(data.len(), rows * cols, "matrix data does not match {rows} x {cols}");
        Self(DMatrix::from_row_slice(rows, cols, &data))
    }

    pub fn rows   (&self) -> usize { self.0.nrows() }
    pub fn columns(&self) -> usize { self.0.ncols() }

    pub fn row(&self, r: usize) -> impl Iterator<Item = T> + '_ { (0..self.columns()).map(move |c| self.0[(r, c)]) }

    pub fn transpose(&self) -> Self { Self(self.0.transpose()) }

    /// `None` if the matrix is not square, or is singular
    pub fn invert(&self) -> Option<Self> {
        if !self.0.is_square() { return None }
        self.0.clone().try_inverse()
            .filter(|inv| inv.iter().all(|x| x.is_finite()))
            .map(Self)
    }

    /// Matrix-vector product
    ///
    /// # Panics
    /// Panics if `v.len() != self.columns()`.
    pub fn apply(&self, v: &[T]) -> Vec<T> {
        assert_eq!(v.len(), self.columns());
        (&self.0 * DVector::from_column_slice(v)).iter().copied().collect()
    }
}

impl<T: Scalar> Index<(usize, usize)> for Matrix<T> {
    type Output = T;
    #[inline]
    fn index(&self, rc: (usize, usize)) -> &T { &self.0[rc] }
}

impl<T: Scalar> IndexMut<(usize, usize)> for Matrix<T> {
    #[inline]
    fn index_mut(&mut self, rc: (usize, usize)) -> &mut T { &mut self.0[rc] }
}

impl<T: RealField + Copy> Mul for &Matrix<T> {
    type Output = Matrix<T>;
    fn mul(self, rhs: Self) -> Matrix<T> {
        assert_eq!(self.columns(), rhs.rows(), "cannot multiply {}x{} by {}x{}",
                   self.rows(), self.columns(), rhs.rows(), rhs.columns());
        Matrix(&self.0 * &rhs.0)
    }
}

impl<T: RealField + Copy> AddAssign<&Matrix<T>> for Matrix<T> {
    fn add_assign(&mut self, rhs: &Matrix<T>) { self.0 += &rhs.0 }
}

impl<T: RealField + Copy> SubAssign<&Matrix<T>> for Matrix<T> {
    fn sub_assign(&mut self, rhs: &Matrix<T>) { self.0 -= &rhs.0 }
}

impl<T: RealField + Copy> MulAssign<T> for Matrix<T> {
    fn mul_assign(&mut self, rhs: T) { self.0 *= rhs }
}

impl<T: RealField + Copy> MulAssign<&Matrix<T>> for Matrix<T> {
    fn mul_assign(&mut self, rhs: &Matrix<T>) { *self = &*self * rhs }
}

#[cfg(test)]
mod test {
    use super::*;
    use float_eq::assert_float_eq;
    use proptest::prelude::*;

    fn assert_close(a: &Matrix<f64>, b: &Matrix<f64>, tol: f64) {
        assert_eq!((a.rows(), a.columns()), (b.rows(), b.columns()));
        for r in 0..a.rows() {
            for c in 0..a.columns() {
                assert_float_eq!(a[(r, c)], b[(r, c)], abs <= tol);
            }
        }
    }

    #[test]
    fn rows_are_read_in_order() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0_f32]);
        assert_eq!(m[(0, 2)], 3.0);
        assert_eq!(m[(1, 0)], 4.0);
        assert_eq!(m.row(1).collect::<Vec<_>>(), vec![4.0, 5.0, 6.0]);
    }

    #[test]
    fn transpose_swaps_indices() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0_f32]);
        let t = m.transpose();
        assert_eq!((t.rows(), t.columns()), (3, 2));
        assert_eq!(t[(2, 1)], 6.0);
        assert_eq!(t[(0, 1)], 4.0);
    }

    #[test]
    fn known_inverse() {
        let m = Matrix::from_vec(2, 2, vec![4.0, 7.0, 2.0, 6.0]);
        let expected = Matrix::from_vec(2, 2, vec![0.6, -0.7, -0.2, 0.4]);
        assert_close(&m.invert().unwrap(), &expected, 1e-12);
    }

    #[test]
    fn singular_matrix_has_no_inverse() {
        let m = Matrix::from_vec(2, 2, vec![1.0, 2.0, 2.0, 4.0_f64]);
        assert!(m.invert().is_none());
        assert!(Matrix::<f64>::zeros(3, 3).invert().is_none());
        assert!(Matrix::<f64>::zeros(2, 3).invert().is_none());
    }

    #[test]
    fn arithmetic_assignments() {
        let mut m = Matrix::identity(2);
        m *= 3.0;
        m += &Matrix::from_vec(2, 2, vec![1.0, 1.0, 1.0, 1.0]);
        m -= &Matrix::identity(2);
        assert_eq!(m, Matrix::from_vec(2, 2, vec![3.0, 1.0, 1.0, 3.0_f64]));
        m *= &Matrix::identity(2);
        assert_eq!(m.apply(&[1.0, -1.0]), vec![2.0, -2.0]);
    }

    #[test]
    fn product_of_rectangular_matrices() {
        let a = Matrix::from_vec(2, 3, vec![1.0, 0.0, 2.0, 0.0, 1.0, 1.0_f64]);
        let b = Matrix::from_vec(3, 1, vec![1.0, 2.0, 3.0]);
        assert_eq!(&a * &b, Matrix::from_vec(2, 1, vec![7.0, 5.0]));
    }

    proptest! {
        #[test]
        fn diagonally_dominant_matrices_invert(
            off in proptest::collection::vec(-1.0..1.0_f64, 16),
        ) {
            let n = 4;
            let mut m = Matrix::from_vec(n, n, off);
            for i in 0..n { m[(i, i)] += 5.0 }
            let product = &m * &m.invert().unwrap();
            assert_close(&product, &Matrix::identity(n), 1e-10);
        }
    }
}
