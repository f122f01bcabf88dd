use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use ndarray::{s, Array2, ArrayView2, Axis};
use ndarray_linalg::{Eigh, Norm, UPLO};
use num_traits::Float;

/// Normalize each row of a matrix to unit L2 norm.
///
/// A zero (or non-finite) row has no direction, so it is reported as a
/// [`StainError::Domain`] rather than silently producing NaNs.
pub fn normalize_rows<F: StainFloat>(m: ArrayView2<F>) -> Result<Array2<F>> {
    let mut result = m.to_owned();
    for (i, mut row) in result.axis_iter_mut(Axis(0)).enumerate() {
        let norm = row.norm_l2();
        if !(Float::is_finite(norm) && norm > F::zero()) {
            return Err(StainError::Domain(format!(
                "row {i} has degenerate norm {}",
                norm.to_f64_lossy()
            )));
        }
        row.mapv_inplace(|v| v / norm);
    }
    Ok(result)
}

/// Sample covariance (ddof = 1) of the columns of `x`; rows are observations.
pub fn covariance<F: StainFloat>(x: ArrayView2<F>) -> Result<Array2<F>> {
    let n = x.nrows();
    if n < 2 {
        return Err(StainError::Shape(format!(
            "covariance needs at least 2 observations, got {n}"
        )));
    }
    let mean = x
        .mean_axis(Axis(0))
        .ok_or_else(|| StainError::Shape("empty observation matrix".into()))?;
    let centered = &x - &mean;
    let denom = F::lit((n - 1) as f64);
    Ok(centered.t().dot(&centered).mapv(|v| v / denom))
}

/// Eigenvectors of a symmetric matrix for its two largest eigenvalues.
///
/// Returned as the columns of an n×2 matrix, largest first. Each column's sign
/// is fixed so its first coordinate is non-negative, which keeps downstream
/// angle computations stable across runs.
pub fn leading_eigenvectors<F: StainFloat>(sym: &Array2<F>) -> Result<Array2<F>> {
    let n = sym.nrows();
    if n < 2 || sym.ncols() != n {
        return Err(StainError::Shape(format!(
            "expected a square matrix of order >= 2, got {:?}",
            sym.dim()
        )));
    }
    // eigenvalues come back in ascending order
    let (_, vecs) = sym.eigh(UPLO::Lower)?;
    let mut v = Array2::<F>::zeros((n, 2));
    v.column_mut(0).assign(&vecs.column(n - 1));
    v.column_mut(1).assign(&vecs.column(n - 2));
    for mut col in v.axis_iter_mut(Axis(1)) {
        if col[0] < F::zero() {
            col.mapv_inplace(|x| -x);
        }
    }
    Ok(v)
}

/// Squared Frobenius norm of `a - b`.
pub fn squared_error<F: StainFloat>(a: ArrayView2<F>, b: ArrayView2<F>) -> F {
    let mut acc = F::zero();
    for (x, y) in a.iter().zip(b.iter()) {
        let d = *x - *y;
        acc = acc + d * d;
    }
    acc
}

/// Largest eigenvalue of a symmetric 2×2 matrix, in closed form.
pub fn max_eigenvalue_2x2<F: StainFloat>(g: ArrayView2<F>) -> F {
    let (a, b, d) = (g[[0, 0]], g[[0, 1]], g[[1, 1]]);
    let half = F::lit(0.5);
    let mid = (a + d) * half;
    let diff = (a - d) * half;
    mid + Float::sqrt(diff * diff + b * b)
}

/// Swap the two rows of a 2×n matrix.
pub fn swap_rows<F: StainFloat>(m: &mut Array2<F>) {
    let top = m.slice(s![0, ..]).to_owned();
    let bottom = m.slice(s![1, ..]).to_owned();
    m.row_mut(0).assign(&bottom);
    m.row_mut(1).assign(&top);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_rows_unit_norm() {
        let m = array![[3.0f64, 4.0, 0.0], [1.0, 1.0, 1.0]];
        let n = normalize_rows(m.view()).unwrap();
        for row in n.rows() {
            assert!((row.dot(&row) - 1.0).abs() < 1e-12);
        }
        assert!((n[[0, 0]] - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_rows_zero_row_is_domain_error() {
        let m = array![[0.0f64, 0.0, 0.0], [1.0, 0.0, 0.0]];
        assert!(matches!(normalize_rows(m.view()), Err(StainError::Domain(_))));
    }

    #[test]
    fn test_covariance_matches_hand_computation() {
        let x = array![[1.0f64, 2.0], [2.0, 4.0], [3.0, 6.0]];
        let c = covariance(x.view()).unwrap();
        assert!((c[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((c[[0, 1]] - 2.0).abs() < 1e-12);
        assert!((c[[1, 1]] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_leading_eigenvectors_diagonal() {
        let m = array![[1.0f64, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let v = leading_eigenvectors(&m).unwrap();
        assert!((v[[1, 0]].abs() - 1.0).abs() < 1e-12);
        assert!((v[[2, 1]].abs() - 1.0).abs() < 1e-12);
        assert!(v[[0, 0]] >= 0.0 && v[[0, 1]] >= 0.0);
    }

    #[test]
    fn test_squared_error_sums_all_entries() {
        let a = array![[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let b = array![[1.0f64, 0.0, 3.0], [1.0, 5.0, 7.0]];
        assert!((squared_error(a.view(), b.view()) - 14.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_eigenvalue_2x2() {
        let g = array![[2.0f64, 1.0], [1.0, 2.0]];
        assert!((max_eigenvalue_2x2(g.view()) - 3.0).abs() < 1e-12);
    }
}
