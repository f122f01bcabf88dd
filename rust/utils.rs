use crate::error::Result;
use crate::float_trait::StainFloat;
use ndarray::{Array2, ArrayView2, ArrayView3};
use rayon::prelude::*;
use std::cmp::Ordering;

/// Flatten an H×W×C image into a (H·W)×C matrix, one row per pixel in row-major order.
pub fn pixel_matrix<T: Clone>(im: ArrayView3<T>) -> Result<Array2<T>> {
    let (h, w, c) = im.dim();
    Ok(im.to_shape((h * w, c))?.into_owned())
}

/// Gather the given rows of `arr` into a new matrix.
pub fn select_rows<F: StainFloat>(arr: ArrayView2<F>, indices: &[usize]) -> Array2<F> {
    let ncols = arr.ncols();
    let nrows = indices.len();
    if nrows == 0 {
        return Array2::zeros((0, ncols));
    }

    let data: Vec<F> = (0..nrows * ncols)
        .into_par_iter()
        .map(|flat| arr[[indices[flat / ncols], flat % ncols]])
        .collect();

    Array2::from_shape_vec((nrows, ncols), data).expect("Shape conversion should not fail")
}

/// Linear-interpolation percentile (`q` in [0, 100]) of 8-bit samples, via a histogram.
///
/// Returns 0 for an empty input.
pub fn percentile_u8(values: impl Iterator<Item = u8>, q: f64) -> f64 {
    let mut hist = [0usize; 256];
    let mut n = 0usize;
    for v in values {
        hist[v as usize] += 1;
        n += 1;
    }
    if n == 0 {
        return 0.0;
    }
    let rank = q.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;

    let nth = |k: usize| -> f64 {
        let mut seen = 0usize;
        for (value, count) in hist.iter().enumerate() {
            seen += count;
            if seen > k {
                return value as f64;
            }
        }
        255.0
    };
    let (a, b) = (nth(lo), nth(hi));
    a + (b - a) * frac
}

/// Linear-interpolation percentile (`q` in [0, 100]) of a float sample.
///
/// Matches NumPy's default `percentile` convention. Returns `None` when
/// `values` is empty. NaNs must be removed by the caller.
pub fn percentile<F: StainFloat>(values: &[F], q: f64) -> Option<F> {
    if values.is_empty() {
        return None;
    }
    let n = values.len();
    let rank = q.clamp(0.0, 100.0) / 100.0 * (n - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = F::lit(rank - lo as f64);

    let mut scratch = values.to_vec();
    let cmp = |a: &F, b: &F| a.partial_cmp(b).unwrap_or(Ordering::Equal);
    let (_, lo_val, upper) = scratch.select_nth_unstable_by(lo, cmp);
    let lo_val = *lo_val;
    let hi_val = if hi == lo {
        lo_val
    } else {
        // the (lo + 1)-th order statistic is the smallest element above the pivot
        upper
            .iter()
            .copied()
            .min_by(cmp)
            .unwrap_or(lo_val)
    };
    Some(lo_val + (hi_val - lo_val) * frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3};

    #[test]
    fn test_percentile_interpolates() {
        let v = [4.0f64, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&v, 0.0), Some(1.0));
        assert_eq!(percentile(&v, 100.0), Some(5.0));
        assert_eq!(percentile(&v, 50.0), Some(3.0));
        let p = percentile(&v, 90.0).unwrap();
        assert!((p - 4.6).abs() < 1e-12, "got {p}");
        assert_eq!(percentile::<f64>(&[], 50.0), None);
    }

    #[test]
    fn test_percentile_u8_matches_float_percentile() {
        let data: Vec<u8> = (0..200u32).map(|i| ((i * 37) % 251) as u8).collect();
        let as_float: Vec<f64> = data.iter().map(|v| f64::from(*v)).collect();
        for q in [1.0, 25.0, 50.0, 90.0, 99.0] {
            let a = percentile_u8(data.iter().copied(), q);
            let b = percentile(&as_float, q).unwrap();
            assert!((a - b).abs() < 1e-9, "q={q}: {a} vs {b}");
        }
    }

    #[test]
    fn test_pixel_matrix_row_major() {
        let im = Array3::from_shape_fn((2, 2, 3), |(i, j, c)| (i * 100 + j * 10 + c) as u8);
        let m = pixel_matrix(im.view()).unwrap();
        assert_eq!(m.row(1), array![10u8, 11, 12]);
        assert_eq!(m.row(2), array![100u8, 101, 102]);
    }

    #[test]
    fn test_select_rows() {
        let m = array![[1.0f64, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let s = select_rows(m.view(), &[2, 0]);
        assert_eq!(s, array![[7.0, 8.0, 9.0], [1.0, 2.0, 3.0]]);
        assert_eq!(select_rows(m.view(), &[]).dim(), (0, 3));
    }
}
