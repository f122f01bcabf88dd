use crate::color_conversion::{rgb_to_od, validate_image};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::linalg::{covariance, leading_eigenvectors, normalize_rows};
use crate::utils::{percentile, pixel_matrix, select_rows};
use ndarray::{array, Array1, Array2, ArrayView2, ArrayView3, Axis, Zip};
use num_traits::Float;

/// Parameters of the Macenko estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacenkoParams {
    /// Pixels whose optical density exceeds this in no channel are background.
    pub beta: f64,
    /// Angular percentile margin (in percent) for the extreme stain directions.
    pub alpha: f64,
    pub min_tissue_pixels: usize,
}

/// Below this total OD variance the principal plane is undefined.
const MIN_SPREAD: f64 = 1e-12;

impl Default for MacenkoParams {
    fn default() -> Self {
        Self {
            beta: 0.15,
            alpha: 1.0,
            min_tissue_pixels: 10,
        }
    }
}

/// Compute the 2×3 stain matrix (rows: Hematoxylin, Eosin) with the Macenko method.
///
/// `od` holds one optical-density pixel per row (P×3).
pub fn separate_stains_macenko<F: StainFloat>(
    od: ArrayView2<F>,
    params: &MacenkoParams,
) -> Result<Array2<F>> {
    if od.ncols() != 3 {
        return Err(StainError::Shape(format!(
            "optical density must be P×3, got {:?}",
            od.dim()
        )));
    }

    // Keep pixels with enough density in at least one channel
    let beta = F::lit(params.beta);
    let keep: Vec<usize> = od
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, px)| px.iter().any(|v| *v > beta))
        .map(|(i, _)| i)
        .collect();
    let required = params.min_tissue_pixels.max(2);
    if keep.len() < required {
        return Err(StainError::InsufficientTissue {
            found: keep.len(),
            required,
        });
    }
    let tissue = select_rows(od, &keep);

    // Plane spanned by the two principal directions
    let cov = covariance(tissue.view())?;
    let spread = cov.diag().sum();
    let basis = if spread > F::lit(MIN_SPREAD) {
        leading_eigenvectors(&cov)?
    } else {
        log::warn!("macenko: tissue pixels have no colour spread, using the mean OD direction");
        mean_direction_basis(tissue.view())?
    };
    let proj = tissue.dot(&basis);
    drop(tissue);

    let mut angles = Array1::<F>::zeros(proj.nrows());
    Zip::from(&mut angles)
        .and(proj.rows())
        .par_for_each(|phi, p| *phi = Float::atan2(p[1], p[0]));
    let angles = angles.to_vec();

    let min_phi = percentile(&angles, params.alpha)
        .ok_or(StainError::InsufficientTissue { found: 0, required })?;
    let max_phi = percentile(&angles, 100.0 - params.alpha)
        .ok_or(StainError::InsufficientTissue { found: 0, required })?;

    let v1 = basis.dot(&array![Float::cos(min_phi), Float::sin(min_phi)]);
    let v2 = basis.dot(&array![Float::cos(max_phi), Float::sin(max_phi)]);

    // Hematoxylin has the larger red optical density
    let (h, e) = if v1[0] > v2[0] { (v1, v2) } else { (v2, v1) };
    let mut stains = Array2::<F>::zeros((2, 3));
    stains.row_mut(0).assign(&h);
    stains.row_mut(1).assign(&e);

    log::debug!(
        "macenko: {} tissue pixels, angle range [{:.4}, {:.4}]",
        keep.len(),
        min_phi.to_f64_lossy(),
        max_phi.to_f64_lossy()
    );
    normalize_rows(stains.view())
}

/// Basis for a single-colour input: the mean OD direction plus an orthogonal
/// unit vector, so both extreme angles collapse onto the observed colour.
fn mean_direction_basis<F: StainFloat>(tissue: ArrayView2<F>) -> Result<Array2<F>> {
    let mean = tissue
        .mean_axis(Axis(0))
        .ok_or(StainError::InsufficientTissue { found: 0, required: 2 })?;
    let norm = Float::sqrt(mean.dot(&mean));
    if !(norm > F::zero()) {
        return Err(StainError::Domain("mean optical density is zero".into()));
    }
    let u = mean.mapv(|v| v / norm);
    // any vector not parallel to u; OD means are non-negative so e_z - u_z·u works
    let mut w = array![F::zero(), F::zero(), F::one()] - &u.mapv(|v| v * u[2]);
    let mut wn = Float::sqrt(w.dot(&w));
    if !(wn > F::lit(1e-6)) {
        w = array![F::one(), F::zero(), F::zero()] - &u.mapv(|v| v * u[0]);
        wn = Float::sqrt(w.dot(&w));
    }
    w.mapv_inplace(|v| v / wn);
    if w[0] < F::zero() {
        w.mapv_inplace(|v| -v);
    }
    let mut basis = Array2::<F>::zeros((3, 2));
    basis.column_mut(0).assign(&u);
    basis.column_mut(1).assign(&w);
    Ok(basis)
}

/// Compute the Macenko stain matrix directly from an 8-bit RGB image.
pub fn rgb_separate_stains_macenko<F: StainFloat>(
    im_rgb: ArrayView3<u8>,
    params: &MacenkoParams,
) -> Result<Array2<F>> {
    validate_image(&im_rgb)?;
    let od = rgb_to_od::<F, _>(pixel_matrix(im_rgb)?.view());
    separate_stains_macenko(od.view(), params)
}
