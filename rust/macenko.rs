use crate::concentration::{get_concentrations, reconstruct_rgb, SolverParams};
use crate::color_conversion::rgb_to_od;
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::normalizer::{prepare, Fit, Method, Normalizer, SeparateStains, Transform};
use crate::separate_stains_macenko::{separate_stains_macenko, MacenkoParams};
use crate::utils::{percentile, pixel_matrix};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use num_traits::Float;

/// Percentile used to equalize stain intensities between source and target.
const MAX_CONCENTRATION_PERCENTILE: f64 = 99.0;

#[derive(Debug, Clone)]
struct MacenkoFit<F> {
    stain_matrix: Array2<F>,
    concentrations: Array2<F>,
    max_concentrations: [F; 2],
}

/// Macenko stain normalizer.
///
/// Source concentrations are rescaled so their 99th percentile per stain
/// matches the target before reconstruction with the target stain matrix.
#[derive(Debug, Clone)]
pub struct MacenkoNormalizer<F: StainFloat = f64> {
    params: MacenkoParams,
    solver: SolverParams,
    fitted: Option<MacenkoFit<F>>,
}

impl<F: StainFloat> Default for MacenkoNormalizer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StainFloat> MacenkoNormalizer<F> {
    pub fn new() -> Self {
        Self::with_params(MacenkoParams::default(), SolverParams::default())
    }

    pub fn with_params(params: MacenkoParams, solver: SolverParams) -> Self {
        Self {
            params,
            solver,
            fitted: None,
        }
    }

    /// Concentrations of the fitted target image (P×2).
    pub fn target_concentrations(&self) -> Option<ArrayView2<'_, F>> {
        self.fitted.as_ref().map(|f| f.concentrations.view())
    }

    /// Standardize `im` and return its OD pixels, stain matrix and concentrations.
    fn decompose(&self, im: ArrayView3<u8>) -> Result<(Array2<F>, Array2<F>, usize, usize)> {
        let (im, h, w) = prepare(im)?;
        let od = rgb_to_od::<F, _>(pixel_matrix(im.view())?.view());
        let stains = separate_stains_macenko(od.view(), &self.params)?;
        let concentrations = get_concentrations(od.view(), stains.view(), &self.solver)?;
        Ok((stains, concentrations, h, w))
    }
}

fn max_concentrations<F: StainFloat>(c: &Array2<F>) -> Result<[F; 2]> {
    let mut out = [F::zero(); 2];
    for (j, col) in c.axis_iter(Axis(1)).enumerate() {
        out[j] = percentile(&col.to_vec(), MAX_CONCENTRATION_PERCENTILE)
            .ok_or_else(|| StainError::Shape("empty concentration map".into()))?;
    }
    Ok(out)
}

impl<F: StainFloat> Fit for MacenkoNormalizer<F> {
    fn fit(&mut self, target: ArrayView3<u8>) -> Result<()> {
        let (stain_matrix, concentrations, _, _) = self.decompose(target)?;
        let max_concentrations = max_concentrations(&concentrations)?;
        log::debug!(
            "macenko fit: stain matrix {:?}, max concentrations {:?}",
            stain_matrix.as_slice(),
            max_concentrations.map(|v| v.to_f64_lossy())
        );
        self.fitted = Some(MacenkoFit {
            stain_matrix,
            concentrations,
            max_concentrations,
        });
        Ok(())
    }
}

impl<F: StainFloat> Transform for MacenkoNormalizer<F> {
    fn transform(&self, source: ArrayView3<u8>) -> Result<Array3<u8>> {
        let fit = self.fitted.as_ref().ok_or(StainError::NotFitted)?;
        let (_, mut c, h, w) = self.decompose(source)?;
        let source_max = max_concentrations(&c)?;
        for (j, mut col) in c.axis_iter_mut(Axis(1)).enumerate() {
            let scale = fit.max_concentrations[j] / Float::max(source_max[j], F::epsilon());
            col.mapv_inplace(|v| v * scale);
        }
        reconstruct_rgb(c.view(), fit.stain_matrix.view(), h, w)
    }
}

impl<F: StainFloat> SeparateStains for MacenkoNormalizer<F> {
    type Float = F;

    fn stain_matrix(&self) -> Option<ArrayView2<'_, F>> {
        self.fitted.as_ref().map(|f| f.stain_matrix.view())
    }

    fn hematoxylin(&self, source: ArrayView3<u8>) -> Result<Array2<F>> {
        if self.fitted.is_none() {
            return Err(StainError::NotFitted);
        }
        let (_, c, h, w) = self.decompose(source)?;
        Ok(c.column(0)
            .mapv(|v| Float::exp(-v))
            .into_shape_with_order((h, w))?)
    }
}

impl<F: StainFloat> Normalizer for MacenkoNormalizer<F> {
    fn method(&self) -> Method {
        Method::Macenko
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{synthetic_he, synthetic_he_with_density};

    fn mean_abs_diff(a: &Array3<u8>, b: &Array3<u8>) -> f64 {
        let total: f64 = a
            .iter()
            .zip(b.iter())
            .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
            .sum();
        total / a.len() as f64
    }

    #[test]
    fn test_transform_before_fit() {
        let n = MacenkoNormalizer::<f64>::new();
        let im = synthetic_he(8, 8);
        assert!(matches!(n.transform(im.view()), Err(StainError::NotFitted)));
        assert!(matches!(n.hematoxylin(im.view()), Err(StainError::NotFitted)));
        assert!(matches!(n.target_stains(), Err(StainError::NotFitted)));
    }

    #[test]
    fn test_transform_target_is_near_identity() {
        let target = synthetic_he(40, 40);
        let mut n = MacenkoNormalizer::<f64>::new();
        n.fit(target.view()).unwrap();
        let out = n.transform(target.view()).unwrap();
        assert_eq!(out.dim(), target.dim());
        let diff = mean_abs_diff(&out, &target);
        assert!(diff < 6.0, "mean abs diff {diff}");
    }

    #[test]
    fn test_transform_matches_target_intensity() {
        let target = synthetic_he_with_density(40, 40, 1.0);
        let faint = synthetic_he_with_density(40, 40, 0.5);
        let mut n = MacenkoNormalizer::<f64>::new();
        n.fit(target.view()).unwrap();
        let out = n.transform(faint.view()).unwrap();
        let before = mean_abs_diff(&faint, &target);
        let after = mean_abs_diff(&out, &target);
        assert!(after < before, "before {before}, after {after}");
    }

    #[test]
    fn test_hematoxylin_shape_and_range() {
        let im = synthetic_he(24, 36);
        let mut n = MacenkoNormalizer::<f64>::new();
        n.fit(im.view()).unwrap();
        let hem = n.hematoxylin(im.view()).unwrap();
        assert_eq!(hem.dim(), (24, 36));
        assert!(hem.iter().all(|v| *v > 0.0 && *v <= 1.0));
    }

    #[test]
    fn test_failed_fit_keeps_previous_state() {
        let mut n = MacenkoNormalizer::<f64>::new();
        n.fit(synthetic_he(24, 24).view()).unwrap();
        let before = n.stain_matrix().unwrap().to_owned();
        let white = Array3::<u8>::from_elem((10, 10, 3), 255);
        assert!(matches!(
            n.fit(white.view()),
            Err(StainError::InsufficientTissue { .. })
        ));
        assert_eq!(n.stain_matrix().unwrap(), before);
    }

    #[test]
    fn test_f32_precision() {
        let im = synthetic_he(24, 24);
        let mut n = MacenkoNormalizer::<f32>::new();
        n.fit(im.view()).unwrap();
        let out = n.transform(im.view()).unwrap();
        assert_eq!(out.dim(), im.dim());
    }
}
