use crate::color_conversion::rgb_to_od;
use crate::concentration::{get_concentrations, reconstruct_rgb, SolverParams};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::normalizer::{prepare, Fit, Method, Normalizer, SeparateStains, Transform};
use crate::separate_stains_vahadane::{separate_stains_vahadane, VahadaneParams};
use crate::utils::pixel_matrix;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use num_traits::Float;

/// Vahadane (sparse non-negative factorization) stain normalizer.
///
/// Only the target stain matrix is kept; source concentrations are
/// reconstructed with it directly, without intensity rescaling.
#[derive(Debug, Clone)]
pub struct VahadaneNormalizer<F: StainFloat = f64> {
    params: VahadaneParams,
    solver: SolverParams,
    stain_matrix_target: Option<Array2<F>>,
}

impl<F: StainFloat> Default for VahadaneNormalizer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StainFloat> VahadaneNormalizer<F> {
    pub fn new() -> Self {
        Self::with_params(VahadaneParams::default(), SolverParams::default())
    }

    pub fn with_params(params: VahadaneParams, solver: SolverParams) -> Self {
        Self {
            params,
            solver,
            stain_matrix_target: None,
        }
    }

    fn source_concentrations(&self, im: ArrayView3<u8>) -> Result<(Array2<F>, usize, usize)> {
        let (im, h, w) = prepare(im)?;
        let stains = separate_stains_vahadane::<F>(im.view(), &self.params)?;
        let od = rgb_to_od::<F, _>(pixel_matrix(im.view())?.view());
        let c = get_concentrations(od.view(), stains.view(), &self.solver)?;
        Ok((c, h, w))
    }
}

impl<F: StainFloat> Fit for VahadaneNormalizer<F> {
    fn fit(&mut self, target: ArrayView3<u8>) -> Result<()> {
        let (im, _, _) = prepare(target)?;
        let stains = separate_stains_vahadane::<F>(im.view(), &self.params)?;
        log::debug!("vahadane fit: stain matrix {:?}", stains.as_slice());
        self.stain_matrix_target = Some(stains);
        Ok(())
    }
}

impl<F: StainFloat> Transform for VahadaneNormalizer<F> {
    fn transform(&self, source: ArrayView3<u8>) -> Result<Array3<u8>> {
        let target = self.stain_matrix_target.as_ref().ok_or(StainError::NotFitted)?;
        let (c, h, w) = self.source_concentrations(source)?;
        reconstruct_rgb(c.view(), target.view(), h, w)
    }
}

impl<F: StainFloat> SeparateStains for VahadaneNormalizer<F> {
    type Float = F;

    fn stain_matrix(&self) -> Option<ArrayView2<'_, F>> {
        self.stain_matrix_target.as_ref().map(|s| s.view())
    }

    fn hematoxylin(&self, source: ArrayView3<u8>) -> Result<Array2<F>> {
        if self.stain_matrix_target.is_none() {
            return Err(StainError::NotFitted);
        }
        let (c, h, w) = self.source_concentrations(source)?;
        Ok(c.column(0)
            .mapv(|v| Float::exp(-v))
            .into_shape_with_order((h, w))?)
    }
}

impl<F: StainFloat> Normalizer for VahadaneNormalizer<F> {
    fn method(&self) -> Method {
        Method::Vahadane
    }
}
