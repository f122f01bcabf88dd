use crate::color_conversion::{notwhite_mask, rgb_to_od, validate_image};
use crate::dictionary_learning::{learn_dictionary, DictionaryParams};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::linalg::{normalize_rows, swap_rows};
use crate::utils::{pixel_matrix, select_rows};
use ndarray::{Array2, ArrayView3};

/// Parameters of the Vahadane estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VahadaneParams {
    /// Lightness threshold (LAB L* / 100) below which a pixel counts as tissue.
    pub threshold: f64,
    /// Sparsity weight of the dictionary-learning codes.
    pub lambda: f64,
    pub min_tissue_pixels: usize,
    pub dictionary: DictionaryParams,
}

impl Default for VahadaneParams {
    fn default() -> Self {
        Self {
            threshold: 0.8,
            lambda: 0.1,
            min_tissue_pixels: 10,
            dictionary: DictionaryParams::default(),
        }
    }
}

/// Compute the 2×3 non-negative stain matrix with the Vahadane method.
pub fn separate_stains_vahadane<F: StainFloat>(
    im_rgb: ArrayView3<u8>,
    params: &VahadaneParams,
) -> Result<Array2<F>> {
    validate_image(&im_rgb)?;
    let mask = notwhite_mask(im_rgb, params.threshold)?;
    let tissue: Vec<usize> = mask
        .iter()
        .enumerate()
        .filter(|(_, is_tissue)| **is_tissue)
        .map(|(i, _)| i)
        .collect();
    let required = params.min_tissue_pixels.max(2);
    if tissue.len() < required {
        return Err(StainError::InsufficientTissue {
            found: tissue.len(),
            required,
        });
    }

    let od = rgb_to_od::<F, _>(pixel_matrix(im_rgb)?.view());
    let od = select_rows(od.view(), &tissue);

    let mut dict = learn_dictionary(od.view(), params.lambda, &params.dictionary)?;
    // Hematoxylin first: it has the larger red optical density
    if dict[[0, 0]] < dict[[1, 0]] {
        swap_rows(&mut dict);
    }
    log::debug!("vahadane: {} tissue pixels, dictionary {:?}", tissue.len(), dict.dim());
    normalize_rows(dict.view())
}
