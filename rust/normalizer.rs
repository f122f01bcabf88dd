//! Capability traits shared by the three normalizers, and selection by name.

use crate::color_conversion::{od_to_rgb, standardize_brightness, validate_image};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::macenko::MacenkoNormalizer;
use crate::reinhard::ReinhardNormalizer;
use crate::vahadane::VahadaneNormalizer;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};
use std::fmt;
use std::str::FromStr;

/// Learns reference statistics from a target image.
///
/// A successful call replaces any previously fitted state; a failed call
/// leaves it untouched.
pub trait Fit {
    fn fit(&mut self, target: ArrayView3<u8>) -> Result<()>;
}

/// Maps a source image onto the fitted target.
pub trait Transform {
    /// Returns an image with the same H×W×3 shape as `source`.
    fn transform(&self, source: ArrayView3<u8>) -> Result<Array3<u8>>;
}

/// Normalizers built on a 2×3 stain matrix (Macenko, Vahadane).
pub trait SeparateStains {
    type Float: StainFloat;

    /// The fitted target stain matrix, if any.
    fn stain_matrix(&self) -> Option<ArrayView2<'_, Self::Float>>;

    /// Hematoxylin intensity map `exp(-C_H)` of `source`, shaped H×W.
    fn hematoxylin(&self, source: ArrayView3<u8>) -> Result<Array2<Self::Float>>;

    /// The fitted stain vectors rendered as RGB colours (2×3).
    fn target_stains(&self) -> Result<Array2<u8>> {
        let stains = self.stain_matrix().ok_or(StainError::NotFitted)?;
        od_to_rgb(stains)
    }
}

/// A complete normalizer, usable behind a trait object.
pub trait Normalizer: Fit + Transform + Send + Sync {
    fn method(&self) -> Method;
}

/// The available normalization methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Macenko,
    Reinhard,
    Vahadane,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Macenko, Method::Reinhard, Method::Vahadane];

    /// A fresh, unfitted `f64` normalizer with default parameters.
    pub fn normalizer(self) -> Box<dyn Normalizer> {
        match self {
            Method::Macenko => Box::new(MacenkoNormalizer::<f64>::new()),
            Method::Reinhard => Box::new(ReinhardNormalizer::<f64>::new()),
            Method::Vahadane => Box::new(VahadaneNormalizer::<f64>::new()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Method::Macenko => "macenko",
            Method::Reinhard => "reinhard",
            Method::Vahadane => "vahadane",
        }
    }
}

impl FromStr for Method {
    type Err = StainError;

    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        Method::ALL
            .into_iter()
            .find(|m| m.name() == lower)
            .ok_or_else(|| StainError::Domain(format!("unsupported normalization method '{s}'")))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Validate and brightness-standardize an input image.
pub(crate) fn prepare(im: ArrayView3<u8>) -> Result<(Array3<u8>, usize, usize)> {
    let (h, w) = validate_image(&im)?;
    Ok((standardize_brightness(im), h, w))
}
