use cauchy::Scalar;
use lax::Lapack;
use num_traits::Float;

/// Supertrait combining all bounds needed by the stain-normalization pipeline.
///
/// Implemented for `f32` and `f64` only: these are the two types supported by
/// LAPACK (via `ndarray-linalg`) and by the NumPy ↔ Rust bridge.
pub trait StainFloat:
    Float + Scalar<Real = Self> + Lapack + PyElement + Send + Sync + 'static
{
    /// Lossless-enough conversion of a literal constant.
    fn lit(v: f64) -> Self;

    fn to_f64_lossy(self) -> f64;
}

impl StainFloat for f32 {
    #[inline]
    fn lit(v: f64) -> Self {
        v as f32
    }

    #[inline]
    fn to_f64_lossy(self) -> f64 {
        self as f64
    }
}

impl StainFloat for f64 {
    #[inline]
    fn lit(v: f64) -> Self {
        v
    }

    #[inline]
    fn to_f64_lossy(self) -> f64 {
        self
    }
}

/// NumPy element bound, only required when the Python bindings are built.
#[cfg(feature = "python")]
pub trait PyElement: numpy::Element {}
#[cfg(feature = "python")]
impl<T: numpy::Element> PyElement for T {}

#[cfg(not(feature = "python"))]
pub trait PyElement {}
#[cfg(not(feature = "python"))]
impl<T> PyElement for T {}
