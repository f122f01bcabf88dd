use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Errors raised by the normalization engine.
#[derive(Debug, Error)]
pub enum StainError {
    /// Input is not an H×W×3 image, or matrix dimensions disagree.
    #[error("shape error: {0}")]
    Shape(String),

    /// `transform`/`hematoxylin` called before a successful `fit`.
    #[error("normalizer has not been fitted")]
    NotFitted,

    /// Negative optical density, or a stain vector with zero norm.
    #[error("domain error: {0}")]
    Domain(String),

    /// Too few foreground pixels to estimate a stain basis.
    #[error("insufficient tissue: {found} pixels passed the filter, {required} required")]
    InsufficientTissue { found: usize, required: usize },

    /// The concentration solver produced NaN or infinity.
    #[error("optimization diverged: {0}")]
    Optimization(String),

    #[error("linear algebra failure: {0}")]
    Linalg(#[from] LinalgError),
}

impl From<ndarray::ShapeError> for StainError {
    fn from(e: ndarray::ShapeError) -> Self {
        StainError::Shape(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StainError>;
