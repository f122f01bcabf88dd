//! Stain color normalization for histopathology images.
//!
//! Three methods share one contract: [`Fit`] a normalizer on a target image,
//! then [`Transform`] any number of source images so their stain colours
//! match the target.
//!
//! - [`MacenkoNormalizer`]: eigen-basis stain estimation, concentration
//!   rescaling at the 99th percentile.
//! - [`VahadaneNormalizer`]: non-negative sparse dictionary learning.
//! - [`ReinhardNormalizer`]: LAB mean/std transfer.
//!
//! Images are `ndarray` views of shape H×W×3 with `u8` intensities.

pub mod color_conversion;
pub mod concentration;
pub mod dictionary_learning;
pub mod error;
pub mod float_trait;
pub mod linalg;
pub mod macenko;
pub mod normalizer;
pub mod reinhard;
pub mod separate_stains_macenko;
pub mod separate_stains_vahadane;
pub mod utils;
pub mod vahadane;

#[cfg(test)]
pub(crate) mod test_support;

pub use color_conversion::{notwhite_mask, od_to_rgb, rgb_to_od, standardize_brightness};
pub use concentration::{
    get_concentrations, reconstruct_rgb, ConcentrationSolver, CoordinateDescent, Ista,
    SolverMethod, SolverParams,
};
pub use dictionary_learning::DictionaryParams;
pub use error::StainError;
pub use float_trait::StainFloat;
pub use linalg::normalize_rows;
pub use macenko::MacenkoNormalizer;
pub use normalizer::{Fit, Method, Normalizer, SeparateStains, Transform};
pub use reinhard::ReinhardNormalizer;
pub use separate_stains_macenko::{
    rgb_separate_stains_macenko, separate_stains_macenko, MacenkoParams,
};
pub use separate_stains_vahadane::{separate_stains_vahadane, VahadaneParams};
pub use vahadane::VahadaneNormalizer;

#[cfg(feature = "python")]
mod python {
    use crate::concentration::{get_concentrations, SolverParams};
    use crate::error::StainError;
    use crate::normalizer::{Method, Normalizer};
    use crate::separate_stains_macenko::{rgb_separate_stains_macenko, MacenkoParams};
    use crate::separate_stains_vahadane::{separate_stains_vahadane, VahadaneParams};
    use crate::{color_conversion, utils};
    use numpy::{IntoPyArray, PyArray2, PyArray3, PyReadonlyArray2, PyReadonlyArray3};
    use pyo3::exceptions::{PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    impl From<StainError> for PyErr {
        fn from(e: StainError) -> Self {
            match e {
                StainError::NotFitted => PyRuntimeError::new_err(e.to_string()),
                other => PyValueError::new_err(other.to_string()),
            }
        }
    }

    // -----------------------------------------------------------------------
    // Macro to stamp out typed PyO3 function variants for each float precision.
    //
    // Each invocation generates:
    //   - py_rgb_to_od_{suffix}
    //   - py_od_to_rgb_{suffix}
    //   - py_macenko_stain_matrix_{suffix}
    //   - py_vahadane_stain_matrix_{suffix}
    //   - py_get_concentrations_{suffix}
    // -----------------------------------------------------------------------
    macro_rules! define_typed_pyfunctions {
        ($suffix:ident, $f:ty) => {
            ::paste::paste! {

            #[pyfunction]
            #[pyo3(signature = (im_rgb))]
            fn [<py_rgb_to_od_ $suffix>]<'py>(
                py: Python<'py>,
                im_rgb: PyReadonlyArray3<'py, u8>,
            ) -> PyResult<Bound<'py, PyArray3<$f>>> {
                let od = color_conversion::rgb_to_od::<$f, _>(im_rgb.as_array());
                Ok(od.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (od))]
            fn [<py_od_to_rgb_ $suffix>]<'py>(
                py: Python<'py>,
                od: PyReadonlyArray3<'py, $f>,
            ) -> PyResult<Bound<'py, PyArray3<u8>>> {
                let rgb = color_conversion::od_to_rgb(od.as_array())?;
                Ok(rgb.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_rgb, beta=None, alpha=None))]
            fn [<py_macenko_stain_matrix_ $suffix>]<'py>(
                py: Python<'py>,
                im_rgb: PyReadonlyArray3<'py, u8>,
                beta: Option<f64>,
                alpha: Option<f64>,
            ) -> PyResult<Bound<'py, PyArray2<$f>>> {
                let defaults = MacenkoParams::default();
                let params = MacenkoParams {
                    beta: beta.unwrap_or(defaults.beta),
                    alpha: alpha.unwrap_or(defaults.alpha),
                    ..defaults
                };
                let stains = rgb_separate_stains_macenko::<$f>(im_rgb.as_array(), &params)?;
                Ok(stains.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_rgb, threshold=None, lamda=None))]
            fn [<py_vahadane_stain_matrix_ $suffix>]<'py>(
                py: Python<'py>,
                im_rgb: PyReadonlyArray3<'py, u8>,
                threshold: Option<f64>,
                lamda: Option<f64>,
            ) -> PyResult<Bound<'py, PyArray2<$f>>> {
                let defaults = VahadaneParams::default();
                let params = VahadaneParams {
                    threshold: threshold.unwrap_or(defaults.threshold),
                    lambda: lamda.unwrap_or(defaults.lambda),
                    ..defaults
                };
                let arr = im_rgb.as_array();
                let stains = py.allow_threads(|| separate_stains_vahadane::<$f>(arr, &params))?;
                Ok(stains.into_pyarray(py))
            }

            #[pyfunction]
            #[pyo3(signature = (im_rgb, stain_matrix, regularizer=None, method=None))]
            fn [<py_get_concentrations_ $suffix>]<'py>(
                py: Python<'py>,
                im_rgb: PyReadonlyArray3<'py, u8>,
                stain_matrix: PyReadonlyArray2<'py, $f>,
                regularizer: Option<f64>,
                method: Option<&str>,
            ) -> PyResult<Bound<'py, PyArray2<$f>>> {
                let arr = im_rgb.as_array();
                color_conversion::validate_image(&arr)?;
                let mut params = SolverParams::default();
                if let Some(r) = regularizer {
                    params.regularizer = r;
                }
                if let Some(m) = method {
                    params.method = m.parse()?;
                }
                let od = color_conversion::rgb_to_od::<$f, _>(utils::pixel_matrix(arr)?.view());
                let c = get_concentrations(od.view(), stain_matrix.as_array(), &params)?;
                Ok(c.into_pyarray(py))
            }

            } // paste!
        };
    }

    // Stamp out the concrete f32 and f64 variants.
    define_typed_pyfunctions!(f32, f32);
    define_typed_pyfunctions!(f64, f64);

    #[pyfunction]
    #[pyo3(signature = (im_rgb))]
    fn py_standardize_brightness<'py>(
        py: Python<'py>,
        im_rgb: PyReadonlyArray3<'py, u8>,
    ) -> PyResult<Bound<'py, PyArray3<u8>>> {
        let arr = im_rgb.as_array();
        color_conversion::validate_image(&arr)?;
        Ok(color_conversion::standardize_brightness(arr).into_pyarray(py))
    }

    /// A normalizer selected by method name ("macenko", "reinhard", "vahadane").
    #[pyclass(name = "StainNormalizer")]
    struct PyStainNormalizer {
        inner: Box<dyn Normalizer>,
    }

    #[pymethods]
    impl PyStainNormalizer {
        #[new]
        #[pyo3(signature = (method="vahadane"))]
        fn new(method: &str) -> PyResult<Self> {
            let method: Method = method.parse()?;
            Ok(Self {
                inner: method.normalizer(),
            })
        }

        #[getter]
        fn method(&self) -> &'static str {
            self.inner.method().name()
        }

        fn fit(&mut self, py: Python<'_>, target: PyReadonlyArray3<'_, u8>) -> PyResult<()> {
            let arr = target.as_array();
            let inner = &mut self.inner;
            py.allow_threads(|| inner.fit(arr))?;
            Ok(())
        }

        fn transform<'py>(
            &self,
            py: Python<'py>,
            source: PyReadonlyArray3<'py, u8>,
        ) -> PyResult<Bound<'py, PyArray3<u8>>> {
            let arr = source.as_array();
            let inner = &self.inner;
            let out = py.allow_threads(|| inner.transform(arr))?;
            Ok(out.into_pyarray(py))
        }
    }

    // -----------------------------------------------------------------------
    // PyO3 module: register every typed variant.
    // -----------------------------------------------------------------------
    #[pymodule]
    fn _rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
        // f64
        m.add_function(wrap_pyfunction!(py_rgb_to_od_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_od_to_rgb_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_macenko_stain_matrix_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_vahadane_stain_matrix_f64, m)?)?;
        m.add_function(wrap_pyfunction!(py_get_concentrations_f64, m)?)?;
        // f32
        m.add_function(wrap_pyfunction!(py_rgb_to_od_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_od_to_rgb_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_macenko_stain_matrix_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_vahadane_stain_matrix_f32, m)?)?;
        m.add_function(wrap_pyfunction!(py_get_concentrations_f32, m)?)?;

        m.add_function(wrap_pyfunction!(py_standardize_brightness, m)?)?;
        m.add_class::<PyStainNormalizer>()?;
        Ok(())
    }
}
