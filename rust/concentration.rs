//! Stain concentration estimation.
//!
//! Given optical densities `X` (P×3) and a stain matrix `S` (2×3, rows =
//! stain vectors), every pixel is solved independently for
//!
//! ```text
//! min_c  ½‖x − Sᵀc‖² + λ‖c‖₁   subject to c ≥ 0
//! ```
//!
//! Only the Gram matrix `G = S·Sᵀ` and the projection `q = S·x` enter the
//! per-pixel problem, so each solve is a two-variable non-negative LASSO.

use crate::color_conversion::intensity_to_u8;
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::linalg::max_eigenvalue_2x2;
use ndarray::{Array2, Array3, ArrayView2, Zip};
use num_traits::Float;
use std::fmt;
use std::str::FromStr;

/// Default L1 weight on the concentrations.
pub const DEFAULT_REGULARIZER: f64 = 0.01;

/// Which optimizer backs [`get_concentrations`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverMethod {
    /// Iterative shrinkage-thresholding.
    #[default]
    Ista,
    /// Cyclic coordinate descent with exact coordinate updates.
    CoordinateDescent,
}

impl FromStr for SolverMethod {
    type Err = StainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ista" => Ok(SolverMethod::Ista),
            "cd" | "coord_descent" | "coordinate-descent" | "coordinate_descent" => {
                Ok(SolverMethod::CoordinateDescent)
            }
            other => Err(StainError::Domain(format!("unknown solver method '{other}'"))),
        }
    }
}

impl fmt::Display for SolverMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverMethod::Ista => f.write_str("ista"),
            SolverMethod::CoordinateDescent => f.write_str("coordinate-descent"),
        }
    }
}

/// Configuration of the concentration solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverParams {
    /// L1 weight λ.
    pub regularizer: f64,
    /// Iteration budget per pixel.
    pub max_iter: usize,
    /// Stop once no coordinate moves by more than this.
    pub tol: f64,
    pub method: SolverMethod,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            regularizer: DEFAULT_REGULARIZER,
            max_iter: 1000,
            tol: 1e-6,
            method: SolverMethod::Ista,
        }
    }
}

/// Quantities shared by every pixel of one solve.
#[derive(Debug, Clone, Copy)]
pub struct Gram<F> {
    pub g: [[F; 2]; 2],
    /// Lipschitz constant of the smooth part, the largest eigenvalue of `G`.
    pub lipschitz: F,
}

impl<F: StainFloat> Gram<F> {
    pub fn new(stain: ArrayView2<F>) -> Self {
        let g = stain.dot(&stain.t());
        Self {
            g: [[g[[0, 0]], g[[0, 1]]], [g[[1, 0]], g[[1, 1]]]],
            lipschitz: max_eigenvalue_2x2(g.view()),
        }
    }

    #[inline]
    fn gradient(&self, q: [F; 2], c: [F; 2]) -> [F; 2] {
        [
            self.g[0][0] * c[0] + self.g[0][1] * c[1] - q[0],
            self.g[1][0] * c[0] + self.g[1][1] * c[1] - q[1],
        ]
    }
}

/// Objective of one pixel up to the constant `½‖x‖²`.
pub fn pixel_objective<F: StainFloat>(gram: &Gram<F>, q: [F; 2], c: [F; 2], lambda: F) -> F {
    let half = F::lit(0.5);
    let gc = gram.gradient([F::zero(), F::zero()], c);
    half * (c[0] * gc[0] + c[1] * gc[1]) - (c[0] * q[0] + c[1] * q[1]) + lambda * (c[0] + c[1])
}

/// A non-negative LASSO solver for stain concentrations.
///
/// Implementations only define the per-pixel update; validation, the
/// parallel sweep over pixels, and divergence checks are shared.
pub trait ConcentrationSolver<F: StainFloat>: Send + Sync {
    fn lambda(&self) -> F;

    /// Solve one pixel starting from `init`. Must never increase the objective.
    fn solve_pixel(&self, gram: &Gram<F>, q: [F; 2], init: [F; 2]) -> [F; 2];

    /// Solve all pixels of `od` (P×3) against `stain` (2×3), starting from zero.
    fn solve(&self, od: ArrayView2<F>, stain: ArrayView2<F>) -> Result<Array2<F>> {
        let init = Array2::zeros((od.nrows(), 2));
        self.solve_from(od, stain, init)
    }

    /// Like [`ConcentrationSolver::solve`] but warm-started from `init` (P×2).
    fn solve_from(
        &self,
        od: ArrayView2<F>,
        stain: ArrayView2<F>,
        mut init: Array2<F>,
    ) -> Result<Array2<F>> {
        check_dims(od, stain)?;
        if init.dim() != (od.nrows(), 2) {
            return Err(StainError::Shape(format!(
                "initial concentrations {:?} do not match {} pixels",
                init.dim(),
                od.nrows()
            )));
        }
        let gram = Gram::new(stain);
        Zip::from(init.rows_mut())
            .and(od.rows())
            .par_for_each(|mut c, x| {
                let q = [stain.row(0).dot(&x), stain.row(1).dot(&x)];
                let start = [F::max(c[0], F::zero()), F::max(c[1], F::zero())];
                let out = self.solve_pixel(&gram, q, start);
                c[0] = out[0];
                c[1] = out[1];
            });
        if init.iter().any(|v| !Float::is_finite(*v)) {
            return Err(StainError::Optimization(
                "non-finite concentration encountered".into(),
            ));
        }
        Ok(init)
    }
}

/// `max(v, 0)` that lets NaN through, so divergence stays visible.
#[inline]
fn nonneg<F: StainFloat>(v: F) -> F {
    if v < F::zero() {
        F::zero()
    } else {
        v
    }
}

fn check_dims<F>(od: ArrayView2<F>, stain: ArrayView2<F>) -> Result<()> {
    if od.ncols() != 3 {
        return Err(StainError::Shape(format!(
            "optical density must be P×3, got {:?}",
            od.dim()
        )));
    }
    if stain.dim() != (2, 3) {
        return Err(StainError::Shape(format!(
            "stain matrix must be 2×3, got {:?}",
            stain.dim()
        )));
    }
    Ok(())
}

/// Iterative shrinkage-thresholding with a fixed step `1/L`.
#[derive(Debug, Clone, Copy)]
pub struct Ista<F> {
    pub lambda: F,
    pub max_iter: usize,
    pub tol: F,
}

impl<F: StainFloat> Ista<F> {
    pub fn new(params: &SolverParams) -> Self {
        Self {
            lambda: F::lit(params.regularizer),
            max_iter: params.max_iter,
            tol: F::lit(params.tol),
        }
    }
}

impl<F: StainFloat> ConcentrationSolver<F> for Ista<F> {
    fn lambda(&self) -> F {
        self.lambda
    }

    fn solve_pixel(&self, gram: &Gram<F>, q: [F; 2], init: [F; 2]) -> [F; 2] {
        if !(gram.lipschitz > F::zero()) {
            return [F::zero(), F::zero()];
        }
        let step = F::one() / gram.lipschitz;
        let shrink = self.lambda * step;
        let mut c = init;
        for _ in 0..self.max_iter {
            let grad = gram.gradient(q, c);
            let next = [
                nonneg(c[0] - step * grad[0] - shrink),
                nonneg(c[1] - step * grad[1] - shrink),
            ];
            let delta = F::max(Float::abs(next[0] - c[0]), Float::abs(next[1] - c[1]));
            c = next;
            if !(delta >= self.tol) {
                break;
            }
        }
        c
    }
}

/// Cyclic coordinate descent; each coordinate update is the exact minimizer.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateDescent<F> {
    pub lambda: F,
    pub max_iter: usize,
    pub tol: F,
}

impl<F: StainFloat> CoordinateDescent<F> {
    pub fn new(params: &SolverParams) -> Self {
        Self {
            lambda: F::lit(params.regularizer),
            max_iter: params.max_iter,
            tol: F::lit(params.tol),
        }
    }
}

impl<F: StainFloat> ConcentrationSolver<F> for CoordinateDescent<F> {
    fn lambda(&self) -> F {
        self.lambda
    }

    fn solve_pixel(&self, gram: &Gram<F>, q: [F; 2], init: [F; 2]) -> [F; 2] {
        let g = &gram.g;
        let mut c = init;
        for _ in 0..self.max_iter {
            let prev = c;
            c[0] = if g[0][0] > F::zero() {
                nonneg((q[0] - g[0][1] * c[1] - self.lambda) / g[0][0])
            } else {
                F::zero()
            };
            c[1] = if g[1][1] > F::zero() {
                nonneg((q[1] - g[1][0] * c[0] - self.lambda) / g[1][1])
            } else {
                F::zero()
            };
            let delta = F::max(Float::abs(c[0] - prev[0]), Float::abs(c[1] - prev[1]));
            if !(delta >= self.tol) {
                break;
            }
        }
        c
    }
}

/// Build the solver selected by `params`.
pub fn solver<F: StainFloat>(params: &SolverParams) -> Box<dyn ConcentrationSolver<F>> {
    match params.method {
        SolverMethod::Ista => Box::new(Ista::new(params)),
        SolverMethod::CoordinateDescent => Box::new(CoordinateDescent::new(params)),
    }
}

/// Estimate the P×2 concentration map of `od` (P×3) for `stain` (2×3).
pub fn get_concentrations<F: StainFloat>(
    od: ArrayView2<F>,
    stain: ArrayView2<F>,
    params: &SolverParams,
) -> Result<Array2<F>> {
    solver::<F>(params).solve(od, stain)
}

/// Reconstruct an RGB image from concentrations and a stain matrix.
///
/// ```text
/// RGB = 255 · exp(−C·S)
/// ```
///
/// rounded and clamped to 8 bits, reshaped to `h`×`w`×3.
pub fn reconstruct_rgb<F: StainFloat>(
    concentrations: ArrayView2<F>,
    stain_matrix: ArrayView2<F>,
    h: usize,
    w: usize,
) -> Result<Array3<u8>> {
    if concentrations.dim() != (h * w, 2) {
        return Err(StainError::Shape(format!(
            "concentrations {:?} do not match a {h}×{w} image",
            concentrations.dim()
        )));
    }
    if stain_matrix.dim() != (2, 3) {
        return Err(StainError::Shape(format!(
            "stain matrix must be 2×3, got {:?}",
            stain_matrix.dim()
        )));
    }
    let bg = F::lit(255.0);
    let od = concentrations.dot(&stain_matrix);
    let rgb = od.mapv(|v| intensity_to_u8(bg * Float::exp(-v)));
    Ok(rgb.into_shape_with_order((h, w, 3))?)
}
