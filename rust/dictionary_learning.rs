//! Non-negative sparse dictionary learning with two atoms.
//!
//! Factors optical-density pixels `X` (P×3) as `X ≈ A·D`, minimizing
//!
//! ```text
//! ½‖X − A·D‖²_F + λ‖A‖₁   with A ≥ 0, D ≥ 0, ‖d_j‖₂ ≤ 1
//! ```
//!
//! by alternating a sparse-coding step (ISTA on `A`, warm-started) and a
//! projected block-coordinate step on the rows of `D` driven by the
//! sufficient statistics `AᵀA` and `Xᵀ A`. Both steps never increase the
//! objective, and the initialization is computed from the data, so the
//! result is deterministic.

use crate::concentration::{ConcentrationSolver, Ista};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::linalg::squared_error;
use crate::utils::{percentile, select_rows};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use num_traits::Float;

const ATOMS: usize = 2;

/// Optimizer settings for [`learn_dictionary`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DictionaryParams {
    /// Outer alternation budget.
    pub max_iter: usize,
    /// Stop when the relative objective decrease falls below this.
    pub tol: f64,
    /// ISTA iterations per sparse-coding step.
    pub coding_iter: usize,
    /// Larger inputs are subsampled with a fixed stride to this many pixels.
    pub max_samples: usize,
}

impl Default for DictionaryParams {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tol: 1e-5,
            coding_iter: 50,
            max_samples: 100_000,
        }
    }
}

/// Learn a 2×3 non-negative dictionary (one atom per row) from `x` (P×3).
pub fn learn_dictionary<F: StainFloat>(
    x: ArrayView2<F>,
    lambda: f64,
    params: &DictionaryParams,
) -> Result<Array2<F>> {
    if x.ncols() != 3 || x.nrows() < ATOMS {
        return Err(StainError::Shape(format!(
            "dictionary learning needs at least {ATOMS} rows of 3 channels, got {:?}",
            x.dim()
        )));
    }
    let sampled;
    let x = if x.nrows() > params.max_samples.max(ATOMS) {
        let stride = x.nrows().div_ceil(params.max_samples.max(ATOMS));
        let idx: Vec<usize> = (0..x.nrows()).step_by(stride).collect();
        sampled = select_rows(x, &idx);
        sampled.view()
    } else {
        x.view()
    };

    let lam = F::lit(lambda);
    let coder = Ista {
        lambda: lam,
        max_iter: params.coding_iter,
        tol: F::lit(1e-8),
    };

    let mut dict = initial_dictionary(x)?;
    let mut codes = Array2::<F>::zeros((x.nrows(), ATOMS));
    let mut last = F::infinity();

    for iter in 0..params.max_iter {
        codes = coder.solve_from(x, dict.view(), codes)?;
        update_dictionary(&mut dict, x, codes.view());

        let obj = objective(x, codes.view(), dict.view(), lam);
        if !Float::is_finite(obj) {
            return Err(StainError::Optimization(format!(
                "dictionary objective diverged at iteration {iter}"
            )));
        }
        let rel = (last - obj) / Float::max(Float::abs(obj), F::epsilon());
        log::trace!("dictionary learning iter {iter}: objective {}", obj.to_f64_lossy());
        if Float::is_finite(last) && rel < F::lit(params.tol) {
            log::debug!("dictionary learning converged after {} iterations", iter + 1);
            break;
        }
        last = obj;
    }
    Ok(dict)
}

/// ½‖X − A·D‖² + λ‖A‖₁
pub fn objective<F: StainFloat>(
    x: ArrayView2<F>,
    codes: ArrayView2<F>,
    dict: ArrayView2<F>,
    lambda: F,
) -> F {
    let recon = codes.dot(&dict);
    F::lit(0.5) * squared_error(x, recon.view()) + lambda * codes.sum()
}

/// Seed atoms from the reddest and least red quartiles of the data.
fn initial_dictionary<F: StainFloat>(x: ArrayView2<F>) -> Result<Array2<F>> {
    let red_fraction: Vec<F> = x
        .axis_iter(Axis(0))
        .map(|px| {
            let total = px.sum();
            if total > F::zero() {
                px[0] / total
            } else {
                F::zero()
            }
        })
        .collect();
    let hi = percentile(&red_fraction, 75.0).unwrap_or_else(F::zero);
    let lo = percentile(&red_fraction, 25.0).unwrap_or_else(F::zero);

    let mut dict = Array2::<F>::zeros((ATOMS, 3));
    for (atom, select) in [(0usize, true), (1, false)] {
        let rows: Vec<usize> = red_fraction
            .iter()
            .enumerate()
            .filter(|(_, r)| if select { **r >= hi } else { **r <= lo })
            .map(|(i, _)| i)
            .collect();
        let rows = if rows.is_empty() {
            (0..x.nrows()).collect()
        } else {
            rows
        };
        let mean = select_rows(x, &rows)
            .mean_axis(Axis(0))
            .ok_or_else(|| StainError::Domain("empty dictionary seed".into()))?;
        dict.row_mut(atom).assign(&project_atom(mean));
    }
    Ok(dict)
}

/// Project onto `{d ≥ 0, ‖d‖₂ ≤ 1}`.
fn project_atom<F: StainFloat>(mut d: Array1<F>) -> Array1<F> {
    d.mapv_inplace(|v| F::max(v, F::zero()));
    let norm = Float::sqrt(d.dot(&d));
    if norm > F::one() {
        d.mapv_inplace(|v| v / norm);
    }
    d
}

/// One projected block-coordinate sweep over the atoms.
fn update_dictionary<F: StainFloat>(dict: &mut Array2<F>, x: ArrayView2<F>, codes: ArrayView2<F>) {
    let a = codes.t().dot(&codes);
    let b = x.t().dot(&codes);
    for j in 0..ATOMS {
        let ajj = a[[j, j]];
        if !(ajj > F::epsilon()) {
            // unused atom, keep it as is
            continue;
        }
        let mut residual = b.column(j).to_owned();
        for k in 0..ATOMS {
            residual.scaled_add(-a[[k, j]], &dict.row(k));
        }
        let candidate = project_atom(&dict.row(j) + &residual.mapv(|v| v / ajj));
        if candidate.iter().any(|v| *v > F::zero()) {
            dict.row_mut(j).assign(&candidate);
        }
    }
}
