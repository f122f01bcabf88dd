use crate::color_conversion::{lab_to_rgb, rgb_to_lab};
use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::normalizer::{prepare, Fit, Method, Normalizer, Transform};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use num_traits::Float;

/// Per-channel mean and standard deviation in LAB space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LabStats<F> {
    pub means: [F; 3],
    pub stds: [F; 3],
}

/// Mean and population standard deviation of each LAB channel of `lab` (P×3).
pub fn lab_stats<F: StainFloat>(lab: &Array2<F>) -> Result<LabStats<F>> {
    let mut means = [F::zero(); 3];
    let mut stds = [F::zero(); 3];
    for (ch, col) in lab.axis_iter(Axis(1)).enumerate() {
        means[ch] = col
            .mean()
            .ok_or_else(|| StainError::Shape("empty image".into()))?;
        stds[ch] = col.std(F::zero());
    }
    Ok(LabStats { means, stds })
}

/// Reinhard colour-transfer normalizer.
///
/// Matches the per-channel LAB mean and standard deviation of a source
/// image to those of the target.
#[derive(Debug, Clone)]
pub struct ReinhardNormalizer<F: StainFloat = f64> {
    target: Option<LabStats<F>>,
}

impl<F: StainFloat> Default for ReinhardNormalizer<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: StainFloat> ReinhardNormalizer<F> {
    pub fn new() -> Self {
        Self { target: None }
    }

    pub fn target_stats(&self) -> Option<&LabStats<F>> {
        self.target.as_ref()
    }
}

impl<F: StainFloat> Fit for ReinhardNormalizer<F> {
    fn fit(&mut self, target: ArrayView3<u8>) -> Result<()> {
        let (im, _, _) = prepare(target)?;
        let stats = lab_stats(&rgb_to_lab::<F>(im.view())?)?;
        log::debug!(
            "reinhard fit: means {:?}, stds {:?}",
            stats.means.map(|v| v.to_f64_lossy()),
            stats.stds.map(|v| v.to_f64_lossy())
        );
        self.target = Some(stats);
        Ok(())
    }
}

impl<F: StainFloat> Transform for ReinhardNormalizer<F> {
    fn transform(&self, source: ArrayView3<u8>) -> Result<Array3<u8>> {
        let target = self.target.as_ref().ok_or(StainError::NotFitted)?;
        let (im, h, w) = prepare(source)?;
        let mut lab = rgb_to_lab::<F>(im.view())?;
        let stats = lab_stats(&lab)?;

        for (ch, mut col) in lab.axis_iter_mut(Axis(1)).enumerate() {
            // a flat channel has no spread to rescale
            let src_std = if stats.stds[ch] > F::zero() {
                stats.stds[ch]
            } else {
                log::warn!("reinhard: source channel {ch} has zero variance");
                F::one()
            };
            let gain = target.stds[ch] / src_std;
            let (src_mean, dst_mean) = (stats.means[ch], target.means[ch]);
            col.mapv_inplace(|v| (v - src_mean) * gain + dst_mean);
        }
        if lab.iter().any(|v| !Float::is_finite(*v)) {
            return Err(StainError::Domain("non-finite LAB value after rescaling".into()));
        }
        lab_to_rgb(&lab, h, w)
    }
}

impl<F: StainFloat> Normalizer for ReinhardNormalizer<F> {
    fn method(&self) -> Method {
        Method::Reinhard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{synthetic_he, synthetic_he_with_density};

    fn max_abs_diff(a: &Array3<u8>, b: &Array3<u8>) -> i16 {
        a.iter()
            .zip(b.iter())
            .map(|(x, y)| (i16::from(*x) - i16::from(*y)).abs())
            .max()
            .unwrap_or(0)
    }

    #[test]
    fn test_transform_before_fit() {
        let n = ReinhardNormalizer::<f64>::new();
        let im = synthetic_he(8, 8);
        assert!(matches!(n.transform(im.view()), Err(StainError::NotFitted)));
    }

    #[test]
    fn test_uniform_gray_maps_to_itself() {
        let im = Array3::<u8>::from_elem((50, 50, 3), 200);
        let mut n = ReinhardNormalizer::<f64>::new();
        n.fit(im.view()).unwrap();
        let out = n.transform(im.view()).unwrap();
        assert!(max_abs_diff(&out, &im) <= 2);
    }

    #[test]
    fn test_transform_target_is_near_identity() {
        let im = synthetic_he(32, 32);
        let mut n = ReinhardNormalizer::<f64>::new();
        n.fit(im.view()).unwrap();
        let out = n.transform(im.view()).unwrap();
        assert!(max_abs_diff(&out, &im) <= 2);
    }

    #[test]
    fn test_transform_moves_statistics_to_target() {
        let target = synthetic_he_with_density(32, 32, 1.0);
        let source = synthetic_he_with_density(32, 32, 0.4);
        let mut n = ReinhardNormalizer::<f64>::new();
        n.fit(target.view()).unwrap();
        let out = n.transform(source.view()).unwrap();

        let lightness = |im: &Array3<u8>| lab_stats(&rgb_to_lab::<f64>(im.view()).unwrap()).unwrap().means[0];
        let (t, s, o) = (lightness(&target), lightness(&source), lightness(&out));
        assert!((o - t).abs() < (s - t).abs(), "target {t}, source {s}, out {o}");
    }
}
