use crate::error::{Result, StainError};
use crate::float_trait::StainFloat;
use crate::utils::{percentile_u8, pixel_matrix};
use ndarray::{Array, Array2, Array3, ArrayView, ArrayView3, Dimension, Zip};
use num_traits::Float;

/// Floor applied to optical densities so fully transmitted light stays finite and positive.
pub const OD_EPSILON: f64 = 1e-6;

/// Maximum 8-bit intensity, i.e. the assumed background illumination.
const BG_INT: f64 = 255.0;

/// sRGB (D65) → XYZ, as used by the 8-bit LAB conversion.
const RGB_TO_XYZ: [[f64; 3]; 3] = [
    [0.412453, 0.357580, 0.180423],
    [0.212671, 0.715160, 0.072169],
    [0.019334, 0.119193, 0.950227],
];

const XYZ_TO_RGB: [[f64; 3]; 3] = [
    [3.240479, -1.537150, -0.498535],
    [-0.969256, 1.875991, 0.041556],
    [0.055648, -0.204043, 1.057311],
];

const WHITE_X: f64 = 0.950456;
const WHITE_Z: f64 = 1.088754;

/// Check that `im` is a non-empty H×W×3 image and return `(h, w)`.
pub fn validate_image<T>(im: &ArrayView3<T>) -> Result<(usize, usize)> {
    let (h, w, c) = im.dim();
    if c != 3 {
        return Err(StainError::Shape(format!(
            "image must have 3 channels, got {c}"
        )));
    }
    if h == 0 || w == 0 {
        return Err(StainError::Shape(format!("image is empty ({h}×{w})")));
    }
    Ok((h, w))
}

/// Convert RGB intensities to optical density, `max(-ln(I/255), ε)`.
///
/// Zero intensities are treated as 1 so the log stays finite. Works on any
/// array shape; the input is never modified.
pub fn rgb_to_od<F, D>(rgb: ArrayView<u8, D>) -> Array<F, D>
where
    F: StainFloat,
    D: Dimension,
{
    let bg = F::lit(BG_INT);
    let eps = F::lit(OD_EPSILON);
    let mut od = rgb.mapv(|v| F::lit(f64::from(v.max(1))));
    od.par_mapv_inplace(|v| F::max(-Float::ln(v / bg), eps));
    od
}

/// Convert optical density back to 8-bit RGB, `255·exp(-OD)` rounded and clamped.
///
/// Fails with [`StainError::Domain`] if any value is negative or not finite.
pub fn od_to_rgb<F, D>(od: ArrayView<F, D>) -> Result<Array<u8, D>>
where
    F: StainFloat,
    D: Dimension,
{
    if let Some(bad) = od.iter().find(|v| !(Float::is_finite(**v) && **v >= F::zero())) {
        return Err(StainError::Domain(format!(
            "optical density must be finite and non-negative, got {}",
            bad.to_f64_lossy()
        )));
    }
    Ok(od.mapv(|v| intensity_to_u8(F::lit(BG_INT) * Float::exp(-v))))
}

#[inline]
pub(crate) fn intensity_to_u8<F: StainFloat>(v: F) -> u8 {
    let v = Float::round(v).to_f64_lossy();
    v.clamp(0.0, 255.0) as u8
}

/// Rescale intensities so the 90th percentile maps to white.
///
/// Flat images (every sample equal) and images whose 90th percentile is
/// black are returned unchanged.
pub fn standardize_brightness(im: ArrayView3<u8>) -> Array3<u8> {
    let p = percentile_u8(im.iter().copied(), 90.0);
    let lowest = im.iter().copied().min();
    let flat = lowest == im.iter().copied().max();
    if p <= 0.0 || flat {
        log::debug!("brightness standardization skipped: p90={p}, flat={flat}");
        return im.to_owned();
    }
    let scale = BG_INT / p;
    im.mapv(|v| (f64::from(v) * scale).min(BG_INT) as u8)
}

/// Tissue mask: `true` where LAB lightness (scaled to [0, 1]) is below `thresh`.
pub fn notwhite_mask(im: ArrayView3<u8>, thresh: f64) -> Result<Array2<bool>> {
    let (h, w) = validate_image(&im)?;
    let mut mask = Array2::from_elem((h, w), false);
    Zip::from(&mut mask)
        .and(im.lanes(ndarray::Axis(2)))
        .par_for_each(|m, px| {
            let l = lightness([px[0], px[1], px[2]]);
            *m = l / 100.0 < thresh;
        });
    Ok(mask)
}

#[inline]
fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.0031308 {
        12.92 * c
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

#[inline]
fn lab_f(t: f64) -> f64 {
    if t > 0.008856 {
        t.cbrt()
    } else {
        7.787 * t + 16.0 / 116.0
    }
}

#[inline]
fn lab_f_inv(f: f64) -> f64 {
    if f > 0.206893 {
        f * f * f
    } else {
        (f - 16.0 / 116.0) / 7.787
    }
}

#[inline]
fn linear_rgb(px: [u8; 3]) -> [f64; 3] {
    px.map(|c| srgb_to_linear(f64::from(c) / 255.0))
}

#[inline]
fn lightness(px: [u8; 3]) -> f64 {
    let [r, g, b] = linear_rgb(px);
    let y = RGB_TO_XYZ[1][0] * r + RGB_TO_XYZ[1][1] * g + RGB_TO_XYZ[1][2] * b;
    if y > 0.008856 {
        116.0 * y.cbrt() - 16.0
    } else {
        903.3 * y
    }
}

/// Convert one 8-bit sRGB pixel to `[L*, a*, b*]`.
pub fn pixel_rgb_to_lab(px: [u8; 3]) -> [f64; 3] {
    let [r, g, b] = linear_rgb(px);
    let m = &RGB_TO_XYZ;
    let x = (m[0][0] * r + m[0][1] * g + m[0][2] * b) / WHITE_X;
    let y = m[1][0] * r + m[1][1] * g + m[1][2] * b;
    let z = (m[2][0] * r + m[2][1] * g + m[2][2] * b) / WHITE_Z;
    let l = if y > 0.008856 {
        116.0 * y.cbrt() - 16.0
    } else {
        903.3 * y
    };
    let (fx, fy, fz) = (lab_f(x), lab_f(y), lab_f(z));
    [l, 500.0 * (fx - fy), 200.0 * (fy - fz)]
}

/// Convert `[L*, a*, b*]` back to 8-bit sRGB.
///
/// L* is clipped to [0, 100] and a*, b* to [-128, 127], the range an 8-bit LAB
/// image can hold.
pub fn pixel_lab_to_rgb(lab: [f64; 3]) -> [u8; 3] {
    let l = lab[0].clamp(0.0, 100.0);
    let a = lab[1].clamp(-128.0, 127.0);
    let b = lab[2].clamp(-128.0, 127.0);

    let fy = (l + 16.0) / 116.0;
    let y = if l > 903.3 * 0.008856 {
        fy * fy * fy
    } else {
        l / 903.3
    };
    let x = lab_f_inv(fy + a / 500.0) * WHITE_X;
    let z = lab_f_inv(fy - b / 200.0) * WHITE_Z;

    let m = &XYZ_TO_RGB;
    let lin = [
        m[0][0] * x + m[0][1] * y + m[0][2] * z,
        m[1][0] * x + m[1][1] * y + m[1][2] * z,
        m[2][0] * x + m[2][1] * y + m[2][2] * z,
    ];
    lin.map(|c| (linear_to_srgb(c.clamp(0.0, 1.0)) * 255.0).round().clamp(0.0, 255.0) as u8)
}

/// Convert an RGB image to LAB, one row per pixel (P×3: L*, a*, b*).
pub fn rgb_to_lab<F: StainFloat>(im: ArrayView3<u8>) -> Result<Array2<F>> {
    validate_image(&im)?;
    let px = pixel_matrix(im)?;
    let mut lab = Array2::<F>::zeros(px.raw_dim());
    Zip::from(lab.rows_mut())
        .and(px.rows())
        .par_for_each(|mut out, src| {
            let v = pixel_rgb_to_lab([src[0], src[1], src[2]]);
            for ch in 0..3 {
                out[ch] = F::lit(v[ch]);
            }
        });
    Ok(lab)
}

/// Convert P×3 LAB rows back into an `h`×`w`×3 RGB image.
pub fn lab_to_rgb<F: StainFloat>(lab: &Array2<F>, h: usize, w: usize) -> Result<Array3<u8>> {
    if lab.dim() != (h * w, 3) {
        return Err(StainError::Shape(format!(
            "LAB matrix {:?} does not match a {h}×{w} image",
            lab.dim()
        )));
    }
    let mut rgb = Array2::<u8>::zeros((h * w, 3));
    Zip::from(rgb.rows_mut())
        .and(lab.rows())
        .par_for_each(|mut out, src| {
            let v = pixel_lab_to_rgb([
                src[0].to_f64_lossy(),
                src[1].to_f64_lossy(),
                src[2].to_f64_lossy(),
            ]);
            for ch in 0..3 {
                out[ch] = v[ch];
            }
        });
    Ok(rgb.into_shape_with_order((h, w, 3))?)
}
