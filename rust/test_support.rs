//! Synthetic H&E tiles with known stain vectors, for unit tests.

use ndarray::Array3;

/// Optical-density direction of hematoxylin (not normalized).
pub const H_STAIN: [f64; 3] = [0.65, 0.70, 0.29];
/// Optical-density direction of eosin (not normalized).
pub const E_STAIN: [f64; 3] = [0.07, 0.99, 0.11];

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^ (x >> 31)
}

fn unit(seed: u64) -> f64 {
    (splitmix64(seed) >> 11) as f64 / (1u64 << 53) as f64
}

/// Mix of the two stains at a given overall `density`.
pub fn synthetic_he_with_density(h: usize, w: usize, density: f64) -> Array3<u8> {
    let norm = |v: [f64; 3]| {
        let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        v.map(|x| x / n)
    };
    let (hs, es) = (norm(H_STAIN), norm(E_STAIN));
    let mut im = Array3::<u8>::from_elem((h, w, 3), 255);
    for i in 0..h {
        for j in 0..w {
            let seed = (i * w + j) as u64 * 3;
            if unit(seed) < 0.3 {
                continue; // background
            }
            let t = unit(seed + 1);
            let d = density * (0.4 + 1.2 * unit(seed + 2));
            for c in 0..3 {
                let od = d * (t * hs[c] + (1.0 - t) * es[c]);
                im[[i, j, c]] = (255.0 * (-od).exp()).round() as u8;
            }
        }
    }
    im
}

/// Deterministic H&E-like tile: 30% white background, the rest a random mix
/// of hematoxylin and eosin.
pub fn synthetic_he(h: usize, w: usize) -> Array3<u8> {
    synthetic_he_with_density(h, w, 1.0)
}
