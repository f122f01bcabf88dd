use ndarray::Array3;
use stain_norm::{
    Fit, MacenkoNormalizer, Method, ReinhardNormalizer, SeparateStains, StainError, Transform,
    VahadaneNormalizer,
};

const H_STAIN: [f64; 3] = [0.65, 0.70, 0.29];
const E_STAIN: [f64; 3] = [0.07, 0.99, 0.11];

fn hash(mut x: u64) -> f64 {
    x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    ((x ^ (x >> 31)) >> 11) as f64 / (1u64 << 53) as f64
}

/// H&E-like tile with a white background; `tint` shifts the eosin vector to
/// mimic a different lab's staining.
fn tile(h: usize, w: usize, seed: u64, tint: f64) -> Array3<u8> {
    let unit = |v: [f64; 3]| {
        let n = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        v.map(|x| x / n)
    };
    let hs = unit(H_STAIN);
    let es = unit([E_STAIN[0] + tint, E_STAIN[1], E_STAIN[2] + tint]);
    Array3::from_shape_fn((h, w, 3), |(i, j, c)| {
        let k = seed.wrapping_mul(1_000_003) + ((i * w + j) as u64) * 3;
        if hash(k) < 0.3 {
            return 255;
        }
        let t = hash(k + 1);
        let d = 0.4 + 1.2 * hash(k + 2);
        let od = d * (t * hs[c] + (1.0 - t) * es[c]);
        (255.0 * (-od).exp()).round() as u8
    })
}

fn mean_abs_diff(a: &Array3<u8>, b: &Array3<u8>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (f64::from(*x) - f64::from(*y)).abs())
        .sum::<f64>()
        / a.len() as f64
}

#[test]
fn scenario_a_uniform_gray_maps_to_itself() {
    let gray = Array3::<u8>::from_elem((50, 50, 3), 200);
    for method in [Method::Reinhard, Method::Macenko] {
        let mut n = method.normalizer();
        n.fit(gray.view()).unwrap();
        let out = n.transform(gray.view()).unwrap();
        let worst = out.iter().map(|v| (i16::from(*v) - 200).abs()).max().unwrap();
        assert!(worst <= 3, "{method}: off by {worst}");
    }
}

#[test]
fn scenario_b_transform_before_fit() {
    let im = tile(8, 8, 1, 0.0);
    for method in Method::ALL {
        let n = method.normalizer();
        assert!(
            matches!(n.transform(im.view()), Err(StainError::NotFitted)),
            "{method}"
        );
    }
}

#[test]
fn scenario_c_all_white_is_insufficient_tissue() {
    let white = Array3::<u8>::from_elem((10, 10, 3), 255);
    let mut macenko = MacenkoNormalizer::<f64>::new();
    assert!(matches!(
        macenko.fit(white.view()),
        Err(StainError::InsufficientTissue { .. })
    ));
    let mut vahadane = VahadaneNormalizer::<f64>::new();
    assert!(matches!(
        vahadane.fit(white.view()),
        Err(StainError::InsufficientTissue { .. })
    ));
}

#[test]
fn scenario_d_rgba_is_shape_error() {
    let rgba = Array3::<u8>::from_elem((10, 10, 4), 128);
    for method in Method::ALL {
        let mut n = method.normalizer();
        assert!(matches!(n.fit(rgba.view()), Err(StainError::Shape(_))), "{method}");
    }
    let mut n = ReinhardNormalizer::<f64>::new();
    n.fit(tile(16, 16, 2, 0.0).view()).unwrap();
    assert!(matches!(n.transform(rgba.view()), Err(StainError::Shape(_))));
}

#[test]
fn transform_of_target_is_near_identity() {
    let target = tile(40, 40, 3, 0.0);
    for method in Method::ALL {
        let mut n = method.normalizer();
        n.fit(target.view()).unwrap();
        let out = n.transform(target.view()).unwrap();
        let diff = mean_abs_diff(&out, &target);
        assert!(diff < 6.0, "{method}: mean abs diff {diff}");
    }
}

#[test]
fn shape_is_preserved() {
    let target = tile(32, 32, 4, 0.0);
    for method in Method::ALL {
        let mut n = method.normalizer();
        n.fit(target.view()).unwrap();
        for (h, w) in [(17, 23), (40, 12), (9, 31)] {
            let source = tile(h, w, 5, 0.1);
            let out = n.transform(source.view()).unwrap();
            assert_eq!(out.dim(), (h, w, 3), "{method}");
        }
    }
}

#[test]
fn normalization_pulls_source_towards_target() {
    let target = tile(40, 40, 6, 0.0);
    let source = tile(40, 40, 6, 0.25);
    // Reinhard shifts background pixels too, so only the stain-based methods are
    // expected to reduce the per-pixel error
    for method in [Method::Macenko, Method::Vahadane] {
        let mut n = method.normalizer();
        n.fit(target.view()).unwrap();
        let out = n.transform(source.view()).unwrap();
        let before = mean_abs_diff(&source, &target);
        let after = mean_abs_diff(&out, &target);
        assert!(after < before, "{method}: before {before}, after {after}");
    }
}

#[test]
fn repeated_runs_are_identical() {
    let target = tile(32, 32, 7, 0.0);
    let source = tile(24, 24, 8, 0.15);
    for method in Method::ALL {
        let run = || {
            let mut n = method.normalizer();
            n.fit(target.view()).unwrap();
            n.transform(source.view()).unwrap()
        };
        assert_eq!(run(), run(), "{method}");
    }
}

#[test]
fn stain_matrices_have_unit_rows() {
    let target = tile(40, 40, 9, 0.0);
    let mut macenko = MacenkoNormalizer::<f64>::new();
    macenko.fit(target.view()).unwrap();
    let mut vahadane = VahadaneNormalizer::<f64>::new();
    vahadane.fit(target.view()).unwrap();

    for s in [macenko.stain_matrix().unwrap(), vahadane.stain_matrix().unwrap()] {
        assert_eq!(s.dim(), (2, 3));
        for row in s.rows() {
            assert!((row.dot(&row).sqrt() - 1.0).abs() < 1e-6);
        }
    }
    assert!(vahadane.stain_matrix().unwrap().iter().all(|v| *v >= 0.0));
    assert!(macenko
        .target_concentrations()
        .unwrap()
        .iter()
        .all(|v| *v >= 0.0));
}

#[test]
fn fitted_normalizer_is_shared_across_threads() {
    let mut n = MacenkoNormalizer::<f64>::new();
    n.fit(tile(32, 32, 10, 0.0).view()).unwrap();
    let sources: Vec<_> = (0..4).map(|s| tile(20, 20, 11 + s, 0.1)).collect();
    let expected: Vec<_> = sources.iter().map(|s| n.transform(s.view()).unwrap()).collect();

    let n = &n;
    let results: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|s| scope.spawn(move || n.transform(s.view()).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(results, expected);
}
