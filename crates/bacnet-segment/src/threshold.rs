//! Global thresholding for object crops.

use image::{GrayImage, Luma};

const LI_MAX_ITERATIONS: usize = 256;

/// Li's iterative minimum cross-entropy threshold.
///
/// Returns `None` for an empty sample set. A constant sample set returns
/// its value, so `pixel > threshold` selects nothing.
pub fn li_threshold(samples: &[u8]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }

    let mut hist = [0u64; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }

    let present: Vec<usize> = (0..256).filter(|&i| hist[i] > 0).collect();
    if present.len() == 1 {
        return Some(present[0] as f64);
    }
    // Stop once the estimate moves less than half the smallest intensity gap.
    let tolerance = present
        .windows(2)
        .map(|w| w[1] - w[0])
        .min()
        .unwrap_or(1) as f64
        / 2.0;

    let total = samples.len() as f64;
    let sum: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut t_next = sum / total;
    let mut t_curr = -2.0 * tolerance;
    let mut iterations = 0;

    while (t_next - t_curr).abs() > tolerance && iterations < LI_MAX_ITERATIONS {
        t_curr = t_next;
        // Foreground is `v > t_curr`, i.e. bins above floor(t_curr).
        let split = (t_curr.floor().max(-1.0) + 1.0) as usize;
        let (mut n_fore, mut s_fore) = (0f64, 0f64);
        for (i, &h) in hist.iter().enumerate().skip(split.min(256)) {
            n_fore += h as f64;
            s_fore += i as f64 * h as f64;
        }
        let n_back = total - n_fore;
        if n_fore == 0.0 || n_back == 0.0 {
            break;
        }
        let mean_fore = s_fore / n_fore;
        let mean_back = (sum - s_fore) / n_back;
        if mean_back == 0.0 {
            break;
        }
        t_next = (mean_back - mean_fore) / (mean_back.ln() - mean_fore.ln());
        iterations += 1;
    }

    Some(t_next)
}

/// `255` where `pixel > threshold`, `0` elsewhere.
pub fn binarize(image: &GrayImage, threshold: f64) -> GrayImage {
    let mut out = GrayImage::new(image.width(), image.height());
    for (x, y, p) in image.enumerate_pixels() {
        if p.0[0] as f64 > threshold {
            out.put_pixel(x, y, Luma([255]));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_constant_inputs() {
        assert_eq!(li_threshold(&[]), None);
        assert_eq!(li_threshold(&[42; 10]), Some(42.0));
    }

    #[test]
    fn bimodal_threshold_separates_modes() {
        let mut samples = vec![20u8; 300];
        samples.extend(std::iter::repeat_n(200u8, 100));
        samples.extend([18, 22, 25, 195, 205]);
        let t = li_threshold(&samples).unwrap();
        assert!(t > 25.0 && t < 195.0, "threshold {t}");
    }

    #[test]
    fn threshold_is_stable_under_sample_order() {
        let a: Vec<u8> = (0..=255).collect();
        let mut b = a.clone();
        b.reverse();
        assert_eq!(li_threshold(&a), li_threshold(&b));
    }

    #[test]
    fn binarize_marks_strictly_brighter_pixels() {
        let img = GrayImage::from_raw(3, 1, vec![10, 100, 101]).unwrap();
        let bin = binarize(&img, 100.0);
        assert_eq!(bin.as_raw(), &vec![0, 0, 255]);
    }
}
