//! Thresholding utilities for candidate extraction and bit decoding.

use marker_ranger_core::GrayImageView;

/// Compute Otsu threshold from a set of sample intensities.
pub(crate) fn otsu_threshold_from_samples(samples: &[u8]) -> u8 {
    if samples.is_empty() {
        return 127;
    }

    let (min_v, max_v) = samples
        .iter()
        .fold((255u8, 0u8), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if min_v == max_v {
        return min_v;
    }

    let mut hist = [0u32; 256];
    for &v in samples {
        hist[v as usize] += 1;
    }
    if hist.iter().filter(|&&h| h > 0).count() <= 2 {
        return ((min_v as u16 + max_v as u16) / 2) as u8;
    }

    let total = samples.len() as f64;
    let sum_total: f64 = hist
        .iter()
        .enumerate()
        .map(|(i, &h)| i as f64 * h as f64)
        .sum();

    let mut sum_b = 0f64;
    let mut w_b = 0f64;
    let mut best_var = -1f64;
    let mut best_t = 127u8;

    for (t, &h) in hist.iter().enumerate() {
        w_b += h as f64;
        if w_b < 1.0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f < 1.0 {
            break;
        }

        sum_b += (t as f64) * (h as f64);
        let m_b = sum_b / w_b;
        let m_f = (sum_total - sum_b) / w_f;

        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = t as u8;
        }
    }

    best_t
}

/// Which side of the local mean a mask selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Polarity {
    Dark,
    Bright,
}

/// Mean-based adaptive threshold.
///
/// With [`Polarity::Dark`] a pixel is set when its value is at most
/// `local_mean - constant` (`THRESH_BINARY_INV` with `ADAPTIVE_THRESH_MEAN_C`);
/// [`Polarity::Bright`] selects pixels at least `local_mean + constant`.
/// The mean is taken over a `window × window` box clamped to the frame.
pub(crate) fn adaptive_mask(
    img: &GrayImageView<'_>,
    window: usize,
    constant: f64,
    polarity: Polarity,
) -> Vec<bool> {
    let (w, h) = (img.width, img.height);
    let mut mask = vec![false; w * h];
    if w == 0 || h == 0 {
        return mask;
    }

    // integral image with a zero row/column: (w+1) x (h+1)
    let stride = w + 1;
    let mut integral = vec![0u64; stride * (h + 1)];
    for y in 0..h {
        let mut row_sum = 0u64;
        for x in 0..w {
            row_sum += img.data[y * w + x] as u64;
            integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
        }
    }

    let half = (window.max(3) | 1) / 2;
    for y in 0..h {
        let y0 = y.saturating_sub(half);
        let y1 = (y + half + 1).min(h);
        for x in 0..w {
            let x0 = x.saturating_sub(half);
            let x1 = (x + half + 1).min(w);
            let sum = integral[y1 * stride + x1] + integral[y0 * stride + x0]
                - integral[y0 * stride + x1]
                - integral[y1 * stride + x0];
            let area = ((y1 - y0) * (x1 - x0)) as f64;
            let mean = sum as f64 / area;
            let v = img.data[y * w + x] as f64;
            mask[y * w + x] = match polarity {
                Polarity::Dark => v <= mean - constant,
                Polarity::Bright => v >= mean + constant,
            };
        }
    }

    mask
}
