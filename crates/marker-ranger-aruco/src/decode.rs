//! Bit reading for quad candidates.

use crate::threshold::otsu_threshold_from_samples;
use crate::{DetectorParams, Matcher};
use marker_ranger_core::{homography_from_4pt, sample_bilinear, GrayImageView, Homography};
use nalgebra::Point2;

/// Sub-samples per cell axis.
const SUBDIV: usize = 3;

/// Bits read from one quad, before dictionary lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct MarkerObservation {
    /// Inner bits, row-major, white = 1.
    pub code: u64,
    pub border_errors: u32,
    pub inverted: bool,
}

/// A quad whose bits matched a dictionary entry.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DecodedQuad {
    pub id: u32,
    pub hamming: u8,
    pub border_errors: u32,
    pub inverted: bool,
    /// Corners reordered so that index 0 is the marker's own top-left.
    pub corners: [Point2<f64>; 4],
}

/// Canonical sample layout for one marker geometry.
///
/// Coordinates live in a square of side `cells = bits + 2 * border`, with
/// cell `(cx, cy)` covering `[cx, cx + 1] × [cy, cy + 1]`.
pub(crate) struct CellSampler {
    bits: usize,
    border: usize,
    cells: usize,
    points: Vec<Point2<f64>>, // cell-major: SUBDIV² samples per cell
}

impl CellSampler {
    pub fn new(bits: usize, border: usize, margin: f64) -> Option<Self> {
        if bits == 0 || bits * bits > 64 {
            return None;
        }
        let cells = bits + 2 * border;
        let margin = margin.clamp(0.0, 0.45);
        let span = 1.0 - 2.0 * margin;

        let mut points = Vec::with_capacity(cells * cells * SUBDIV * SUBDIV);
        for cy in 0..cells {
            for cx in 0..cells {
                for sy in 0..SUBDIV {
                    for sx in 0..SUBDIV {
                        let fx = margin + span * (sx as f64 + 0.5) / SUBDIV as f64;
                        let fy = margin + span * (sy as f64 + 0.5) / SUBDIV as f64;
                        points.push(Point2::new(cx as f64 + fx, cy as f64 + fy));
                    }
                }
            }
        }

        Some(Self {
            bits,
            border,
            cells,
            points,
        })
    }

    fn canonical_corners(&self) -> [Point2<f64>; 4] {
        let s = self.cells as f64;
        [
            Point2::new(0.0, 0.0),
            Point2::new(s, 0.0),
            Point2::new(s, s),
            Point2::new(0.0, s),
        ]
    }

    /// Mean intensity per cell, row-major. `None` if a sample leaves the frame.
    fn cell_means(&self, img: &GrayImageView<'_>, h: &Homography) -> Option<Vec<u8>> {
        let per_cell = SUBDIV * SUBDIV;
        let (xmax, ymax) = (img.width as f64 - 1.0, img.height as f64 - 1.0);
        let mut means = Vec::with_capacity(self.cells * self.cells);

        for chunk in self.points.chunks(per_cell) {
            let mut acc = 0.0f32;
            for p in chunk {
                let q = h.apply(*p);
                if !(q.x >= 0.0 && q.y >= 0.0 && q.x <= xmax && q.y <= ymax) {
                    return None;
                }
                acc += sample_bilinear(img, q.x as f32, q.y as f32);
            }
            means.push((acc / per_cell as f32).round().clamp(0.0, 255.0) as u8);
        }
        Some(means)
    }

    /// Binarise cell means and read the inner code.
    fn read_bits(&self, means: &[u8], params: &DetectorParams, inverted_hint: bool) -> Option<MarkerObservation> {
        let n = means.len() as f64;
        let mean = means.iter().map(|&v| v as f64).sum::<f64>() / n;
        let var = means.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
        if var.sqrt() < params.min_otsu_std_dev {
            return None;
        }

        let thr = otsu_threshold_from_samples(means);
        let dark: Vec<bool> = means.iter().map(|&v| v <= thr).collect();

        let max_border_errors =
            (self.bits as f64 * self.bits as f64 * params.max_erroneous_bits_in_border_rate) as u32;

        let polarities: &[bool] = if params.detect_inverted_marker || inverted_hint {
            &[false, true]
        } else {
            &[false]
        };

        polarities
            .iter()
            .filter_map(|&inverted| {
                let border_errors = self.border_errors(&dark, inverted);
                (border_errors <= max_border_errors).then(|| MarkerObservation {
                    code: self.inner_code(&dark, inverted),
                    border_errors,
                    inverted,
                })
            })
            .min_by_key(|obs| obs.border_errors)
    }

    fn is_border(&self, cx: usize, cy: usize) -> bool {
        cx < self.border
            || cy < self.border
            || cx >= self.cells - self.border
            || cy >= self.cells - self.border
    }

    fn border_errors(&self, dark: &[bool], inverted: bool) -> u32 {
        let mut errors = 0;
        for cy in 0..self.cells {
            for cx in 0..self.cells {
                if self.is_border(cx, cy) && dark[cy * self.cells + cx] == inverted {
                    errors += 1;
                }
            }
        }
        errors
    }

    fn inner_code(&self, dark: &[bool], inverted: bool) -> u64 {
        let mut code = 0u64;
        for y in 0..self.bits {
            for x in 0..self.bits {
                let d = dark[(y + self.border) * self.cells + x + self.border];
                if d == inverted {
                    code |= 1u64 << (y * self.bits + x);
                }
            }
        }
        code
    }

    /// Read the bits inside `corners` (clockwise, any starting corner).
    pub fn observe(
        &self,
        img: &GrayImageView<'_>,
        corners: &[Point2<f64>; 4],
        params: &DetectorParams,
        inverted_hint: bool,
    ) -> Option<MarkerObservation> {
        let h = homography_from_4pt(&self.canonical_corners(), corners)?;
        let means = self.cell_means(img, &h)?;
        self.read_bits(&means, params, inverted_hint)
    }
}

/// Read, match and orient one candidate quad.
pub(crate) fn decode_quad(
    img: &GrayImageView<'_>,
    corners: &[Point2<f64>; 4],
    inverted_hint: bool,
    sampler: &CellSampler,
    matcher: &Matcher,
    params: &DetectorParams,
) -> Option<DecodedQuad> {
    let obs = sampler.observe(img, corners, params, inverted_hint)?;
    let m = matcher.match_code(obs.code)?;
    let r = m.rotation as usize;
    Some(DecodedQuad {
        id: m.id,
        hamming: m.hamming,
        border_errors: obs.border_errors,
        inverted: obs.inverted,
        corners: std::array::from_fn(|i| corners[(i + r) % 4]),
    })
}
