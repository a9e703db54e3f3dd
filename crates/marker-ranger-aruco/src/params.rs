use serde::{Deserialize, Serialize};

/// Tuning knobs for candidate extraction and bit decoding.
///
/// Names and defaults follow OpenCV's `DetectorParameters` so that configs
/// tuned there carry over.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Smallest adaptive-threshold window (pixels, forced odd, >= 3).
    pub adaptive_thresh_win_size_min: usize,
    /// Largest adaptive-threshold window.
    pub adaptive_thresh_win_size_max: usize,
    /// Window increment between threshold passes.
    pub adaptive_thresh_win_size_step: usize,
    /// Offset subtracted from the local mean.
    pub adaptive_thresh_constant: f64,
    /// Minimum candidate perimeter relative to the larger frame dimension.
    pub min_marker_perimeter_rate: f64,
    /// Maximum candidate perimeter relative to the larger frame dimension.
    pub max_marker_perimeter_rate: f64,
    /// Minimum quad fill of the blob's convex hull (rejects round blobs).
    pub min_quad_fill_ratio: f64,
    /// Minimum side length relative to the candidate perimeter.
    pub min_corner_distance_rate: f64,
    /// Minimum distance of any corner to the frame border (pixels).
    pub min_distance_to_border: f64,
    /// Candidates whose mean corner distance is below this rate times the
    /// smaller perimeter are merged (the larger one survives).
    pub min_marker_distance_rate: f64,
    /// Width of the black marker border in bits.
    pub marker_border_bits: usize,
    /// Fraction of each cell ignored at its edges when sampling.
    pub perspective_remove_ignored_margin_per_cell: f64,
    /// Candidates whose cell intensities vary less than this are dropped.
    pub min_otsu_std_dev: f64,
    /// Allowed fraction of wrong border bits, relative to the inner bit count.
    pub max_erroneous_bits_in_border_rate: f64,
    /// Fraction of the dictionary's correction capacity actually used.
    pub error_correction_rate: f64,
    /// Also try white-bordered (inverted) markers.
    pub detect_inverted_marker: bool,
}

impl Default for DetectorParams {
    fn default() -> Self {
        Self {
            adaptive_thresh_win_size_min: 3,
            adaptive_thresh_win_size_max: 23,
            adaptive_thresh_win_size_step: 10,
            adaptive_thresh_constant: 7.0,
            min_marker_perimeter_rate: 0.03,
            max_marker_perimeter_rate: 4.0,
            min_quad_fill_ratio: 0.85,
            min_corner_distance_rate: 0.05,
            min_distance_to_border: 3.0,
            min_marker_distance_rate: 0.05,
            marker_border_bits: 1,
            perspective_remove_ignored_margin_per_cell: 0.13,
            min_otsu_std_dev: 5.0,
            max_erroneous_bits_in_border_rate: 0.35,
            error_correction_rate: 0.6,
            detect_inverted_marker: false,
        }
    }
}

impl DetectorParams {
    /// Odd window sizes visited by the threshold passes.
    pub fn threshold_windows(&self) -> Vec<usize> {
        let min = self.adaptive_thresh_win_size_min.max(3);
        let max = self.adaptive_thresh_win_size_max.max(min);
        let step = self.adaptive_thresh_win_size_step.max(1);
        let mut out: Vec<usize> = (min..=max).step_by(step).map(|w| w | 1).collect();
        out.dedup();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_windows_match_opencv_passes() {
        assert_eq!(DetectorParams::default().threshold_windows(), vec![3, 13, 23]);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let p: DetectorParams =
            serde_json::from_str(r#"{"adaptive_thresh_constant": 5.0}"#).expect("parse");
        assert_eq!(p.adaptive_thresh_constant, 5.0);
        assert_eq!(p.marker_border_bits, 1);
    }
}
