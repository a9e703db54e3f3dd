//! Planar pose estimation for single square markers.
//!
//! The solve mirrors OpenCV's `estimatePoseSingleMarkers`: the four corners
//! are undistorted, a plane homography gives a closed-form seed, and a short
//! Levenberg–Marquardt run minimises the pixel reprojection error.

mod estimator;
mod planar;
mod refine;

pub use estimator::{
    marker_object_points, project_points, rotation_vector, solve_marker_pose, PoseEstimate,
    PoseEstimator,
};
pub use refine::PoseRefineParams;

/// Errors from a single-marker pose solve.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("marker size must be positive and finite, got {0}")]
    InvalidMarkerSize(f64),
    #[error("corners could not be undistorted")]
    Undistort,
    #[error("degenerate corner configuration")]
    DegenerateCorners,
}
