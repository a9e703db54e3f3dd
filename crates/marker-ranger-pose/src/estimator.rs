use crate::planar::{seed_pose, RigidPose};
use crate::refine::{refine_pose, PoseRefineParams};
use crate::PoseError;
use marker_ranger_aruco::DetectedMarker;
use marker_ranger_core::CameraModel;
use nalgebra::{Matrix3, Point2, Point3, Rotation3, UnitQuaternion, Vector3};
use serde::Serialize;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Pose of one marker in the camera frame (x right, y down, z forward).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoseEstimate {
    pub marker_id: u32,
    /// Axis-angle (Rodrigues) rotation, marker frame to camera frame.
    pub rotation: Vector3<f64>,
    /// Marker centre in the camera frame, in the unit of the marker size.
    pub translation: Vector3<f64>,
    /// RMS corner reprojection error in pixels.
    pub reprojection_rms: f64,
}

impl PoseEstimate {
    #[inline]
    pub fn lateral(&self) -> f64 {
        self.translation.x
    }

    #[inline]
    pub fn vertical(&self) -> f64 {
        self.translation.y
    }

    #[inline]
    pub fn forward(&self) -> f64 {
        self.translation.z
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        Rotation3::from_scaled_axis(self.rotation).into_inner()
    }

    /// Map a point from marker coordinates into the camera frame.
    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(Rotation3::from_scaled_axis(self.rotation) * p.coords + self.translation)
    }
}

/// Marker corners in the marker's own frame, in detection order
/// (top-left, top-right, bottom-right, bottom-left; y up, z out of the marker).
pub fn marker_object_points(marker_size: f64) -> [Point3<f64>; 4] {
    let h = marker_size / 2.0;
    [
        Point3::new(-h, h, 0.0),
        Point3::new(h, h, 0.0),
        Point3::new(h, -h, 0.0),
        Point3::new(-h, -h, 0.0),
    ]
}

/// Project marker-frame points through `pose` and `camera`.
///
/// Points behind the camera come back as `None`.
pub fn project_points(
    points: &[Point3<f64>],
    pose: &PoseEstimate,
    camera: &CameraModel,
) -> Vec<Option<Point2<f64>>> {
    points
        .iter()
        .map(|p| camera.project(&pose.transform_point(p)))
        .collect()
}

/// Rodrigues vector of `rotation`, with angle in `[0, π]`.
///
/// Goes through the quaternion so that half turns keep their axis.
pub fn rotation_vector(rotation: &Rotation3<f64>) -> Vector3<f64> {
    UnitQuaternion::from_rotation_matrix(rotation).scaled_axis()
}

/// Pinhole guess used when the corners do not pin down a homography:
/// marker facing the camera, centred on the corner centroid, at the depth
/// implied by the mean side length. Zero-area corners give an infinite depth.
fn facing_guess(pixels: &[Point2<f64>; 4], marker_size: f64, camera: &CameraModel) -> RigidPose {
    let (cx, cy) = pixels
        .iter()
        .fold((0.0, 0.0), |(x, y), p| (x + p.x / 4.0, y + p.y / 4.0));
    let side_px = (0..4)
        .map(|i| (pixels[(i + 1) % 4] - pixels[i]).norm())
        .sum::<f64>()
        / 4.0;
    let z = camera.fx() * marker_size / side_px;
    RigidPose {
        rotation: Rotation3::from_axis_angle(&Vector3::x_axis(), std::f64::consts::PI),
        translation: Vector3::new(
            (cx - camera.cx()) / camera.fx() * z,
            (cy - camera.cy()) / camera.fy() * z,
            z,
        ),
    }
}

/// Solve the pose of a square marker from its four image corners.
///
/// Only an invalid marker size is an error. Corners that cannot seed the
/// planar solve (collinear, duplicated, outside the undistortion domain)
/// still produce an estimate, started from a fronto-parallel guess; its
/// values may be implausible or non-finite and `reprojection_rms` reflects
/// that.
pub fn solve_marker_pose(
    marker_id: u32,
    corners: &[Point2<f32>; 4],
    marker_size: f64,
    camera: &CameraModel,
    params: &PoseRefineParams,
) -> Result<PoseEstimate, PoseError> {
    if !(marker_size.is_finite() && marker_size > 0.0) {
        return Err(PoseError::InvalidMarkerSize(marker_size));
    }
    let object = marker_object_points(marker_size);
    let pixels = corners.map(|p| Point2::new(p.x as f64, p.y as f64));

    let seed = seed_pose(&object, &pixels, camera).unwrap_or_else(|err| {
        log::debug!("marker {marker_id}: {err}; seeding from a facing guess");
        facing_guess(&pixels, marker_size, camera)
    });
    let refined = refine_pose(seed, &object, &pixels, camera, params);
    log::trace!(
        "marker {marker_id}: {} LM iterations, rms {:.4}px",
        refined.iterations,
        refined.rms
    );

    Ok(PoseEstimate {
        marker_id,
        rotation: rotation_vector(&refined.pose.rotation),
        translation: refined.pose.translation,
        reprojection_rms: refined.rms,
    })
}

/// Per-frame pose solver for square markers.
///
/// Frames are independent: nothing is carried over between calls.
#[derive(Clone, Debug, Default)]
pub struct PoseEstimator {
    params: PoseRefineParams,
}

impl PoseEstimator {
    pub fn new(params: PoseRefineParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &PoseRefineParams {
        &self.params
    }

    /// Estimate one pose per marker, in input order.
    ///
    /// Ill-conditioned corners yield a best-effort estimate rather than
    /// being dropped. Only an invalid `marker_size` yields nothing.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "debug", skip(self, markers, camera), fields(markers = markers.len()))
    )]
    pub fn estimate(
        &self,
        markers: &[DetectedMarker],
        marker_size: f64,
        camera: &CameraModel,
    ) -> Vec<PoseEstimate> {
        markers
            .iter()
            .filter_map(|m| {
                match solve_marker_pose(m.id, &m.corners, marker_size, camera, &self.params) {
                    Ok(pose) => Some(pose),
                    Err(err) => {
                        log::warn!("marker {}: pose skipped: {err}", m.id);
                        None
                    }
                }
            })
            .collect()
    }
}
