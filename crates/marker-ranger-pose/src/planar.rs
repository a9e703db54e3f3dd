//! Closed-form pose seed from a plane-induced homography.

use crate::PoseError;
use marker_ranger_core::{homography_from_4pt, CameraModel};
use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector3};

/// Rigid transform mapping marker coordinates into the camera frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct RigidPose {
    pub rotation: Rotation3<f64>,
    pub translation: Vector3<f64>,
}

/// Decompose `H ~ [r1 r2 t]` for a plane at `Z = 0`, where `H` maps plane
/// coordinates to normalized (undistorted) image coordinates.
pub(crate) fn pose_from_normalized_homography(h: &Matrix3<f64>) -> Result<RigidPose, PoseError> {
    let h1 = h.column(0).into_owned();
    let h2 = h.column(1).into_owned();
    let h3 = h.column(2).into_owned();

    let (n1, n2) = (h1.norm(), h2.norm());
    if n1 <= 1e-12 || n2 <= 1e-12 {
        return Err(PoseError::DegenerateCorners);
    }
    let lambda = 2.0 / (n1 + n2);

    let mut r1 = lambda * h1;
    let mut r2 = lambda * h2;
    let mut t = lambda * h3;
    if t.z < 0.0 {
        r1 = -r1;
        r2 = -r2;
        t = -t;
    }
    let r3 = r1.cross(&r2);
    if r3.norm() <= 1e-12 {
        return Err(PoseError::DegenerateCorners);
    }

    let r = Matrix3::from_columns(&[r1, r2, r3]);
    let svd = r.svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return Err(PoseError::DegenerateCorners);
    };
    let mut r_orth = u * v_t;
    if r_orth.determinant() < 0.0 {
        let mut u_flipped = u;
        u_flipped.column_mut(2).neg_mut();
        r_orth = u_flipped * v_t;
    }

    if !r_orth.iter().chain(t.iter()).all(|v| v.is_finite()) {
        return Err(PoseError::DegenerateCorners);
    }

    Ok(RigidPose {
        rotation: Rotation3::from_matrix_unchecked(r_orth),
        translation: t,
    })
}

/// Seed pose from four coplanar object points and their pixel observations.
pub(crate) fn seed_pose(
    object: &[Point3<f64>; 4],
    pixels: &[Point2<f64>; 4],
    camera: &CameraModel,
) -> Result<RigidPose, PoseError> {
    let mut normalized = [Point2::origin(); 4];
    for (n, px) in normalized.iter_mut().zip(pixels) {
        let v = camera
            .pixel_to_normalized(*px)
            .ok_or(PoseError::Undistort)?;
        *n = Point2::new(v.x, v.y);
    }
    let plane = object.map(|p| Point2::new(p.x, p.y));
    let h = homography_from_4pt(&plane, &normalized).ok_or(PoseError::DegenerateCorners)?;
    pose_from_normalized_homography(&h.h)
}
