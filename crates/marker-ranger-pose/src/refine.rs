//! Levenberg–Marquardt refinement of a single pose against pixel residuals.

use crate::planar::RigidPose;
use marker_ranger_core::CameraModel;
use nalgebra::{Matrix6, Point2, Point3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use serde::{Deserialize, Serialize};

/// Stopping criteria for the reprojection refinement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseRefineParams {
    /// Upper bound on LM iterations; `0` keeps the closed-form seed.
    pub max_iterations: usize,
    /// Relative step size below which the solve is considered converged.
    pub epsilon: f64,
}

impl Default for PoseRefineParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            epsilon: 1e-10,
        }
    }
}

type Residuals = SVector<f64, 8>;
type Jacobian = SMatrix<f64, 8, 6>;

/// Pose at `x = (ω, t)`: rotation `exp(ω) · base`.
///
/// The rotation is always parameterised as a small increment on `base`, so
/// the solve never passes through the axis-angle singularity at 180°.
fn pose_from_params(base: &Rotation3<f64>, x: &Vector6<f64>) -> RigidPose {
    RigidPose {
        rotation: Rotation3::from_scaled_axis(Vector3::new(x[0], x[1], x[2])) * base,
        translation: Vector3::new(x[3], x[4], x[5]),
    }
}

fn params_from_translation(t: &Vector3<f64>) -> Vector6<f64> {
    Vector6::new(0.0, 0.0, 0.0, t.x, t.y, t.z)
}

fn residuals(
    base: &Rotation3<f64>,
    x: &Vector6<f64>,
    object: &[Point3<f64>; 4],
    pixels: &[Point2<f64>; 4],
    camera: &CameraModel,
) -> Option<Residuals> {
    let pose = pose_from_params(base, x);
    let mut r = Residuals::zeros();
    for (i, (p, obs)) in object.iter().zip(pixels).enumerate() {
        let pc = Point3::from(pose.rotation * p.coords + pose.translation);
        let proj = camera.project(&pc)?;
        r[2 * i] = proj.x - obs.x;
        r[2 * i + 1] = proj.y - obs.y;
    }
    Some(r)
}

fn numeric_jacobian(
    base: &Rotation3<f64>,
    x: &Vector6<f64>,
    object: &[Point3<f64>; 4],
    pixels: &[Point2<f64>; 4],
    camera: &CameraModel,
) -> Option<Jacobian> {
    let mut j = Jacobian::zeros();
    for k in 0..6 {
        let step = 1e-6 * x[k].abs().max(1.0);
        let mut plus = *x;
        let mut minus = *x;
        plus[k] += step;
        minus[k] -= step;
        let d = (residuals(base, &plus, object, pixels, camera)?
            - residuals(base, &minus, object, pixels, camera)?)
            / (2.0 * step);
        j.set_column(k, &d);
    }
    Some(j)
}

/// Outcome of a refinement run.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Refined {
    pub pose: RigidPose,
    /// Root-mean-square corner reprojection error in pixels.
    pub rms: f64,
    pub iterations: usize,
}

/// Minimise the pixel reprojection error of the four corners.
///
/// The seed is returned untouched when its residuals cannot be evaluated.
pub(crate) fn refine_pose(
    seed: RigidPose,
    object: &[Point3<f64>; 4],
    pixels: &[Point2<f64>; 4],
    camera: &CameraModel,
    params: &PoseRefineParams,
) -> Refined {
    let mut base = seed.rotation;
    let mut x = params_from_translation(&seed.translation);
    let Some(mut r) = residuals(&base, &x, object, pixels, camera) else {
        return Refined {
            pose: seed,
            rms: f64::NAN,
            iterations: 0,
        };
    };
    let mut cost = r.norm_squared();
    let mut mu = 1e-3;
    let mut iterations = 0;

    while iterations < params.max_iterations {
        iterations += 1;
        let Some(j) = numeric_jacobian(&base, &x, object, pixels, camera) else {
            break;
        };
        let jtj: Matrix6<f64> = j.transpose() * j;
        let g: Vector6<f64> = j.transpose() * r;

        let mut improved = false;
        let mut converged = false;
        for _ in 0..10 {
            let mut a = jtj;
            for d in 0..6 {
                a[(d, d)] += mu * jtj[(d, d)].max(1e-12);
            }
            let Some(delta) = a.lu().solve(&(-g)) else {
                mu *= 10.0;
                continue;
            };
            let candidate = x + delta;
            match residuals(&base, &candidate, object, pixels, camera) {
                Some(rc) if rc.norm_squared() < cost => {
                    converged = delta.norm() <= params.epsilon * (x.norm() + params.epsilon);
                    // Fold the rotation step into the base and restart at ω = 0.
                    let accepted = pose_from_params(&base, &candidate);
                    base = accepted.rotation;
                    x = params_from_translation(&accepted.translation);
                    r = rc;
                    cost = r.norm_squared();
                    mu = (mu / 10.0).max(1e-12);
                    improved = true;
                    break;
                }
                _ => mu *= 10.0,
            }
        }
        if !improved || converged || cost < 1e-24 {
            break;
        }
    }

    Refined {
        pose: pose_from_params(&base, &x),
        rms: (cost / 4.0).sqrt(),
        iterations,
    }
}
