//! Pinhole camera model with Brown-Conrady distortion.
//!
//! Distortion coefficients follow the OpenCV ordering `(k1, k2, p1, p2[, k3])`.

use nalgebra::{Matrix3, Point2, Point3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Errors raised while building a camera model from raw calibration values.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CameraError {
    #[error("camera matrix needs 9 values, got {got}")]
    MatrixLength { got: usize },
    #[error("distortion vector must hold 4 or 5 coefficients, got {got}")]
    DistortionLength { got: usize },
    #[error("calibration contains non-finite values")]
    NonFinite,
    #[error("camera matrix is singular")]
    SingularMatrix,
}

/// Brown-Conrady radial-tangential distortion coefficients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    /// Zero when the calibration only carries four coefficients.
    #[serde(default)]
    pub k3: f64,
}

impl Distortion {
    /// Parse a 4- or 5-element OpenCV distortion vector.
    pub fn from_slice(coeffs: &[f64]) -> Result<Self, CameraError> {
        if coeffs.len() != 4 && coeffs.len() != 5 {
            return Err(CameraError::DistortionLength { got: coeffs.len() });
        }
        if coeffs.iter().any(|c| !c.is_finite()) {
            return Err(CameraError::NonFinite);
        }
        Ok(Self {
            k1: coeffs[0],
            k2: coeffs[1],
            p1: coeffs[2],
            p2: coeffs[3],
            k3: coeffs.get(4).copied().unwrap_or(0.0),
        })
    }

    pub fn to_array(self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort_normalized(self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r4 + self.k3 * r6;
        let x_tan = 2.0 * self.p1 * x * y + self.p2 * (r2 + 2.0 * x * x);
        let y_tan = self.p1 * (r2 + 2.0 * y * y) + 2.0 * self.p2 * x * y;
        Vector2::new(x * radial + x_tan, y * radial + y_tan)
    }
}

/// Distortion inversion settings used by iterative undistortion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UndistortConfig {
    /// Maximum fixed-point iterations.
    pub max_iters: usize,
    /// Stop when coordinate update norm is below this threshold.
    pub eps: f64,
}

impl Default for UndistortConfig {
    fn default() -> Self {
        Self {
            max_iters: 15,
            eps: 1e-12,
        }
    }
}

/// Camera matrix plus distortion: everything needed to map between metric
/// camera-frame points and image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    pub matrix: Matrix3<f64>,
    pub distortion: Distortion,
}

impl CameraModel {
    pub fn new(matrix: Matrix3<f64>, distortion: Distortion) -> Result<Self, CameraError> {
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(CameraError::NonFinite);
        }
        if matrix.try_inverse().is_none() {
            return Err(CameraError::SingularMatrix);
        }
        Ok(Self { matrix, distortion })
    }

    /// Build from a flat row-major 3×3 matrix and a 4/5-element distortion vector.
    pub fn from_raw(matrix: &[f64], distortion: &[f64]) -> Result<Self, CameraError> {
        if matrix.len() != 9 {
            return Err(CameraError::MatrixLength { got: matrix.len() });
        }
        let distortion = Distortion::from_slice(distortion)?;
        Self::new(Matrix3::from_row_slice(matrix), distortion)
    }

    /// Ideal pinhole camera without distortion.
    pub fn pinhole(fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Self {
            matrix: Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0),
            distortion: Distortion::default(),
        }
    }

    #[inline]
    pub fn fx(&self) -> f64 {
        self.matrix[(0, 0)]
    }

    #[inline]
    pub fn fy(&self) -> f64 {
        self.matrix[(1, 1)]
    }

    #[inline]
    pub fn cx(&self) -> f64 {
        self.matrix[(0, 2)]
    }

    #[inline]
    pub fn cy(&self) -> f64 {
        self.matrix[(1, 2)]
    }

    /// Flat row-major copy of the camera matrix.
    pub fn matrix_row_major(&self) -> [f64; 9] {
        let m = &self.matrix;
        [
            m[(0, 0)],
            m[(0, 1)],
            m[(0, 2)],
            m[(1, 0)],
            m[(1, 1)],
            m[(1, 2)],
            m[(2, 0)],
            m[(2, 1)],
            m[(2, 2)],
        ]
    }

    /// Distort normalized coordinates and map them through the camera matrix.
    pub fn normalized_to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        let d = self.distortion.distort_normalized(n);
        let v = self.matrix * Vector3::new(d.x, d.y, 1.0);
        Point2::new(v[0] / v[2], v[1] / v[2])
    }

    /// Project a camera-frame point. Points at or behind the camera plane
    /// yield `None`.
    pub fn project(&self, p: &Point3<f64>) -> Option<Point2<f64>> {
        if p.z <= 1e-9 {
            return None;
        }
        let px = self.normalized_to_pixel(Vector2::new(p.x / p.z, p.y / p.z));
        (px.x.is_finite() && px.y.is_finite()).then_some(px)
    }

    /// Undistort a pixel into normalized coordinates with default settings.
    pub fn pixel_to_normalized(&self, pixel: Point2<f64>) -> Option<Vector2<f64>> {
        self.pixel_to_normalized_with(pixel, UndistortConfig::default())
    }

    /// Undistort a pixel into normalized coordinates (fixed-point iteration).
    pub fn pixel_to_normalized_with(
        &self,
        pixel: Point2<f64>,
        cfg: UndistortConfig,
    ) -> Option<Vector2<f64>> {
        let k_inv = self.matrix.try_inverse()?;
        let v = k_inv * Vector3::new(pixel.x, pixel.y, 1.0);
        let xd = Vector2::new(v[0] / v[2], v[1] / v[2]);
        let dist = self.distortion;
        let mut x = xd.x;
        let mut y = xd.y;

        for _ in 0..cfg.max_iters.max(1) {
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let r6 = r4 * r2;
            let radial = 1.0 + dist.k1 * r2 + dist.k2 * r4 + dist.k3 * r6;
            if !radial.is_finite() || radial.abs() < 1e-12 {
                return None;
            }

            let dx_tan = 2.0 * dist.p1 * x * y + dist.p2 * (r2 + 2.0 * x * x);
            let dy_tan = dist.p1 * (r2 + 2.0 * y * y) + 2.0 * dist.p2 * x * y;
            let x_next = (xd.x - dx_tan) / radial;
            let y_next = (xd.y - dy_tan) / radial;
            if !x_next.is_finite() || !y_next.is_finite() {
                return None;
            }

            let step = ((x_next - x).powi(2) + (y_next - y).powi(2)).sqrt();
            x = x_next;
            y = y_next;
            if step <= cfg.eps.max(0.0) {
                break;
            }
        }

        Some(Vector2::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn sample_camera() -> CameraModel {
        CameraModel::from_raw(
            &[399.34, 0.0, 324.14, 0.0, 532.85, 217.40, 0.0, 0.0, 1.0],
            &[-0.32, 0.097, -0.0003, -0.001, 0.0],
        )
        .expect("valid camera")
    }

    #[test]
    fn accepts_four_and_five_coefficients() {
        let four = Distortion::from_slice(&[0.1, 0.2, 0.3, 0.4]).expect("4 coeffs");
        assert_eq!(four.k3, 0.0);
        let five = Distortion::from_slice(&[0.1, 0.2, 0.3, 0.4, 0.5]).expect("5 coeffs");
        assert_eq!(five.k3, 0.5);
        assert_eq!(
            Distortion::from_slice(&[0.0; 3]),
            Err(CameraError::DistortionLength { got: 3 })
        );
    }

    #[test]
    fn rejects_malformed_matrices() {
        assert_eq!(
            CameraModel::from_raw(&[1.0; 8], &[0.0; 5]),
            Err(CameraError::MatrixLength { got: 8 })
        );
        assert_eq!(
            CameraModel::from_raw(&[0.0; 9], &[0.0; 5]),
            Err(CameraError::SingularMatrix)
        );
    }

    #[test]
    fn distortion_roundtrip_recovers_pixel() {
        let cam = sample_camera();
        let n = Vector2::new(0.21, -0.12);
        let px = cam.normalized_to_pixel(n);
        let back = cam.pixel_to_normalized(px).expect("undistort");
        assert_abs_diff_eq!(back.x, n.x, epsilon = 1e-7);
        assert_abs_diff_eq!(back.y, n.y, epsilon = 1e-7);
    }

    #[test]
    fn projection_behind_camera_is_none() {
        let cam = CameraModel::pinhole(400.0, 400.0, 320.0, 240.0);
        assert!(cam.project(&Point3::new(0.0, 0.0, -1.0)).is_none());
        let p = cam.project(&Point3::new(0.1, -0.05, 1.0)).expect("in front");
        assert_abs_diff_eq!(p.x, 360.0, epsilon = 1e-9);
        assert_abs_diff_eq!(p.y, 220.0, epsilon = 1e-9);
    }
}
