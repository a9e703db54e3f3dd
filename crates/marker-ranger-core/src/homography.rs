//! Plane-to-plane projective maps estimated from point correspondences.

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

/// Projective map `dst ~ h * src`, scaled so that `h[(2, 2)] == 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    /// Map one point. Points on the line at infinity come back non-finite.
    #[inline]
    pub fn apply(&self, p: Point2<f64>) -> Point2<f64> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        Point2::new(v.x / v.z, v.y / v.z)
    }

    pub fn inverse(&self) -> Option<Self> {
        self.h.try_inverse().and_then(unit_corner).map(Self::new)
    }
}

fn unit_corner(h: Matrix3<f64>) -> Option<Matrix3<f64>> {
    let s = h[(2, 2)];
    (s.is_finite() && s.abs() > 1e-12).then(|| h / s)
}

/// Similarity moving the centroid to the origin with mean distance √2.
fn conditioner(pts: &[Point2<f64>]) -> Matrix3<f64> {
    let n = pts.len() as f64;
    let c = pts.iter().fold(Vector3::zeros(), |acc, p| acc + Vector3::new(p.x, p.y, 0.0)) / n;
    let spread = pts
        .iter()
        .map(|p| (p.x - c.x).hypot(p.y - c.y))
        .sum::<f64>()
        / n;
    let s = if spread > 1e-12 {
        std::f64::consts::SQRT_2 / spread
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * c.x, 0.0, s, -s * c.y, 0.0, 0.0, 1.0)
}

fn transform(t: &Matrix3<f64>, p: &Point2<f64>) -> Point2<f64> {
    let v = t * Vector3::new(p.x, p.y, 1.0);
    Point2::new(v.x, v.y)
}

/// Direct linear transform over `n >= 4` correspondences.
///
/// Points are conditioned first; the solution is the eigenvector of `AᵀA`
/// with the smallest eigenvalue. Returns `None` for mismatched slices, fewer
/// than four points, or configurations that do not pin down a
/// non-singular map (e.g. three collinear points out of four).
pub fn homography_from_points(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Homography> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }
    let t_src = conditioner(src);
    let t_dst = conditioner(dst);

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst) {
        let p = transform(&t_src, s);
        let q = transform(&t_dst, d);
        let rows = [
            SVector::<f64, 9>::from_column_slice(&[
                -p.x, -p.y, -1.0, 0.0, 0.0, 0.0, q.x * p.x, q.x * p.y, q.x,
            ]),
            SVector::<f64, 9>::from_column_slice(&[
                0.0, 0.0, 0.0, -p.x, -p.y, -1.0, q.y * p.x, q.y * p.y, q.y,
            ]),
        ];
        for r in &rows {
            ata += r * r.transpose();
        }
    }

    let eig = ata.symmetric_eigen();
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let v = eig.eigenvectors.column(min_idx);
    let hn = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let h = unit_corner(t_dst.try_inverse()? * hn * t_src)?;
    if h.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let det = h.determinant() / h.norm().powi(3);
    if det.abs() < 1e-12 {
        return None;
    }
    Some(Homography::new(h))
}

/// Exact homography through four corresponding corners.
pub fn homography_from_4pt(src: &[Point2<f64>; 4], dst: &[Point2<f64>; 4]) -> Option<Homography> {
    homography_from_points(src, dst)
}
