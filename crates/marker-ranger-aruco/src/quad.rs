//! Quad candidate extraction.
//!
//! Each adaptive-threshold pass yields a binary mask. Connected blobs are
//! labelled, reduced to their convex hull and fitted with four corners.
//! Candidates from all passes are merged afterwards.

use crate::threshold::{adaptive_mask, Polarity};
use crate::DetectorParams;
use marker_ranger_core::GrayImageView;
use nalgebra::Point2;

/// A convex, clockwise quad that may contain a marker.
#[derive(Clone, Debug)]
pub(crate) struct QuadCandidate {
    /// Corners in image pixels, clockwise with y pointing down.
    pub corners: [Point2<f64>; 4],
    pub perimeter: f64,
    /// Set when the quad came from a bright blob.
    pub inverted: bool,
}

/// Run every threshold pass and return the merged candidate list.
pub(crate) fn find_candidates(img: &GrayImageView<'_>, params: &DetectorParams) -> Vec<QuadCandidate> {
    let mut polarities = vec![Polarity::Dark];
    if params.detect_inverted_marker {
        polarities.push(Polarity::Bright);
    }

    let mut all = Vec::new();
    for window in params.threshold_windows() {
        for &polarity in &polarities {
            let mask = adaptive_mask(img, window, params.adaptive_thresh_constant, polarity);
            let before = all.len();
            collect_from_mask(&mask, img.width, img.height, params, polarity, &mut all);
            log::trace!(
                "threshold window {window} ({polarity:?}): {} candidates",
                all.len() - before
            );
        }
    }

    suppress_close(all, params.min_marker_distance_rate)
}

fn collect_from_mask(
    mask: &[bool],
    width: usize,
    height: usize,
    params: &DetectorParams,
    polarity: Polarity,
    out: &mut Vec<QuadCandidate>,
) {
    let max_dim = width.max(height) as f64;
    let min_perimeter = params.min_marker_perimeter_rate * max_dim;
    let max_perimeter = params.max_marker_perimeter_rate * max_dim;

    let mut visited = vec![false; mask.len()];
    let mut stack = Vec::new();
    let mut pixels = Vec::new();

    for start in 0..mask.len() {
        if !mask[start] || visited[start] {
            continue;
        }

        pixels.clear();
        visited[start] = true;
        stack.push(start);
        while let Some(idx) = stack.pop() {
            pixels.push(idx);
            let (x, y) = ((idx % width) as i64, (idx / width) as i64);
            for dy in -1..=1i64 {
                for dx in -1..=1i64 {
                    let (nx, ny) = (x + dx, y + dy);
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let n = ny as usize * width + nx as usize;
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        let Some(extents) = RowExtents::from_pixels(&pixels, width) else {
            continue;
        };
        // The bounding box perimeter bounds the hull perimeter from above.
        if extents.bbox_perimeter() < min_perimeter {
            continue;
        }

        let hull = convex_hull(extents.outline_points());
        let Some(mut corners) = quad_from_hull(&hull) else {
            continue;
        };

        let perimeter = quad_perimeter(&corners);
        if perimeter < min_perimeter || perimeter > max_perimeter {
            continue;
        }
        let hull_area = polygon_area(&hull).abs();
        let quad_area = polygon_area(&corners).abs();
        if hull_area <= 0.0 || quad_area / hull_area < params.min_quad_fill_ratio {
            continue;
        }
        let min_side = (0..4)
            .map(|i| (corners[(i + 1) % 4] - corners[i]).norm())
            .fold(f64::INFINITY, f64::min);
        if min_side < params.min_corner_distance_rate * perimeter {
            continue;
        }
        if !far_from_border(&corners, width, height, params.min_distance_to_border) {
            continue;
        }

        // Positive shoelace sum with y down means clockwise on screen.
        if polygon_area(&corners) < 0.0 {
            corners.swap(1, 3);
        }

        out.push(QuadCandidate {
            corners,
            perimeter,
            inverted: polarity == Polarity::Bright,
        });
    }
}

/// Per-row min/max x of a blob.
struct RowExtents {
    y0: usize,
    rows: Vec<Option<(usize, usize)>>,
}

impl RowExtents {
    fn from_pixels(pixels: &[usize], width: usize) -> Option<Self> {
        let y0 = pixels.iter().map(|&i| i / width).min()?;
        let y1 = pixels.iter().map(|&i| i / width).max()?;
        let mut rows: Vec<Option<(usize, usize)>> = vec![None; y1 - y0 + 1];
        for &i in pixels {
            let (x, y) = (i % width, i / width);
            let slot = &mut rows[y - y0];
            *slot = Some(match *slot {
                Some((lo, hi)) => (lo.min(x), hi.max(x)),
                None => (x, x),
            });
        }
        Some(Self { y0, rows })
    }

    fn bbox_perimeter(&self) -> f64 {
        let (lo, hi) = self
            .rows
            .iter()
            .flatten()
            .fold((usize::MAX, 0), |(lo, hi), &(a, b)| (lo.min(a), hi.max(b)));
        let w = (hi + 1).saturating_sub(lo) as f64;
        let h = self.rows.len() as f64;
        2.0 * (w + h)
    }

    /// Outer pixel-corner points of each row; pixel `(x, y)` covers
    /// `[x - 0.5, x + 0.5] × [y - 0.5, y + 0.5]`.
    fn outline_points(&self) -> Vec<Point2<f64>> {
        let mut pts = Vec::with_capacity(self.rows.len() * 4);
        for (dy, row) in self.rows.iter().enumerate() {
            let Some((lo, hi)) = *row else { continue };
            let y = (self.y0 + dy) as f64;
            let (l, r) = (lo as f64 - 0.5, hi as f64 + 0.5);
            pts.push(Point2::new(l, y - 0.5));
            pts.push(Point2::new(l, y + 0.5));
            pts.push(Point2::new(r, y - 0.5));
            pts.push(Point2::new(r, y + 0.5));
        }
        pts
    }
}

fn cross(o: &Point2<f64>, a: &Point2<f64>, b: &Point2<f64>) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Andrew's monotone chain; collinear points are dropped.
pub(crate) fn convex_hull(mut pts: Vec<Point2<f64>>) -> Vec<Point2<f64>> {
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut hull: Vec<Point2<f64>> = Vec::with_capacity(pts.len() * 2);
    for p in pts.iter() {
        while hull.len() >= 2 && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(*p);
    }
    let lower_len = hull.len() + 1;
    for p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && cross(&hull[hull.len() - 2], &hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(*p);
    }
    hull.pop();
    hull
}

/// Pick four hull vertices spanning the largest quad-like shape.
///
/// `a` is the vertex farthest from the centroid, `b` the one farthest from
/// `a`, and `c`/`d` the extremes on either side of the chord `ab`.
fn quad_from_hull(hull: &[Point2<f64>]) -> Option<[Point2<f64>; 4]> {
    if hull.len() < 4 {
        return None;
    }

    let n = hull.len() as f64;
    let centroid = hull
        .iter()
        .fold(Point2::origin(), |acc: Point2<f64>, p| acc + p.coords / n);

    let farthest_from = |q: &Point2<f64>| {
        hull.iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| (*a - q).norm_squared().total_cmp(&(*b - q).norm_squared()))
            .map(|(i, _)| i)
    };
    let ia = farthest_from(&centroid)?;
    let ib = farthest_from(&hull[ia])?;
    if ia == ib {
        return None;
    }

    let (a, b) = (hull[ia], hull[ib]);
    let (mut ic, mut id) = (None, None);
    let (mut best_pos, mut best_neg) = (0.0f64, 0.0f64);
    for (i, p) in hull.iter().enumerate() {
        let s = cross(&a, &b, p);
        if s > best_pos {
            best_pos = s;
            ic = Some(i);
        } else if s < best_neg {
            best_neg = s;
            id = Some(i);
        }
    }
    let chord = (b - a).norm();
    if best_pos / chord < 1.0 || -best_neg / chord < 1.0 {
        return None;
    }

    let mut idx = [ia, ib, ic?, id?];
    idx.sort_unstable();
    Some(idx.map(|i| hull[i]))
}

/// Signed shoelace area; positive for clockwise order in image coordinates.
pub(crate) fn polygon_area(pts: &[Point2<f64>]) -> f64 {
    let n = pts.len();
    let mut s = 0.0;
    for i in 0..n {
        let (p, q) = (pts[i], pts[(i + 1) % n]);
        s += p.x * q.y - q.x * p.y;
    }
    0.5 * s
}

pub(crate) fn quad_perimeter(c: &[Point2<f64>; 4]) -> f64 {
    (0..4).map(|i| (c[(i + 1) % 4] - c[i]).norm()).sum()
}

fn far_from_border(c: &[Point2<f64>; 4], width: usize, height: usize, margin: f64) -> bool {
    let (xmax, ymax) = (width as f64 - 1.0 - margin, height as f64 - 1.0 - margin);
    c.iter()
        .all(|p| p.x >= margin && p.y >= margin && p.x <= xmax && p.y <= ymax)
}

/// Mean corner distance under the best cyclic alignment.
fn corner_distance(a: &[Point2<f64>; 4], b: &[Point2<f64>; 4]) -> f64 {
    (0..4)
        .map(|shift| (0..4).map(|i| (a[i] - b[(i + shift) % 4]).norm()).sum::<f64>() / 4.0)
        .fold(f64::INFINITY, f64::min)
}

/// Merge near-identical candidates, keeping the larger one of each group.
fn suppress_close(mut candidates: Vec<QuadCandidate>, rate: f64) -> Vec<QuadCandidate> {
    candidates.sort_by(|a, b| b.perimeter.total_cmp(&a.perimeter));
    let mut kept: Vec<QuadCandidate> = Vec::with_capacity(candidates.len());
    for cand in candidates {
        let close = kept.iter().any(|k| {
            k.inverted == cand.inverted
                && corner_distance(&k.corners, &cand.corners)
                    < rate * k.perimeter.min(cand.perimeter)
        });
        if !close {
            kept.push(cand);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use marker_ranger_core::GrayImage;

    fn square_image(size: usize, x0: usize, x1: usize) -> GrayImage {
        let mut img = GrayImage::filled(size, size, 230);
        for y in x0..x1 {
            for x in x0..x1 {
                img.set(x, y, 15);
            }
        }
        img
    }

    #[test]
    fn hull_of_square_has_four_vertices() {
        let pts = vec![
            Point2::new(0.0, 0.0),
            Point2::new(1.0, 0.0),
            Point2::new(2.0, 0.0),
            Point2::new(2.0, 2.0),
            Point2::new(1.0, 1.0),
            Point2::new(0.0, 2.0),
        ];
        assert_eq!(convex_hull(pts).len(), 4);
    }

    #[test]
    fn dark_square_becomes_one_clockwise_candidate() {
        let img = square_image(120, 30, 90);
        let cands = find_candidates(&img.view(), &DetectorParams::default());
        assert_eq!(cands.len(), 1, "{cands:?}");

        let c = &cands[0];
        assert!(polygon_area(&c.corners) > 0.0);
        for p in &c.corners {
            let on_x = (p.x - 29.5).abs() < 1.0 || (p.x - 89.5).abs() < 1.0;
            let on_y = (p.y - 29.5).abs() < 1.0 || (p.y - 89.5).abs() < 1.0;
            assert!(on_x && on_y, "corner {p:?}");
        }
        assert!((c.perimeter - 240.0).abs() < 4.0);
    }

    #[test]
    fn tiny_and_border_touching_blobs_are_rejected() {
        let tiny = square_image(400, 200, 202);
        assert!(find_candidates(&tiny.view(), &DetectorParams::default()).is_empty());

        let edge = square_image(100, 0, 40);
        assert!(find_candidates(&edge.view(), &DetectorParams::default()).is_empty());
    }

    #[test]
    fn disc_is_not_a_quad() {
        let mut img = GrayImage::filled(160, 160, 230);
        for y in 0..160 {
            for x in 0..160 {
                let (dx, dy) = (x as f64 - 80.0, y as f64 - 80.0);
                if dx * dx + dy * dy < 50.0 * 50.0 {
                    img.set(x, y, 15);
                }
            }
        }
        assert!(find_candidates(&img.view(), &DetectorParams::default()).is_empty());
    }
}
