//! Operator overlay: marker outlines, ids and pose axes.
//!
//! Drawing never fails. Anything that falls outside the frame, or is not
//! finite, is clipped or skipped.

use image::{Rgb, RgbImage};
use marker_ranger_aruco::DetectedMarker;
use marker_ranger_core::CameraModel;
use marker_ranger_pose::{project_points, PoseEstimate};
use nalgebra::{Point2, Point3};

/// Colours and sizes of the overlay.
#[derive(Clone, Debug, PartialEq)]
pub struct AnnotationStyle {
    pub outline: Rgb<u8>,
    pub first_corner: Rgb<u8>,
    pub label: Rgb<u8>,
    pub axis_x: Rgb<u8>,
    pub axis_y: Rgb<u8>,
    pub axis_z: Rgb<u8>,
    /// Line width in pixels.
    pub thickness: u32,
    /// Pixel size of one font dot.
    pub label_scale: u32,
}

impl Default for AnnotationStyle {
    fn default() -> Self {
        Self {
            outline: Rgb([0, 255, 0]),
            first_corner: Rgb([255, 0, 0]),
            label: Rgb([0, 0, 255]),
            axis_x: Rgb([255, 0, 0]),
            axis_y: Rgb([0, 255, 0]),
            axis_z: Rgb([0, 0, 255]),
            thickness: 2,
            label_scale: 2,
        }
    }
}

/// Stateless overlay renderer.
#[derive(Clone, Debug)]
pub struct FrameAnnotator {
    style: AnnotationStyle,
    axis_length: f64,
}

impl FrameAnnotator {
    /// `axis_length` is in the unit of the pose translation (metres).
    pub fn new(axis_length: f64) -> Self {
        Self::with_style(axis_length, AnnotationStyle::default())
    }

    pub fn with_style(axis_length: f64, style: AnnotationStyle) -> Self {
        Self { style, axis_length }
    }

    pub fn style(&self) -> &AnnotationStyle {
        &self.style
    }

    /// Draw outlines and ids for every marker, plus an axis gizmo for every
    /// pose when a camera model is available.
    pub fn annotate(
        &self,
        frame: &mut RgbImage,
        markers: &[DetectedMarker],
        poses: &[PoseEstimate],
        camera: Option<&CameraModel>,
    ) {
        for marker in markers {
            self.draw_marker(frame, marker);
        }
        if let Some(camera) = camera {
            for pose in poses {
                self.draw_axes(frame, pose, camera);
            }
        }
    }

    fn draw_marker(&self, frame: &mut RgbImage, marker: &DetectedMarker) {
        let c = marker.corners.map(|p| Point2::new(p.x as f64, p.y as f64));
        for i in 0..4 {
            draw_line(frame, c[i], c[(i + 1) % 4], self.style.outline, self.style.thickness);
        }
        fill_square(frame, c[0], 3, self.style.first_corner);

        let center = marker.center();
        let text = format!("id={}", marker.id);
        draw_text(
            frame,
            Point2::new(center.x as f64, center.y as f64),
            &text,
            self.style.label,
            self.style.label_scale,
        );
    }

    fn draw_axes(&self, frame: &mut RgbImage, pose: &PoseEstimate, camera: &CameraModel) {
        let l = self.axis_length;
        let pts = [
            Point3::origin(),
            Point3::new(l, 0.0, 0.0),
            Point3::new(0.0, l, 0.0),
            Point3::new(0.0, 0.0, l),
        ];
        let projected = project_points(&pts, pose, camera);
        let Some(origin) = projected[0] else {
            return;
        };
        let colours = [self.style.axis_x, self.style.axis_y, self.style.axis_z];
        for (tip, colour) in projected[1..].iter().zip(colours) {
            if let Some(tip) = tip {
                draw_line(frame, origin, *tip, colour, self.style.thickness);
            }
        }
    }
}

fn put(frame: &mut RgbImage, x: i64, y: i64, colour: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < frame.width() as i64 && y < frame.height() as i64 {
        frame.put_pixel(x as u32, y as u32, colour);
    }
}

fn fill_square(frame: &mut RgbImage, c: Point2<f64>, half: i64, colour: Rgb<u8>) {
    if !(c.x.is_finite() && c.y.is_finite()) {
        return;
    }
    let (cx, cy) = (c.x.round() as i64, c.y.round() as i64);
    for y in cy - half..=cy + half {
        for x in cx - half..=cx + half {
            put(frame, x, y, colour);
        }
    }
}

/// Liang–Barsky clip of the segment `a → b` to `[xmin, xmax] × [ymin, ymax]`.
fn clip_segment(
    a: Point2<f64>,
    b: Point2<f64>,
    (xmin, ymin, xmax, ymax): (f64, f64, f64, f64),
) -> Option<(Point2<f64>, Point2<f64>)> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;
    for (p, q) in [
        (-dx, a.x - xmin),
        (dx, xmax - a.x),
        (-dy, a.y - ymin),
        (dy, ymax - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            t0 = t0.max(r);
        } else {
            t1 = t1.min(r);
        }
        if t0 > t1 {
            return None;
        }
    }
    Some((
        Point2::new(a.x + t0 * dx, a.y + t0 * dy),
        Point2::new(a.x + t1 * dx, a.y + t1 * dy),
    ))
}

/// Bresenham line with a square pen of side `thickness`.
pub(crate) fn draw_line(frame: &mut RgbImage, a: Point2<f64>, b: Point2<f64>, colour: Rgb<u8>, thickness: u32) {
    if !(a.x.is_finite() && a.y.is_finite() && b.x.is_finite() && b.y.is_finite()) {
        return;
    }
    let pad = thickness as f64;
    let bounds = (
        -pad,
        -pad,
        frame.width() as f64 - 1.0 + pad,
        frame.height() as f64 - 1.0 + pad,
    );
    let Some((a, b)) = clip_segment(a, b, bounds) else {
        return;
    };

    let lo = -((thickness.max(1) as i64 - 1) / 2);
    let hi = lo + thickness.max(1) as i64 - 1;

    let (mut x0, mut y0) = (a.x.round() as i64, a.y.round() as i64);
    let (x1, y1) = (b.x.round() as i64, b.y.round() as i64);
    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    loop {
        for oy in lo..=hi {
            for ox in lo..=hi {
                put(frame, x0 + ox, y0 + oy, colour);
            }
        }
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
}

/// 3×5 dot glyphs, one row per byte, most significant of the low 3 bits on
/// the left.
fn glyph(ch: char) -> Option<[u8; 5]> {
    Some(match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        'i' => [0b010, 0b000, 0b010, 0b010, 0b010],
        'd' => [0b001, 0b001, 0b111, 0b101, 0b111],
        '=' => [0b000, 0b111, 0b000, 0b111, 0b000],
        _ => return None,
    })
}

/// Draw `text` centred on `at`; unknown characters leave a gap.
fn draw_text(frame: &mut RgbImage, at: Point2<f64>, text: &str, colour: Rgb<u8>, scale: u32) {
    if !(at.x.is_finite() && at.y.is_finite()) {
        return;
    }
    let scale = scale.max(1) as i64;
    let advance = 4 * scale;
    let width = text.chars().count() as i64 * advance - scale;
    let x0 = at.x.round() as i64 - width / 2;
    let y0 = at.y.round() as i64 - (5 * scale) / 2;

    for (i, ch) in text.chars().enumerate() {
        let Some(rows) = glyph(ch) else { continue };
        let gx = x0 + i as i64 * advance;
        for (ry, bits) in rows.iter().enumerate() {
            for rx in 0..3 {
                if (bits >> (2 - rx)) & 1 == 0 {
                    continue;
                }
                for dy in 0..scale {
                    for dx in 0..scale {
                        put(frame, gx + rx * scale + dx, y0 + ry as i64 * scale + dy, colour);
                    }
                }
            }
        }
    }
}
