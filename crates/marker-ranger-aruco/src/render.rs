//! Synthetic marker rendering.
//!
//! Used to build test scenes and printable targets; pixel `(x, y)` is
//! treated as the point `(x, y)`, matching the detector.

use crate::Dictionary;
use marker_ranger_core::{homography_from_4pt, GrayImage};
use nalgebra::Point2;

const BLACK: u8 = 0;
const WHITE: u8 = 255;

fn cell_value(dict: &Dictionary, code: u64, border: usize, cx: usize, cy: usize) -> u8 {
    let bits = dict.marker_size;
    let cells = bits + 2 * border;
    if cx < border || cy < border || cx >= cells - border || cy >= cells - border {
        return BLACK;
    }
    let bit = (cy - border) * bits + (cx - border);
    if (code >> bit) & 1 == 1 {
        WHITE
    } else {
        BLACK
    }
}

/// Render marker `id` axis-aligned with `cell_px` pixels per cell and no
/// quiet zone. Returns `None` for an unknown id or a zero cell size.
pub fn render_marker_image(dict: &Dictionary, id: u32, cell_px: usize, border: usize) -> Option<GrayImage> {
    let code = dict.code(id)?;
    if cell_px == 0 {
        return None;
    }
    let cells = dict.marker_size + 2 * border;
    let side = cells * cell_px;
    let mut img = GrayImage::filled(side, side, WHITE);
    for y in 0..side {
        for x in 0..side {
            img.set(x, y, cell_value(dict, code, border, x / cell_px, y / cell_px));
        }
    }
    Some(img)
}

/// Paint marker `id` into `canvas` so that its corners land on `corners`
/// (top-left, top-right, bottom-right, bottom-left).
///
/// Returns `false` when the id is unknown or the quad is degenerate.
pub fn paint_marker_quad(
    canvas: &mut GrayImage,
    dict: &Dictionary,
    id: u32,
    border: usize,
    corners: &[Point2<f64>; 4],
) -> bool {
    let Some(code) = dict.code(id) else {
        return false;
    };
    let cells = dict.marker_size + 2 * border;
    let s = cells as f64;
    let canonical = [
        Point2::new(0.0, 0.0),
        Point2::new(s, 0.0),
        Point2::new(s, s),
        Point2::new(0.0, s),
    ];
    let Some(inv) = homography_from_4pt(&canonical, corners).and_then(|h| h.inverse()) else {
        return false;
    };

    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in corners {
        x0 = x0.min(p.x);
        y0 = y0.min(p.y);
        x1 = x1.max(p.x);
        y1 = y1.max(p.y);
    }
    let xs = x0.floor().max(0.0) as usize..=(x1.ceil().max(0.0) as usize).min(canvas.width.saturating_sub(1));
    let ys = y0.floor().max(0.0) as usize..=(y1.ceil().max(0.0) as usize).min(canvas.height.saturating_sub(1));

    for y in ys {
        for x in xs.clone() {
            let uv = inv.apply(Point2::new(x as f64, y as f64));
            if !(uv.x >= 0.0 && uv.y >= 0.0 && uv.x < s && uv.y < s) {
                continue;
            }
            let v = cell_value(dict, code, border, uv.x as usize, uv.y as usize);
            canvas.set(x, y, v);
        }
    }
    true
}
