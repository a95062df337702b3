//! Scanline fill over the projected viewport.
//!
//! Computes which tile coordinates intersect the quad that is the
//! projection of the screen bounds onto the map plane. The quad may be
//! rotated; it is split into two triangles and each triangle is scanned row
//! by row between its edges, with ceil/floor rounding so adjacent rows
//! neither overlap nor leave gaps. Ported from the Polymaps scanline
//! algorithm.
//!
//! Spans from both triangles are merged per row, so the row callback fires
//! exactly once per covered row with the inclusive-exclusive x-range. The
//! caller is responsible for wrapping x-values around the antimeridian.

use crate::core::constants::TILE_SIZE;
use crate::prelude::HashMap;

#[derive(Debug, Clone, Copy, Default)]
struct Edge {
    x0: f32,
    y0: f32,
    x1: f32,
    y1: f32,
    dx: f32,
    dy: f32,
}

impl Edge {
    fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        let (x0, y0, x1, y1) = if y0 <= y1 {
            (x0, y0, x1, y1)
        } else {
            (x1, y1, x0, y0)
        };
        Self {
            x0,
            y0,
            x1,
            y1,
            dx: x1 - x0,
            dy: y1 - y0,
        }
    }
}

struct Scan {
    zoom: u8,
    xmin: i32,
    xmax: i32,
    rows: HashMap<i32, (i32, i32)>,
}

impl Scan {
    fn mark(&mut self, y: i32, x1: i32, x2: i32) {
        let span = self.rows.entry(y).or_insert((x1, x2));
        span.0 = span.0.min(x1);
        span.1 = span.1.max(x2);
    }

    fn scan_triangle(&mut self, mut ab: Edge, mut bc: Edge, mut ca: Edge) {
        // sort so that ca.dy > bc.dy > ab.dy
        if ab.dy > bc.dy {
            std::mem::swap(&mut ab, &mut bc);
        }
        if ab.dy > ca.dy {
            std::mem::swap(&mut ab, &mut ca);
        }
        if bc.dy > ca.dy {
            std::mem::swap(&mut bc, &mut ca);
        }

        // degenerate triangle
        if ca.dy == 0.0 {
            return;
        }

        if ab.dy > 0.0 {
            self.scan_spans(ca, ab);
        }
        if bc.dy > 0.0 {
            self.scan_spans(ca, bc);
        }
    }

    fn scan_spans(&mut self, mut e0: Edge, mut e1: Edge) {
        // scan the y-range of the edge with less dy
        let y0 = (e1.y0.floor().max(0.0)) as i32;
        let y1 = (e1.y1.ceil().min((1u32 << self.zoom) as f32)) as i32;

        // order edges so that e0 bounds the right side, e1 the left
        let swap = if e0.x0 == e1.x0 && e0.y0 == e1.y0 {
            // bottom-flat
            e0.x0 + e1.dy / e0.dy * e0.dx < e1.x1
        } else {
            // top-flat
            e0.x1 - e1.dy / e0.dy * e0.dx < e1.x0
        };
        if swap {
            std::mem::swap(&mut e0, &mut e1);
        }

        let m0 = e0.dx / e0.dy;
        let m1 = e1.dx / e1.dy;

        // e0 goes to the right, e1 to the left
        let d0 = if e0.dx > 0.0 { 1.0 } else { 0.0 };
        let d1 = if e1.dx < 0.0 { 1.0 } else { 0.0 };

        for y in y0..y1 {
            let dy = (d0 + y as f32 - e0.y0).min(e0.dy);
            let x0 = (e0.x0 + m0 * dy).ceil() as i32;

            let dy = (d1 + y as f32 - e1.y0).min(e1.dy);
            let x1 = (e1.x0 + m1 * dy).floor() as i32;

            let x1 = x1.max(self.xmin);
            let x0 = x0.min(self.xmax);

            if x1 < x0 {
                self.mark(y, x1, x0);
            }
        }
    }
}

/// Maps corner offsets (map pixels relative to the view center) into
/// tile-grid units at `zoom`.
fn trans_scale(x: f64, y: f64, scale: f64, zoom: u8, corners: &[f32; 8]) -> [f32; 8] {
    let scale = scale * TILE_SIZE as f64;
    let div = scale / (1u32 << zoom) as f64;
    let sx = x * scale;
    let sy = y * scale;

    let mut out = [0f32; 8];
    for i in (0..8).step_by(2) {
        out[i] = ((sx + corners[i] as f64) / div) as f32;
        out[i + 1] = ((sy + corners[i + 1] as f64) / div) as f32;
    }
    out
}

/// Enumerates the tile columns covered per row by the viewport quad.
///
/// `x`, `y` and `scale` are the map position; `corners` are the four quad
/// corners in map pixels relative to the view center, in top-left,
/// top-right, bottom-right, bottom-left order. `row` receives
/// `(y, x1, x2)` once per covered row, rows ascending, columns spanning
/// `x1..x2`. Column values may fall outside `0..2^zoom` when the view
/// crosses the antimeridian; wrapping them is the caller's concern.
pub fn scan_quad(
    x: f64,
    y: f64,
    scale: f64,
    zoom: u8,
    corners: &[f32; 8],
    mut row: impl FnMut(i32, i32, i32),
) {
    let quad = trans_scale(x, y, scale, zoom, corners);

    // clip to the quad's x-range, as steep angles cause overshooting
    let mut min = f32::MAX;
    let mut max = f32::MIN;
    for i in (0..8).step_by(2) {
        min = min.min(quad[i]);
        max = max.max(quad[i]);
    }
    min = min.floor();
    max = max.ceil();
    if min == max {
        max += 1.0;
    }

    let mut scan = Scan {
        zoom,
        xmin: min as i32,
        xmax: max as i32,
        rows: HashMap::default(),
    };

    scan.scan_triangle(
        Edge::new(quad[0], quad[1], quad[2], quad[3]),
        Edge::new(quad[2], quad[3], quad[4], quad[5]),
        Edge::new(quad[4], quad[5], quad[0], quad[1]),
    );
    scan.scan_triangle(
        Edge::new(quad[0], quad[1], quad[4], quad[5]),
        Edge::new(quad[4], quad[5], quad[6], quad[7]),
        Edge::new(quad[6], quad[7], quad[0], quad[1]),
    );

    let mut rows: Vec<_> = scan.rows.into_iter().collect();
    rows.sort_unstable_by_key(|(y, _)| *y);
    for (y, (x1, x2)) in rows {
        row(y, x1, x2);
    }
}
