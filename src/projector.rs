//! Nearest-point projection of a coordinate onto a polyline.
//!
//! The segment parameter `t` is computed with planar algebra on raw
//! (lon, lat) degrees. Route segments are short enough that the distortion
//! is irrelevant for ordering stops; the reported distance is geodesic.

use crate::geodesy::{Coordinate, distance};

/// Position of a point along a polyline.
///
/// `fractional_index = segment + t` with `t` in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPosition {
    pub fractional_index: f64,
    pub distance_m: f64,
}

impl ProjectedPosition {
    pub fn segment(&self) -> usize {
        self.fractional_index.floor() as usize
    }
}

/// Projects `point` onto `line`, returning the closest position.
///
/// Ties go to the lowest segment index. Returns `None` when `line` has fewer
/// than two points.
pub fn project(point: Coordinate, line: &[Coordinate]) -> Option<ProjectedPosition> {
    if line.len() < 2 {
        return None;
    }

    let mut best: Option<ProjectedPosition> = None;

    for (i, seg) in line.windows(2).enumerate() {
        let (p1, p2) = (seg[0], seg[1]);
        let dx = p2.lon - p1.lon;
        let dy = p2.lat - p1.lat;
        let len2 = dx * dx + dy * dy;

        // Zero-length segments collapse to a point check.
        let t = if len2 == 0.0 {
            0.0
        } else {
            (((point.lon - p1.lon) * dx + (point.lat - p1.lat) * dy) / len2).clamp(0.0, 1.0)
        };

        let candidate = Coordinate::new(p1.lon + t * dx, p1.lat + t * dy);
        let d = distance(point, candidate);

        if best.is_none_or(|b| d < b.distance_m) {
            best = Some(ProjectedPosition {
                fractional_index: i as f64 + t,
                distance_m: d,
            });
        }
    }

    best
}

/// Resolves a fractional index back to a coordinate on `line` by linear
/// interpolation between the two bracketing vertices.
///
/// Indices outside the line are clamped to its ends.
pub fn interpolate(line: &[Coordinate], fractional_index: f64) -> Option<Coordinate> {
    let last = line.len().checked_sub(1)?;
    let clamped = fractional_index.clamp(0.0, last as f64);
    let i = (clamped.floor() as usize).min(last);
    if i == last {
        return Some(line[last]);
    }
    let t = clamped - i as f64;
    let (a, b) = (line[i], line[i + 1]);
    Some(Coordinate::new(
        a.lon + t * (b.lon - a.lon),
        a.lat + t * (b.lat - a.lat),
    ))
}
