//! # Algorithm Toolbox
//!
//! Planar line arithmetic shared by the centreline, the spatial index and the
//! chainage layer. All functions work in projected metres.
//!
//! ## Line Utilities
//!
//! - **Interpolation**: point at a normalised position along a polyline
//! - **Location**: normalised position of the projection of a point
//! - **Vertex fractions**: running normalised arc position of each vertex
//! - **Resampling**: fixed-step sampling along a polyline
//! - **Normals**: unit perpendicular to a direction, offset from a baseline
//!
//! # Example
//!
//! ```rust
//! use geo::{Coord, LineString};
//! use road_centreline::algorithms::{interpolate, line_length};
//!
//! let line = LineString::from(vec![(0.0, 0.0), (100.0, 0.0)]);
//! assert_eq!(line_length(&line), 100.0);
//! assert_eq!(interpolate(&line, 0.25), Some(Coord { x: 25.0, y: 0.0 }));
//! ```

use geo::{Coord, Euclidean, Length, LineInterpolatePoint, LineLocatePoint, LineString, Point};

/// Baselines shorter than this are treated as degenerate.
pub const DEGENERATE_LENGTH: f64 = 1e-9;

/// Euclidean length of a polyline.
pub fn line_length(line: &LineString<f64>) -> f64 {
    line.length::<Euclidean>()
}

/// Point at normalised position `fraction` along `line`.
///
/// The fraction is clamped to [0, 1]. Returns `None` for empty lines or a
/// non-finite fraction.
pub fn interpolate(line: &LineString<f64>, fraction: f64) -> Option<Coord<f64>> {
    if !fraction.is_finite() {
        return None;
    }
    let fraction = fraction.clamp(0.0, 1.0);
    match line.0.len() {
        0 => None,
        1 => Some(line.0[0]),
        _ if line_length(line) <= 0.0 => Some(line.0[0]),
        _ => line.line_interpolate_point(fraction).map(|p| p.0),
    }
}

/// Normalised position along `line` of the point closest to `point`.
pub fn locate(line: &LineString<f64>, point: &Point<f64>) -> Option<f64> {
    line.line_locate_point(point)
}

/// Running normalised arc position of every vertex.
///
/// The first vertex is 0 and the last 1. A zero-length line yields all zeros.
pub fn vertex_fractions(line: &LineString<f64>) -> Vec<f64> {
    let mut running = Vec::with_capacity(line.0.len());
    let mut total = 0.0;
    let mut prev: Option<Coord<f64>> = None;
    for coord in line.coords() {
        if let Some(p) = prev {
            total += distance(p, *coord);
        }
        running.push(total);
        prev = Some(*coord);
    }
    if total > 0.0 {
        for value in running.iter_mut() {
            *value /= total;
        }
    }
    running
}

/// Index of the first vertex whose running position exceeds `fraction`, or
/// the last vertex when none does.
pub fn first_vertex_past(fractions: &[f64], fraction: f64) -> usize {
    fractions
        .iter()
        .position(|&f| f > fraction)
        .unwrap_or_else(|| fractions.len().saturating_sub(1))
}

/// Sample `line` every `step` metres.
///
/// Offset 0 is skipped; the final vertex is always included exactly.
pub fn resample(line: &LineString<f64>, step: f64) -> Vec<Coord<f64>> {
    let Some(&last) = line.0.last() else {
        return vec![];
    };
    let length = line_length(line);
    if step <= 0.0 || length <= 0.0 {
        return vec![last];
    }

    let mut samples = Vec::with_capacity((length / step) as usize + 1);
    let mut target = step;
    let mut travelled = 0.0;

    for window in line.0.windows(2) {
        let (a, b) = (window[0], window[1]);
        let seg_len = distance(a, b);
        while target < length && travelled + seg_len >= target {
            let ratio = if seg_len > 0.0 {
                (target - travelled) / seg_len
            } else {
                0.0
            };
            samples.push(Coord {
                x: a.x + ratio * (b.x - a.x),
                y: a.y + ratio * (b.y - a.y),
            });
            target += step;
        }
        travelled += seg_len;
    }

    samples.push(last);
    samples
}

/// Distance between two coordinates.
pub fn distance(a: Coord<f64>, b: Coord<f64>) -> f64 {
    (b.x - a.x).hypot(b.y - a.y)
}

/// Perpendicular distance from `p3` to the infinite line through `p1` and `p2`:
/// |cross(p2 - p1, p1 - p3)| / |p2 - p1|.
///
/// Returns `None` when `p1` and `p2` coincide.
pub fn perpendicular_offset(p1: Coord<f64>, p2: Coord<f64>, p3: Coord<f64>) -> Option<f64> {
    let base = distance(p1, p2);
    if base < DEGENERATE_LENGTH {
        return None;
    }
    let cross = (p2.x - p1.x) * (p1.y - p3.y) - (p2.y - p1.y) * (p1.x - p3.x);
    Some(cross.abs() / base)
}

/// Unit vector perpendicular to the direction `from -> to`, rotated 90°
/// counter-clockwise.
///
/// Works for any orientation, vertical and horizontal included. Returns
/// `None` when the direction has zero length.
pub fn unit_normal(from: Coord<f64>, to: Coord<f64>) -> Option<Coord<f64>> {
    let len = distance(from, to);
    if len < DEGENERATE_LENGTH {
        return None;
    }
    Some(Coord {
        x: -(to.y - from.y) / len,
        y: (to.x - from.x) / len,
    })
}

/// Offset `origin` by `distance` along `direction`.
pub fn offset_coord(origin: Coord<f64>, direction: Coord<f64>, distance: f64) -> Coord<f64> {
    Coord {
        x: origin.x + direction.x * distance,
        y: origin.y + direction.y * distance,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn l_shape() -> LineString<f64> {
        LineString::from(vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0)])
    }

    #[test]
    fn test_interpolate_clamps() {
        let line = l_shape();
        assert_eq!(interpolate(&line, 0.5), Some(Coord { x: 10.0, y: 0.0 }));
        assert_eq!(interpolate(&line, -1.0), Some(Coord { x: 0.0, y: 0.0 }));
        assert_eq!(interpolate(&line, 2.0), Some(Coord { x: 10.0, y: 10.0 }));
        assert_eq!(interpolate(&line, f64::NAN), None);
        assert_eq!(interpolate(&LineString::new(vec![]), 0.5), None);
    }

    #[test]
    fn test_vertex_fractions() {
        assert_eq!(vertex_fractions(&l_shape()), vec![0.0, 0.5, 1.0]);
        let zero = LineString::from(vec![(1.0, 1.0), (1.0, 1.0)]);
        assert_eq!(vertex_fractions(&zero), vec![0.0, 0.0]);
    }

    #[test]
    fn test_first_vertex_past() {
        let fractions = vec![0.0, 0.5, 1.0];
        assert_eq!(first_vertex_past(&fractions, 0.0), 1);
        assert_eq!(first_vertex_past(&fractions, 0.25), 1);
        assert_eq!(first_vertex_past(&fractions, 0.5), 2);
        assert_eq!(first_vertex_past(&fractions, 1.0), 2);
    }

    #[test]
    fn test_resample_skips_start_and_keeps_end() {
        let samples = resample(&l_shape(), 3.0);
        // 3, 6, 9, 12, 15, 18 then the final vertex at 20
        assert_eq!(samples.len(), 7);
        assert_eq!(samples[0], Coord { x: 3.0, y: 0.0 });
        assert_eq!(samples[3], Coord { x: 10.0, y: 2.0 });
        assert_eq!(*samples.last().unwrap(), Coord { x: 10.0, y: 10.0 });
    }

    #[test]
    fn test_resample_exact_multiple_has_no_duplicate_end() {
        let line = LineString::from(vec![(0.0, 0.0), (4.0, 0.0)]);
        let samples = resample(&line, 2.0);
        assert_eq!(
            samples,
            vec![Coord { x: 2.0, y: 0.0 }, Coord { x: 4.0, y: 0.0 }]
        );
    }

    #[test]
    fn test_perpendicular_offset() {
        let p1 = Coord { x: 0.0, y: 0.0 };
        let p2 = Coord { x: 2.0, y: 0.0 };
        assert_eq!(
            perpendicular_offset(p1, p2, Coord { x: 5.0, y: 3.0 }),
            Some(3.0)
        );
        assert_eq!(perpendicular_offset(p1, p1, Coord { x: 5.0, y: 3.0 }), None);
    }

    #[test]
    fn test_unit_normal_vertical_and_horizontal() {
        let origin = Coord { x: 0.0, y: 0.0 };
        assert_eq!(
            unit_normal(origin, Coord { x: 0.0, y: 5.0 }),
            Some(Coord { x: -1.0, y: 0.0 })
        );
        assert_eq!(
            unit_normal(origin, Coord { x: 5.0, y: 0.0 }),
            Some(Coord { x: -0.0, y: 1.0 })
        );
        assert_eq!(unit_normal(origin, origin), None);
    }
}
