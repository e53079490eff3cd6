//! # Geometry Primitives
//!
//! Planar geometry used by the odometer.
//!
//! | Function | Description |
//! |----------|-------------|
//! | [`distance`] | Euclidean distance between two coordinates |
//! | [`project_point_to_segment`] | Closest point of a segment to a point |
//!
//! ## Coordinate System
//!
//! Latitude and longitude are treated as a flat `(x, y)` plane: `x` is latitude and
//! `y` is longitude, both in degrees. No geodesic correction is applied, so every
//! distance returned here is in "degrees" and is only meaningful over city-scale
//! extents. Transit shapes and vehicle fixes are compared in the same units, which
//! is all the route-relative odometer needs.
//!
//! ## Example
//!
//! ```rust
//! use geo::Coord;
//! use route_odometer::geo_utils;
//!
//! let a = Coord { x: 0.0, y: 0.0 };
//! let b = Coord { x: 3.0, y: 4.0 };
//! assert_eq!(geo_utils::distance(a, b), 5.0);
//! ```

use geo::{Coord, Distance, Euclidean, Point};

/// Projections with a scalar parameter below this value snap to an endpoint.
pub const DEFAULT_PROJECTION_EPSILON: f64 = 0.00001;

// =============================================================================
// Distance Functions
// =============================================================================

/// Euclidean distance between two coordinates, `sqrt(dx² + dy²)`.
#[inline]
pub fn distance(p1: Coord, p2: Coord) -> f64 {
    Euclidean::distance(Point::from(p1), Point::from(p2))
}

// =============================================================================
// Projection
// =============================================================================

/// Project `point` onto the segment `seg_start -> seg_end`.
///
/// Uses the scalar projection
/// `u = dot(point - seg_start, seg_end - seg_start) / |seg_end - seg_start|²`.
/// When `u` falls outside `[epsilon, 1]` the projection is not inside the segment and
/// the nearer endpoint is returned instead; on an exact tie `seg_start` wins because
/// `seg_end` is only chosen when it is strictly closer. Otherwise the interpolated
/// point `seg_start + u * (seg_end - seg_start)` is returned.
///
/// The segment must not be degenerate: shapes are deduplicated before any
/// projection, so consecutive shape points always differ.
///
/// # Example
///
/// ```rust
/// use geo::Coord;
/// use route_odometer::geo_utils::{project_point_to_segment, DEFAULT_PROJECTION_EPSILON};
///
/// let projected = project_point_to_segment(
///     Coord { x: 0.5, y: 1.0 },
///     Coord { x: 0.0, y: 0.0 },
///     Coord { x: 1.0, y: 0.0 },
///     DEFAULT_PROJECTION_EPSILON,
/// );
/// assert_eq!(projected, Coord { x: 0.5, y: 0.0 });
/// ```
pub fn project_point_to_segment(point: Coord, seg_start: Coord, seg_end: Coord, epsilon: f64) -> Coord {
    let magnitude = distance(seg_start, seg_end);
    let u = ((point.x - seg_start.x) * (seg_end.x - seg_start.x)
        + (point.y - seg_start.y) * (seg_end.y - seg_start.y))
        / (magnitude * magnitude);

    if u < epsilon || u > 1.0 {
        let to_start = distance(point, seg_start);
        let to_end = distance(point, seg_end);
        if to_start > to_end {
            seg_end
        } else {
            seg_start
        }
    } else {
        Coord {
            x: seg_start.x + u * (seg_end.x - seg_start.x),
            y: seg_start.y + u * (seg_end.y - seg_start.y),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn c(x: f64, y: f64) -> Coord {
        Coord { x, y }
    }

    #[test]
    fn test_distance_same_point() {
        let p = c(30.2672, -97.7431);
        assert_eq!(distance(p, p), 0.0);
    }

    #[test]
    fn test_distance_known_value() {
        assert_eq!(distance(c(0.0, 0.0), c(3.0, 4.0)), 5.0);
        assert_eq!(distance(c(0.0, 0.0), c(0.0, 1.0)), 1.0);
    }

    #[test]
    fn test_project_inside_segment() {
        let projected = project_point_to_segment(c(0.25, 0.5), c(0.0, 0.0), c(0.0, 2.0), DEFAULT_PROJECTION_EPSILON);
        assert!(approx_eq(projected.x, 0.0, 1e-12));
        assert!(approx_eq(projected.y, 0.5, 1e-12));
    }

    #[test]
    fn test_project_before_start_snaps_to_start() {
        let projected = project_point_to_segment(c(0.0, -1.0), c(0.0, 0.0), c(0.0, 2.0), DEFAULT_PROJECTION_EPSILON);
        assert_eq!(projected, c(0.0, 0.0));
    }

    #[test]
    fn test_project_past_end_snaps_to_end() {
        let projected = project_point_to_segment(c(0.1, 3.0), c(0.0, 0.0), c(0.0, 2.0), DEFAULT_PROJECTION_EPSILON);
        assert_eq!(projected, c(0.0, 2.0));
    }

    #[test]
    fn test_project_tiny_u_snaps_to_start() {
        // u is positive but below epsilon
        let projected = project_point_to_segment(c(1.0, 0.000001), c(0.0, 0.0), c(0.0, 1.0), DEFAULT_PROJECTION_EPSILON);
        assert_eq!(projected, c(0.0, 0.0));
    }

    #[test]
    fn test_project_is_idempotent() {
        let start = c(1.0, 1.0);
        let end = c(3.0, 2.0);
        let once = project_point_to_segment(c(2.0, 3.0), start, end, DEFAULT_PROJECTION_EPSILON);
        let twice = project_point_to_segment(once, start, end, DEFAULT_PROJECTION_EPSILON);
        assert!(approx_eq(once.x, twice.x, 1e-9));
        assert!(approx_eq(once.y, twice.y, 1e-9));
    }

    #[test]
    fn test_project_endpoint_onto_itself() {
        let start = c(0.0, 0.0);
        let end = c(0.0, 1.0);
        assert_eq!(project_point_to_segment(end, start, end, DEFAULT_PROJECTION_EPSILON), end);
        assert_eq!(project_point_to_segment(start, start, end, DEFAULT_PROJECTION_EPSILON), start);
    }
}
