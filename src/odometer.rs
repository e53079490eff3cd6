//! # Route-Relative Odometer
//!
//! Converts a GPS fix into a distance travelled along its trip's shape.
//!
//! ## Algorithm
//! 1. Find the nearest shape point, never searching behind the previous fix
//! 2. Project the fix onto the segment around that point
//! 3. Distance = distance along the shape up to the point, plus or minus the
//!    offset of the projection from the point
//! 4. Clamp to the previous distance so the odometer never runs backwards
//!
//! The per-trip cursor lives in [`TripState`], owned by the caller and passed into
//! every call, so trips can be processed independently on different threads.

use geo::Coord;

use crate::geo_utils::{distance, project_point_to_segment};
use crate::locator::find_nearest;
use crate::shape::RouteShape;
use crate::TripState;

/// Sentinel distance reported for every fix of a trip without shape data.
pub const MISSING_SHAPE_DISTANCE: f64 = -1.0;

/// Outcome of measuring one fix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometerReading {
    /// Monotonic distance along the shape, or [`MISSING_SHAPE_DISTANCE`]
    pub dist_traveled: f64,
    /// 1-based sequence of the matched shape point (0 when the shape is missing)
    pub nearest_shape_index: u32,
    /// True when the raw distance went backwards and was clamped
    pub regressed: bool,
    /// True when the fix was projected past the nearest point
    pub ahead: bool,
}

impl OdometerReading {
    fn missing_shape() -> Self {
        Self {
            dist_traveled: MISSING_SHAPE_DISTANCE,
            nearest_shape_index: 0,
            regressed: false,
            ahead: false,
        }
    }
}

/// Project the fix onto the segment adjacent to the shape point at zero-based
/// `nearest`.
///
/// Returns the projected point and whether the vehicle is ahead of `nearest`
/// (projected onto the following segment) or behind it (the preceding segment).
///
/// - last point: project onto (previous, nearest), behind
/// - interior point: try (nearest, next); if that lands exactly on either endpoint
///   the direction is ambiguous, so project onto (previous, nearest), behind
/// - first point: project onto (nearest, next), ahead
///
/// A single-point shape has no segment; the point itself is returned, ahead.
pub fn project_vehicle(shape: &RouteShape, fix: Coord, nearest: usize, epsilon: f64) -> (Coord, bool) {
    let closest = shape.coord(nearest);
    let last = shape.len() - 1;

    if last == 0 {
        return (closest, true);
    }

    if nearest == last {
        let before = shape.coord(nearest - 1);
        (project_point_to_segment(fix, before, closest, epsilon), false)
    } else if nearest != 0 {
        let after = shape.coord(nearest + 1);
        let projected = project_point_to_segment(fix, closest, after, epsilon);
        if projected == closest || projected == after {
            let before = shape.coord(nearest - 1);
            (project_point_to_segment(fix, before, closest, epsilon), false)
        } else {
            (projected, true)
        }
    } else {
        let after = shape.coord(nearest + 1);
        (project_point_to_segment(fix, closest, after, epsilon), true)
    }
}

/// Measure one fix and advance the trip cursor.
///
/// Fixes of a trip must be passed in timestamp order. The returned distance is never
/// below `state.prev_dist_traveled`; a smaller raw value is clamped and reported as a
/// regression. A missing shape yields [`MISSING_SHAPE_DISTANCE`] and leaves `state`
/// untouched.
///
/// # Example
/// ```
/// use geo::Coord;
/// use route_odometer::{calc_dist_traveled, RouteShape, ShapePoint, TripState};
///
/// let shape = RouteShape::from_points("s", &[
///     ShapePoint::new(0.0, 0.0, 1),
///     ShapePoint::new(0.0, 1.0, 2),
///     ShapePoint::new(0.0, 2.0, 3),
/// ]);
/// let mut state = TripState::default();
/// let reading = calc_dist_traveled(&shape, Coord { x: 0.0, y: 1.0 }, &mut state, 100, 0.00001);
/// assert_eq!(reading.nearest_shape_index, 2);
/// assert_eq!(reading.dist_traveled, 1.0);
/// // Exactly on a vertex the forward projection is ambiguous, so the fix counts as behind
/// assert!(!reading.ahead);
/// ```
pub fn calc_dist_traveled(
    shape: &RouteShape,
    fix: Coord,
    state: &mut TripState,
    window: usize,
    epsilon: f64,
) -> OdometerReading {
    let nearest_seq = match find_nearest(shape, fix, state.prev_shape_index.map(|i| i as usize), window) {
        Some(seq) => seq,
        None => return OdometerReading::missing_shape(),
    };
    let closest = nearest_seq as usize - 1;

    let (projected, ahead) = project_vehicle(shape, fix, closest, epsilon);

    let partial = shape.distance_to(closest);
    let offset = distance(projected, shape.coord(closest));
    let raw = if ahead { partial + offset } else { partial - offset };

    let regressed = raw < state.prev_dist_traveled;
    let dist_traveled = if regressed { state.prev_dist_traveled } else { raw };

    state.prev_shape_index = Some(closest as u32);
    state.prev_dist_traveled = dist_traveled;

    OdometerReading {
        dist_traveled,
        nearest_shape_index: nearest_seq,
        regressed,
        ahead,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo_utils::DEFAULT_PROJECTION_EPSILON;
    use crate::ShapePoint;

    fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    fn shape_from(coords: &[(f64, f64)]) -> RouteShape {
        let points: Vec<ShapePoint> = coords
            .iter()
            .enumerate()
            .map(|(i, (lat, lon))| ShapePoint::new(*lat, *lon, i as u32 + 1))
            .collect();
        RouteShape::from_points("test", &points)
    }

    fn measure(shape: &RouteShape, state: &mut TripState, lat: f64, lon: f64) -> OdometerReading {
        calc_dist_traveled(shape, Coord { x: lat, y: lon }, state, 100, DEFAULT_PROJECTION_EPSILON)
    }

    #[test]
    fn test_fix_on_vertex() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.0, 1.0);

        assert_eq!(reading.nearest_shape_index, 2);
        assert_eq!(reading.dist_traveled, 1.0);
        // The forward projection lands on the vertex itself
        assert!(!reading.ahead);
        assert!(!reading.regressed);
        assert_eq!(state.prev_shape_index, Some(1));
        assert_eq!(state.prev_dist_traveled, 1.0);
    }

    #[test]
    fn test_fix_between_vertices_ahead() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.1, 1.3);

        assert_eq!(reading.nearest_shape_index, 2);
        assert!(reading.ahead);
        assert!(approx_eq(reading.dist_traveled, 1.3, 1e-9));
    }

    #[test]
    fn test_fix_between_vertices_behind() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.1, 0.7);

        // Nearest is the middle point; projecting forward snaps to it, so the
        // preceding segment is used instead
        assert_eq!(reading.nearest_shape_index, 2);
        assert!(!reading.ahead);
        assert!(approx_eq(reading.dist_traveled, 0.7, 1e-9));
    }

    #[test]
    fn test_fix_at_first_point() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.0, 0.2);
        assert_eq!(reading.nearest_shape_index, 1);
        assert!(reading.ahead);
        assert!(approx_eq(reading.dist_traveled, 0.2, 1e-9));
    }

    #[test]
    fn test_fix_at_last_point_is_behind() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.0, 1.8);
        assert_eq!(reading.nearest_shape_index, 3);
        assert!(!reading.ahead);
        assert!(approx_eq(reading.dist_traveled, 1.8, 1e-9));
    }

    #[test]
    fn test_single_point_shape() {
        let shape = shape_from(&[(1.0, 1.0)]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 1.5, 1.5);
        assert_eq!(reading.nearest_shape_index, 1);
        assert_eq!(reading.dist_traveled, 0.0);
    }

    #[test]
    fn test_regression_is_clamped() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (0.0, 2.0), (0.0, 3.0)]);
        let mut state = TripState::default();

        let first = measure(&shape, &mut state, 0.0, 1.6);
        assert!(!first.regressed);

        // GPS jitter moves the vehicle back along the same segment
        let second = measure(&shape, &mut state, 0.0, 1.2);
        assert!(second.regressed);
        assert_eq!(second.dist_traveled, first.dist_traveled);
        assert_eq!(state.prev_dist_traveled, first.dist_traveled);
    }

    #[test]
    fn test_distances_are_monotonic() {
        let shape = shape_from(&[(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 2.0), (2.0, 2.0)]);
        let fixes = [
            (0.05, 0.1),
            (0.0, 0.6),
            (0.1, 0.9),
            (-0.1, 0.5), // noisy fix behind the vehicle
            (0.5, 1.1),
            (1.0, 1.05),
            (1.1, 1.7),
            (1.9, 2.1),
            (1.5, 1.9),
        ];
        let mut state = TripState::default();
        let mut last = f64::MIN;
        for (lat, lon) in fixes {
            let reading = measure(&shape, &mut state, lat, lon);
            assert!(reading.dist_traveled >= last);
            last = reading.dist_traveled;
        }
    }

    #[test]
    fn test_missing_shape_leaves_state_untouched() {
        let shape = shape_from(&[]);
        let mut state = TripState::default();
        let reading = measure(&shape, &mut state, 0.0, 0.0);
        assert_eq!(reading.dist_traveled, MISSING_SHAPE_DISTANCE);
        assert!(!reading.regressed);
        assert_eq!(state, TripState::default());
    }
}
