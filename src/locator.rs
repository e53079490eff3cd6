//! Windowed nearest shape-point search.
//!
//! A global nearest-neighbour query is wrong for shapes that loop or cross
//! themselves: the same location appears at several positions along the path, and
//! a vehicle only ever moves forward. The search is therefore limited to a window
//! of points that starts at the previous fix's position.

use geo::Coord;

use crate::geo_utils::distance;
use crate::shape::RouteShape;

/// Default number of shape points examined per search.
pub const DEFAULT_SEARCH_WINDOW: usize = 100;

/// Find the shape point closest to `point`.
///
/// `previous` is the zero-based position matched by the previous fix of the same
/// trip. The window covers at most `window` points starting there (or at the first
/// point when there is no previous fix). Candidates are ranked by distance and the
/// first one at or after `previous` wins; if none qualifies the closest candidate is
/// used.
///
/// Returns the 1-based sequence number of the chosen point (its zero-based position
/// is the sequence minus one), or `None` for an empty shape.
///
/// # Example
/// ```
/// use geo::Coord;
/// use route_odometer::{find_nearest, RouteShape, ShapePoint};
///
/// let shape = RouteShape::from_points("loop", &[
///     ShapePoint::new(0.0, 0.0, 1),
///     ShapePoint::new(0.0, 1.0, 2),
///     ShapePoint::new(0.0, 2.0, 3),
/// ]);
/// assert_eq!(find_nearest(&shape, Coord { x: 0.0, y: 1.1 }, None, 100), Some(2));
/// ```
pub fn find_nearest(shape: &RouteShape, point: Coord, previous: Option<usize>, window: usize) -> Option<u32> {
    if shape.is_empty() {
        return None;
    }

    let start = previous.unwrap_or(0).min(shape.len() - 1);
    let end = (start + window.max(1)).min(shape.len());

    let mut candidates: Vec<(usize, f64)> = (start..end)
        .map(|idx| (idx, distance(shape.coord(idx), point)))
        .collect();
    // Stable, so equidistant points keep travel order
    candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

    let chosen = match previous {
        Some(prev) => candidates
            .iter()
            .find(|(idx, _)| *idx >= prev)
            .or_else(|| candidates.first()),
        None => candidates.first(),
    };

    chosen.map(|(idx, _)| shape.points[*idx].sequence)
}
