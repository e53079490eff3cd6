//! Trip shapes: the ordered, deduplicated polyline a vehicle is expected to follow.

use std::collections::HashMap;

use geo::Coord;
use log::debug;

use crate::geo_utils::distance;
use crate::{ShapePoint, ShapeRow};

/// The path of one `shape_id`, with precomputed segment lengths.
///
/// Immutable after construction, so a single instance can be shared by every trip
/// that runs on the shape, across threads.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteShape {
    pub shape_id: String,
    /// Deduplicated points, renumbered `1..=N` in travel order
    pub points: Vec<ShapePoint>,
    /// `segment_lengths[i]` is the distance from `points[i]` to `points[i + 1]`
    pub segment_lengths: Vec<f64>,
    /// `cumulative[i]` is the distance along the shape from `points[0]` to `points[i]`
    cumulative: Vec<f64>,
}

impl RouteShape {
    /// Build a shape from its raw rows.
    ///
    /// Rows are ordered by `sequence` first (a stable sort, in case the feed is not
    /// already in order), then consecutive duplicates are dropped. A shape without
    /// rows is valid and reports [`RouteShape::is_missing`].
    ///
    /// # Example
    /// ```
    /// use route_odometer::{RouteShape, ShapeRow};
    ///
    /// let rows = vec![
    ///     ShapeRow::new("s1", 0.0, 0.0, 1),
    ///     ShapeRow::new("s1", 0.0, 0.0, 2),
    ///     ShapeRow::new("s1", 0.0, 1.0, 3),
    /// ];
    /// let shape = RouteShape::from_rows("s1", &rows);
    /// assert_eq!(shape.points.len(), 2);
    /// assert_eq!(shape.segment_lengths, vec![1.0]);
    /// ```
    pub fn from_rows(shape_id: &str, rows: &[ShapeRow]) -> Self {
        let mut sorted: Vec<&ShapeRow> = rows.iter().collect();
        sorted.sort_by_key(|row| row.sequence);

        let raw: Vec<ShapePoint> = sorted
            .into_iter()
            .map(|row| ShapePoint::new(row.lat, row.lon, row.sequence))
            .collect();

        Self::from_points(shape_id, &raw)
    }

    /// Build a shape from points already in travel order.
    pub fn from_points(shape_id: &str, points: &[ShapePoint]) -> Self {
        let points = dedupe_points(points);
        let segment_lengths = segment_lengths(&points);

        let mut cumulative = Vec::with_capacity(points.len());
        let mut total = 0.0;
        if !points.is_empty() {
            cumulative.push(total);
        }
        for len in &segment_lengths {
            total += len;
            cumulative.push(total);
        }

        Self {
            shape_id: shape_id.to_string(),
            points,
            segment_lengths,
            cumulative,
        }
    }

    /// True when the trip has no path data at all.
    pub fn is_missing(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Coordinate of the point at zero-based `index`.
    #[inline]
    pub fn coord(&self, index: usize) -> Coord {
        self.points[index].coord()
    }

    /// Distance along the shape from the first point to the point at zero-based `index`.
    ///
    /// Equal to `segment_lengths[..index].iter().sum()`.
    #[inline]
    pub fn distance_to(&self, index: usize) -> f64 {
        self.cumulative[index]
    }

    /// Total length of the shape.
    pub fn total_length(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
}

/// Drop every point equal to the previously kept point in both coordinates, then
/// renumber the kept points `1..=N`.
///
/// A change in either coordinate keeps the point. Running this twice gives the same
/// result as running it once.
pub fn dedupe_points(points: &[ShapePoint]) -> Vec<ShapePoint> {
    let mut kept: Vec<ShapePoint> = Vec::with_capacity(points.len());
    for point in points {
        if let Some(last) = kept.last() {
            if last.lat == point.lat && last.lon == point.lon {
                continue;
            }
        }
        kept.push(ShapePoint::new(point.lat, point.lon, kept.len() as u32 + 1));
    }
    kept
}

/// Distances between consecutive points; one shorter than the input.
pub fn segment_lengths(points: &[ShapePoint]) -> Vec<f64> {
    points
        .windows(2)
        .map(|w| distance(w[0].coord(), w[1].coord()))
        .collect()
}

/// Group raw rows by `shape_id` and build every shape once.
pub fn build_shapes(rows: &[ShapeRow]) -> HashMap<String, RouteShape> {
    let mut rows_per_shape: HashMap<&str, Vec<ShapeRow>> = HashMap::new();
    for row in rows {
        rows_per_shape
            .entry(row.shape_id.as_str())
            .or_default()
            .push(row.clone());
    }

    rows_per_shape
        .into_iter()
        .map(|(shape_id, rows)| {
            let shape = RouteShape::from_rows(shape_id, &rows);
            debug!(
                "[Shapes] {} has {} points ({} raw), length {:.5}",
                shape_id,
                shape.len(),
                rows.len(),
                shape.total_length()
            );
            (shape_id.to_string(), shape)
        })
        .collect()
}
