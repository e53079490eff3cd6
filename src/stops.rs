//! Stop assignment for fixes.
//!
//! Fixes normally arrive already tagged with the stop they are nearest to. When one
//! is not, it is assigned the closest stop among those its trip visits, using an
//! R-tree over the trip's stops in the same flat lat/lon plane as the odometer.

use std::collections::{HashMap, HashSet};

use geo::Coord;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

use crate::geo_utils::distance;
use crate::Stop;

/// A stop position for R-tree queries
#[derive(Debug, Clone)]
struct IndexedStop {
    stop_id: String,
    lat: f64,
    lon: f64,
}

impl RTreeObject for IndexedStop {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.lat, self.lon])
    }
}

impl PointDistance for IndexedStop {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dlat = self.lat - point[0];
        let dlon = self.lon - point[1];
        dlat * dlat + dlon * dlon
    }
}

/// Spatial index over the stops of one trip.
pub struct TripStops {
    tree: RTree<IndexedStop>,
}

impl TripStops {
    /// Index the stops whose ids appear in `stop_ids`. Ids without a known stop are
    /// skipped.
    pub fn new(stops: &HashMap<String, Stop>, stop_ids: &HashSet<&str>) -> Self {
        let indexed: Vec<IndexedStop> = stop_ids
            .iter()
            .filter_map(|id| stops.get(*id))
            .map(|stop| IndexedStop {
                stop_id: stop.stop_id.clone(),
                lat: stop.lat,
                lon: stop.lon,
            })
            .collect();
        Self {
            tree: RTree::bulk_load(indexed),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Id of the stop closest to `point`, if the trip has any known stops.
    pub fn nearest(&self, point: Coord) -> Option<&str> {
        self.tree
            .nearest_neighbor(&[point.x, point.y])
            .map(|stop| stop.stop_id.as_str())
    }
}

/// Distance from a fix to its stop, multiplied by `scale`.
pub fn distance_to_stop(fix: Coord, stop: &Stop, scale: f64) -> f64 {
    distance(fix, stop.coord()) * scale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops() -> HashMap<String, Stop> {
        [
            Stop::new("A", 30.0, -97.0),
            Stop::new("B", 30.01, -97.0),
            Stop::new("C", 30.02, -97.0),
            Stop::new("Z", 30.005, -97.0),
        ]
        .into_iter()
        .map(|s| (s.stop_id.clone(), s))
        .collect()
    }

    #[test]
    fn test_nearest_stop_limited_to_trip() {
        let all = stops();
        let visited: HashSet<&str> = ["A", "B", "C"].into_iter().collect();
        let index = TripStops::new(&all, &visited);

        // Z is the closest stop overall but the trip does not serve it
        assert_eq!(index.nearest(Coord { x: 30.0049, y: -97.0 }), Some("A"));
        assert_eq!(index.nearest(Coord { x: 30.0199, y: -97.0001 }), Some("C"));
    }

    #[test]
    fn test_unknown_stop_ids_are_skipped() {
        let all = stops();
        let visited: HashSet<&str> = ["missing"].into_iter().collect();
        let index = TripStops::new(&all, &visited);
        assert!(index.is_empty());
        assert_eq!(index.nearest(Coord { x: 30.0, y: -97.0 }), None);
    }

    #[test]
    fn test_distance_to_stop_scaled() {
        let stop = Stop::new("A", 30.0, -97.0);
        let d = distance_to_stop(Coord { x: 30.001, y: -97.0 }, &stop, 100.0);
        assert!((d - 0.1).abs() < 1e-9);
    }
}
