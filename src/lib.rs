//! # Route Odometer
//!
//! Route-relative position and schedule adherence for transit vehicle GPS fixes.
//!
//! This library provides:
//! - A monotonic odometer: distance travelled along the trip's GTFS shape for every fix
//! - Schedule matching with overnight (`24:00:00`+) arrival handling
//! - Arrival selection: one representative fix per (trip, stop) visit
//! - Parallel per-trip processing
//!
//! ## Features
//!
//! - **`parallel`** - Process trips in parallel with rayon (default)
//! - **`io`** - CSV readers/writers for GTFS tables, vehicle fixes and results
//! - **`cli`** - The `route-odometer` command-line tool
//! - **`full`** - Enable all features
//!
//! ## Quick Start
//!
//! ```rust
//! use std::collections::HashMap;
//! use chrono::{TimeZone, Utc};
//! use route_odometer::{process_fixes, EngineConfig, Schedule, ShapeRow, TransitFeed, VehicleFix};
//!
//! let shape_rows = vec![
//!     ShapeRow::new("s1", 0.0, 0.0, 1),
//!     ShapeRow::new("s1", 0.0, 1.0, 2),
//!     ShapeRow::new("s1", 0.0, 2.0, 3),
//! ];
//! let trip_shapes = HashMap::from([("t1".to_string(), "s1".to_string())]);
//! let feed = TransitFeed::new(&shape_rows, trip_shapes, Schedule::default(), vec![]);
//!
//! let fixes = vec![
//!     VehicleFix::new("t1", "r1", 0.0, 0.5, Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap()),
//!     VehicleFix::new("t1", "r1", 0.1, 1.5, Utc.with_ymd_and_hms(2024, 3, 5, 14, 1, 0).unwrap()),
//! ];
//!
//! let run = process_fixes(&feed, fixes, &EngineConfig::default()).unwrap();
//! assert_eq!(run.fixes.len(), 2);
//! assert!(run.fixes[1].dist_traveled > run.fixes[0].dist_traveled);
//! ```

use chrono::{DateTime, Utc};
use geo::Coord;

pub mod arrivals;
pub mod error;
pub mod geo_utils;
pub mod locator;
pub mod odometer;
pub mod pipeline;
pub mod schedule;
pub mod shape;
pub mod stops;

#[cfg(feature = "io")]
pub mod io;

pub use arrivals::{group_by_trip_stop, select_arrival, select_arrivals, ArrivalSelection, DEFAULT_ARRIVAL_PROXIMITY};
pub use error::{Error, Result};
pub use locator::{find_nearest, DEFAULT_SEARCH_WINDOW};
pub use odometer::{calc_dist_traveled, project_vehicle, OdometerReading, MISSING_SHAPE_DISTANCE};
pub use pipeline::{process_fixes, process_trip, ProcessedRun, RunCounters, RunSummary, TransitFeed};
pub use schedule::{
    schedule_deviation, scheduled_time, GtfsTime, Schedule, ScheduleRow, ServiceDays, TripTimetable,
};
pub use shape::{build_shapes, RouteShape};
pub use stops::{distance_to_stop, TripStops};

// ============================================================================
// Core Types
// ============================================================================

/// One vertex of a trip's path, in travel order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShapePoint {
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
}

impl ShapePoint {
    pub fn new(lat: f64, lon: f64, sequence: u32) -> Self {
        Self { lat, lon, sequence }
    }

    /// Planar coordinate, `x` = latitude and `y` = longitude.
    pub fn coord(&self) -> Coord {
        Coord { x: self.lat, y: self.lon }
    }
}

/// A raw `shapes.txt` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeRow {
    pub shape_id: String,
    pub lat: f64,
    pub lon: f64,
    pub sequence: u32,
}

impl ShapeRow {
    pub fn new(shape_id: &str, lat: f64, lon: f64, sequence: u32) -> Self {
        Self {
            shape_id: shape_id.to_string(),
            lat,
            lon,
            sequence,
        }
    }
}

/// A transit stop.
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub stop_id: String,
    pub name: Option<String>,
    pub lat: f64,
    pub lon: f64,
}

impl Stop {
    pub fn new(stop_id: &str, lat: f64, lon: f64) -> Self {
        Self {
            stop_id: stop_id.to_string(),
            name: None,
            lat,
            lon,
        }
    }

    pub fn coord(&self) -> Coord {
        Coord { x: self.lat, y: self.lon }
    }
}

/// A single GPS report from a vehicle, plus the values computed for it.
///
/// The raw telemetry fields are set by the reader; everything from
/// `dist_traveled` on is filled in by [`process_fixes`].
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleFix {
    pub vehicle_id: Option<String>,
    pub trip_id: String,
    pub route_id: String,
    /// Stop the fix was matched to. Assigned by the pipeline when missing.
    pub stop_id: Option<String>,
    pub lat: f64,
    pub lon: f64,
    pub timestamp: DateTime<Utc>,
    pub speed: Option<f64>,

    /// Distance along the trip's shape, or [`MISSING_SHAPE_DISTANCE`]
    pub dist_traveled: f64,
    /// 1-based sequence of the matched shape point (0 when unmatched)
    pub nearest_shape_index: u32,
    pub sched_time: Option<DateTime<Utc>>,
    /// Seconds behind (positive) or ahead of (negative) schedule
    pub sched_dev: Option<i64>,
    /// Scaled distance to `stop_id`, `None` when the stop location is unknown
    pub distance_to_stop: Option<f64>,
    /// Headsign of the trip, empty when the feed has none
    pub trip_headsign: String,
    /// ISO weekday of the local timestamp, Monday = 1
    pub day_of_week: u32,
    /// Hour of the local timestamp
    pub hour_of_day: u32,
}

impl VehicleFix {
    /// Create a fix with no computed values yet.
    pub fn new(trip_id: &str, route_id: &str, lat: f64, lon: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            vehicle_id: None,
            trip_id: trip_id.to_string(),
            route_id: route_id.to_string(),
            stop_id: None,
            lat,
            lon,
            timestamp,
            speed: None,
            dist_traveled: 0.0,
            nearest_shape_index: 0,
            sched_time: None,
            sched_dev: None,
            distance_to_stop: None,
            trip_headsign: String::new(),
            day_of_week: 0,
            hour_of_day: 0,
        }
    }

    pub fn with_stop(mut self, stop_id: &str) -> Self {
        self.stop_id = Some(stop_id.to_string());
        self
    }

    pub fn coord(&self) -> Coord {
        Coord { x: self.lat, y: self.lon }
    }

    /// A fix belongs to a revenue trip when it carries both a trip and a route.
    pub fn is_in_service(&self) -> bool {
        !self.trip_id.trim().is_empty() && !self.route_id.trim().is_empty()
    }

    /// Reject fixes whose coordinates cannot be measured.
    pub fn validate(&self) -> Result<()> {
        if self.lat.is_finite() && self.lon.is_finite() {
            Ok(())
        } else {
            Err(Error::InvalidFix {
                trip_id: self.trip_id.clone(),
                timestamp: self.timestamp.to_rfc3339(),
                lat: self.lat,
                lon: self.lon,
            })
        }
    }
}

/// Per-trip odometer cursor.
///
/// One per trip, starting from `TripState::default()` at the beginning of a run.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TripState {
    /// Zero-based shape position matched by the previous fix
    pub prev_shape_index: Option<u32>,
    /// Odometer value of the previous fix
    pub prev_dist_traveled: f64,
}

/// Tuning knobs for a processing run.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "io", derive(serde::Deserialize), serde(default))]
pub struct EngineConfig {
    /// Shape points examined per nearest-point search.
    /// Default: 100
    pub search_window: usize,

    /// Scalar projections below this value snap to the nearer segment endpoint.
    /// Default: 0.00001
    pub projection_epsilon: f64,

    /// Maximum distance to stop for a fix to count towards an arrival, in scaled units.
    /// Default: 0.25 (about 250 m at the default scale)
    pub arrival_proximity_threshold: f64,

    /// Factor applied to the planar fix-to-stop distance.
    /// Default: 100.0
    pub distance_to_stop_scale: f64,

    /// Agency time zone, used for service days and scheduled times.
    /// Default: America/Chicago
    pub timezone: chrono_tz::Tz,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            search_window: DEFAULT_SEARCH_WINDOW,
            projection_epsilon: geo_utils::DEFAULT_PROJECTION_EPSILON,
            arrival_proximity_threshold: DEFAULT_ARRIVAL_PROXIMITY,
            distance_to_stop_scale: 100.0,
            timezone: chrono_tz::America::Chicago,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_fix() -> VehicleFix {
        VehicleFix::new("t1", "r1", 41.88, -87.63, Utc.with_ymd_and_hms(2024, 3, 5, 14, 0, 0).unwrap())
    }

    #[test]
    fn test_in_service() {
        assert!(sample_fix().is_in_service());

        let mut fix = sample_fix();
        fix.route_id = String::new();
        assert!(!fix.is_in_service());

        let mut fix = sample_fix();
        fix.trip_id = "  ".to_string();
        assert!(!fix.is_in_service());
    }

    #[test]
    fn test_validate_rejects_non_finite() {
        assert!(sample_fix().validate().is_ok());

        let mut fix = sample_fix();
        fix.lat = f64::NAN;
        assert!(matches!(fix.validate(), Err(Error::InvalidFix { .. })));

        let mut fix = sample_fix();
        fix.lon = f64::INFINITY;
        assert!(fix.validate().is_err());
    }

    #[test]
    fn test_coord_axes() {
        let fix = sample_fix();
        assert_eq!(fix.coord(), Coord { x: 41.88, y: -87.63 });
        assert_eq!(ShapePoint::new(1.0, 2.0, 1).coord(), Coord { x: 1.0, y: 2.0 });
    }

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.search_window, 100);
        assert_eq!(config.projection_epsilon, 0.00001);
        assert_eq!(config.arrival_proximity_threshold, 0.25);
        assert_eq!(config.distance_to_stop_scale, 100.0);
        assert_eq!(config.timezone, chrono_tz::America::Chicago);
    }
}
