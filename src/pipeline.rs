//! # Processing Pipeline
//!
//! Runs a batch of fixes through every stage:
//!
//! 1. Drop fixes that are not in revenue service
//! 2. Group the rest by trip and order each trip by timestamp
//! 3. Per trip (in parallel with the `parallel` feature): odometer, stop
//!    assignment, distance to stop, schedule deviation
//! 4. Reduce each (trip, stop) visit to one arrival
//!
//! Within a trip the odometer is strictly sequential. Trips share nothing mutable
//! apart from the [`RunCounters`], so they run independently.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{Datelike, Timelike, Utc};
use log::{debug, info, warn};

use crate::arrivals::select_arrivals;
use crate::error::Result;
use crate::odometer::{calc_dist_traveled, MISSING_SHAPE_DISTANCE};
use crate::schedule::{schedule_deviation, scheduled_time, Schedule};
use crate::shape::{build_shapes, RouteShape};
use crate::stops::{distance_to_stop, TripStops};
use crate::{EngineConfig, ShapeRow, Stop, TripState, VehicleFix};

/// Static GTFS data needed to process fixes.
#[derive(Debug, Clone, Default)]
pub struct TransitFeed {
    /// Shapes by `shape_id`
    pub shapes: HashMap<String, RouteShape>,
    /// `trip_id` -> `shape_id`
    pub trip_shapes: HashMap<String, String>,
    pub schedule: Schedule,
    /// Stops by `stop_id`
    pub stops: HashMap<String, Stop>,
    /// `trip_id` -> `trip_headsign`
    pub trip_headsigns: HashMap<String, String>,
}

impl TransitFeed {
    /// Build every shape once up front; the result is shared by all trips.
    pub fn new(
        shape_rows: &[ShapeRow],
        trip_shapes: HashMap<String, String>,
        schedule: Schedule,
        stops: Vec<Stop>,
    ) -> Self {
        Self {
            shapes: build_shapes(shape_rows),
            trip_shapes,
            schedule,
            stops: stops.into_iter().map(|stop| (stop.stop_id.clone(), stop)).collect(),
            trip_headsigns: HashMap::new(),
        }
    }

    pub fn with_headsigns(mut self, trip_headsigns: HashMap<String, String>) -> Self {
        self.trip_headsigns = trip_headsigns;
        self
    }

    /// The trip's shape, or `None` when the trip has no usable path data.
    pub fn shape_for_trip(&self, trip_id: &str) -> Option<&RouteShape> {
        let shape_id = self.trip_shapes.get(trip_id)?;
        self.shapes.get(shape_id).filter(|shape| !shape.is_missing())
    }
}

/// Counts of the recoverable conditions met during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub trips: usize,
    pub fixes: usize,
    pub arrivals: usize,
    pub trips_missing_shape: usize,
    pub fixes_missing_shape: usize,
    pub regressions: usize,
    pub unmatched_schedule: usize,
    pub empty_arrival_groups: usize,
    pub fixes_out_of_service: usize,
}

impl RunSummary {
    /// Add another run's counts, e.g. when processing a range of days.
    pub fn merge(&mut self, other: &RunSummary) {
        self.trips += other.trips;
        self.fixes += other.fixes;
        self.arrivals += other.arrivals;
        self.trips_missing_shape += other.trips_missing_shape;
        self.fixes_missing_shape += other.fixes_missing_shape;
        self.regressions += other.regressions;
        self.unmatched_schedule += other.unmatched_schedule;
        self.empty_arrival_groups += other.empty_arrival_groups;
        self.fixes_out_of_service += other.fixes_out_of_service;
    }
}

/// Counters shared by the trip workers.
#[derive(Debug, Default)]
pub struct RunCounters {
    trips_missing_shape: AtomicUsize,
    fixes_missing_shape: AtomicUsize,
    regressions: AtomicUsize,
    unmatched_schedule: AtomicUsize,
}

impl RunCounters {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn regressions(&self) -> usize {
        self.regressions.load(Ordering::Relaxed)
    }

    /// Snapshot of the per-trip counters.
    pub fn summary(&self) -> RunSummary {
        RunSummary {
            trips_missing_shape: self.trips_missing_shape.load(Ordering::Relaxed),
            fixes_missing_shape: self.fixes_missing_shape.load(Ordering::Relaxed),
            regressions: self.regressions(),
            unmatched_schedule: self.unmatched_schedule.load(Ordering::Relaxed),
            ..RunSummary::default()
        }
    }
}

/// Output of [`process_fixes`].
#[derive(Debug, Clone, Default)]
pub struct ProcessedRun {
    /// Every in-service fix with its computed fields, grouped by trip in timestamp order
    pub fixes: Vec<VehicleFix>,
    /// One fix per (trip, stop) visit
    pub arrivals: Vec<VehicleFix>,
    pub summary: RunSummary,
}

/// Process one trip's fixes.
///
/// Fixes are put in timestamp order (stable, so equal timestamps keep their input
/// order) and measured with a fresh [`TripState`]. The service-day timetable is
/// resolved once, from the local date of the first fix.
pub fn process_trip(
    feed: &TransitFeed,
    trip_id: &str,
    mut fixes: Vec<VehicleFix>,
    config: &EngineConfig,
    counters: &RunCounters,
) -> Vec<VehicleFix> {
    fixes.sort_by_key(|fix| fix.timestamp);

    let shape = feed.shape_for_trip(trip_id);
    if shape.is_none() {
        RunCounters::bump(&counters.trips_missing_shape);
        warn!(
            "[Pipeline] Trip {} has no shape data, {} fixes get distance {}",
            trip_id,
            fixes.len(),
            MISSING_SHAPE_DISTANCE
        );
    }

    let trip_stops = TripStops::new(&feed.stops, &feed.schedule.stop_ids_for_trip(trip_id));

    let timetable = fixes.first().and_then(|first| {
        let local_date = first.timestamp.with_timezone(&config.timezone).date_naive();
        feed.schedule.timetable(trip_id, local_date)
    });
    if timetable.is_none() {
        debug!("[Schedule] No timetable for trip {}", trip_id);
    }

    let headsign = feed.trip_headsigns.get(trip_id).cloned().unwrap_or_default();
    let mut state = TripState::default();

    fixes
        .into_iter()
        .map(|mut fix| {
            let local = fix.timestamp.with_timezone(&config.timezone);
            fix.day_of_week = local.weekday().number_from_monday();
            fix.hour_of_day = local.hour();
            fix.trip_headsign = headsign.clone();

            match shape {
                Some(shape) => {
                    let reading = calc_dist_traveled(
                        shape,
                        fix.coord(),
                        &mut state,
                        config.search_window,
                        config.projection_epsilon,
                    );
                    if reading.regressed {
                        RunCounters::bump(&counters.regressions);
                    }
                    fix.dist_traveled = reading.dist_traveled;
                    fix.nearest_shape_index = reading.nearest_shape_index;
                }
                None => {
                    RunCounters::bump(&counters.fixes_missing_shape);
                    fix.dist_traveled = MISSING_SHAPE_DISTANCE;
                    fix.nearest_shape_index = 0;
                }
            }

            if fix.stop_id.is_none() {
                fix.stop_id = trip_stops.nearest(fix.coord()).map(str::to_string);
            }

            fix.distance_to_stop = fix
                .stop_id
                .as_deref()
                .and_then(|stop_id| feed.stops.get(stop_id))
                .map(|stop| distance_to_stop(fix.coord(), stop, config.distance_to_stop_scale));

            fix.sched_time = timetable
                .as_ref()
                .zip(fix.stop_id.as_deref())
                .and_then(|(timetable, stop_id)| timetable.arrival_at(stop_id))
                .and_then(|arrival| scheduled_time(&local, arrival))
                .map(|sched| sched.with_timezone(&Utc));
            fix.sched_dev = fix.sched_time.map(|sched| schedule_deviation(fix.timestamp, sched));
            if fix.sched_time.is_none() {
                RunCounters::bump(&counters.unmatched_schedule);
            }

            fix
        })
        .collect()
}

/// Process a batch of fixes, typically one service day of one agency.
///
/// Fixes without a trip or route are dropped and counted. A fix with non-finite
/// coordinates fails the whole run with [`Error::InvalidFix`](crate::Error::InvalidFix).
pub fn process_fixes(feed: &TransitFeed, fixes: Vec<VehicleFix>, config: &EngineConfig) -> Result<ProcessedRun> {
    let start = Instant::now();
    let total = fixes.len();

    let (in_service, out_of_service): (Vec<VehicleFix>, Vec<VehicleFix>) =
        fixes.into_iter().partition(|fix| fix.is_in_service());
    for fix in &in_service {
        fix.validate()?;
    }

    let mut by_trip: BTreeMap<String, Vec<VehicleFix>> = BTreeMap::new();
    for fix in in_service {
        by_trip.entry(fix.trip_id.clone()).or_default().push(fix);
    }
    let trip_count = by_trip.len();

    info!(
        "[Pipeline] Processing {} fixes ({} out of service) across {} trips",
        total,
        out_of_service.len(),
        trip_count
    );

    let counters = RunCounters::new();
    let trips: Vec<(String, Vec<VehicleFix>)> = by_trip.into_iter().collect();

    #[cfg(feature = "parallel")]
    let processed: Vec<Vec<VehicleFix>> = {
        use rayon::prelude::*;
        trips
            .into_par_iter()
            .map(|(trip_id, trip_fixes)| process_trip(feed, &trip_id, trip_fixes, config, &counters))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let processed: Vec<Vec<VehicleFix>> = trips
        .into_iter()
        .map(|(trip_id, trip_fixes)| process_trip(feed, &trip_id, trip_fixes, config, &counters))
        .collect();

    let fixes: Vec<VehicleFix> = processed.into_iter().flatten().collect();
    info!(
        "[Pipeline] Measured {} fixes in {}ms",
        fixes.len(),
        start.elapsed().as_millis()
    );

    let selection = select_arrivals(&fixes, config.arrival_proximity_threshold);

    let mut summary = counters.summary();
    summary.trips = trip_count;
    summary.fixes = fixes.len();
    summary.arrivals = selection.arrivals.len();
    summary.empty_arrival_groups = selection.empty_groups;
    summary.fixes_out_of_service = out_of_service.len();

    info!(
        "[Pipeline] {} arrivals from {} fixes in {}ms ({} regressions, {} unmatched, {} trips without shape, {} empty groups)",
        summary.arrivals,
        summary.fixes,
        start.elapsed().as_millis(),
        summary.regressions,
        summary.unmatched_schedule,
        summary.trips_missing_shape,
        summary.empty_arrival_groups
    );

    Ok(ProcessedRun {
        fixes,
        arrivals: selection.arrivals,
        summary,
    })
}
