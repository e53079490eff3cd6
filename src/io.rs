//! # CSV and Config I/O
//!
//! Readers for the GTFS tables the engine needs, the daily vehicle position files,
//! and writers for the processed fixes and arrivals.
//!
//! Readers take any [`Read`] so they can be fed from files or memory. Rows are
//! converted to the crate's typed records at this boundary; nothing downstream
//! sees raw CSV.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::pipeline::TransitFeed;
use crate::schedule::{GtfsTime, Schedule, ScheduleRow, ServiceDays};
use crate::{EngineConfig, ShapeRow, Stop, VehicleFix};

fn csv_error(file_name: &str) -> impl Fn(csv::Error) -> Error + '_ {
    move |source| Error::Csv {
        file_name: file_name.to_string(),
        source,
    }
}

fn open(path: &Path) -> Result<File> {
    File::open(path).map_err(|err| Error::Csv {
        file_name: path.display().to_string(),
        source: err.into(),
    })
}

// ============================================================================
// GTFS
// ============================================================================

/// A `trips.txt` row.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GtfsTrip {
    pub trip_id: String,
    #[serde(default)]
    pub route_id: String,
    pub service_id: String,
    #[serde(default)]
    pub shape_id: Option<String>,
    #[serde(default)]
    pub trip_headsign: Option<String>,
}

#[derive(Deserialize)]
struct StopRecord {
    stop_id: String,
    #[serde(default)]
    stop_name: Option<String>,
    stop_lat: f64,
    stop_lon: f64,
}

#[derive(Deserialize)]
struct ShapeRecord {
    shape_id: String,
    shape_pt_lat: f64,
    shape_pt_lon: f64,
    shape_pt_sequence: u32,
}

#[derive(Deserialize)]
struct CalendarRecord {
    service_id: String,
    #[serde(deserialize_with = "parse_bool")]
    monday: bool,
    #[serde(deserialize_with = "parse_bool")]
    tuesday: bool,
    #[serde(deserialize_with = "parse_bool")]
    wednesday: bool,
    #[serde(deserialize_with = "parse_bool")]
    thursday: bool,
    #[serde(deserialize_with = "parse_bool")]
    friday: bool,
    #[serde(deserialize_with = "parse_bool")]
    saturday: bool,
    #[serde(deserialize_with = "parse_bool")]
    sunday: bool,
}

#[derive(Deserialize)]
struct StopTimeRecord {
    trip_id: String,
    #[serde(default)]
    arrival_time: String,
    stop_id: String,
    stop_sequence: u32,
}

fn parse_bool<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<bool, D::Error> {
    let n = <u8>::deserialize(d)?;
    match n {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(serde::de::Error::custom(format!("Unknown bool value {n}"))),
    }
}

/// Read `stops.txt`.
pub fn read_stops<R: Read>(reader: R) -> Result<Vec<Stop>> {
    let mut stops = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: StopRecord = rec.map_err(csv_error("stops.txt"))?;
        stops.push(Stop {
            stop_id: rec.stop_id,
            name: rec.stop_name.filter(|name| !name.is_empty()),
            lat: rec.stop_lat,
            lon: rec.stop_lon,
        });
    }
    Ok(stops)
}

/// Read `trips.txt`.
pub fn read_trips<R: Read>(reader: R) -> Result<Vec<GtfsTrip>> {
    csv::Reader::from_reader(reader)
        .deserialize()
        .collect::<std::result::Result<Vec<GtfsTrip>, csv::Error>>()
        .map_err(csv_error("trips.txt"))
}

/// Read `shapes.txt`.
pub fn read_shapes<R: Read>(reader: R) -> Result<Vec<ShapeRow>> {
    let mut rows = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: ShapeRecord = rec.map_err(csv_error("shapes.txt"))?;
        rows.push(ShapeRow {
            shape_id: rec.shape_id,
            lat: rec.shape_pt_lat,
            lon: rec.shape_pt_lon,
            sequence: rec.shape_pt_sequence,
        });
    }
    Ok(rows)
}

/// Read `calendar.txt` into service days per `service_id`.
pub fn read_calendar<R: Read>(reader: R) -> Result<HashMap<String, ServiceDays>> {
    let mut services = HashMap::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: CalendarRecord = rec.map_err(csv_error("calendar.txt"))?;
        let days = ServiceDays {
            monday: rec.monday,
            tuesday: rec.tuesday,
            wednesday: rec.wednesday,
            thursday: rec.thursday,
            friday: rec.friday,
            saturday: rec.saturday,
            sunday: rec.sunday,
        };
        if services.insert(rec.service_id.clone(), days).is_some() {
            warn!("[GTFS] Duplicate service {} in calendar.txt, keeping the last", rec.service_id);
        }
    }
    Ok(services)
}

/// Read `stop_times.txt` and join each row with its trip's service calendar.
///
/// Rows are ordered by `stop_sequence` within each trip. Rows without an arrival
/// time (untimed stops) are skipped, as are trips whose service is not in the
/// calendar. A malformed arrival time is an error.
pub fn read_stop_times<R: Read>(
    reader: R,
    trips: &[GtfsTrip],
    calendar: &HashMap<String, ServiceDays>,
) -> Result<Schedule> {
    let service_per_trip: HashMap<&str, &str> = trips
        .iter()
        .map(|trip| (trip.trip_id.as_str(), trip.service_id.as_str()))
        .collect();

    let mut per_trip: HashMap<String, Vec<(u32, String, GtfsTime)>> = HashMap::new();
    let mut untimed = 0;
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: StopTimeRecord = rec.map_err(csv_error("stop_times.txt"))?;
        if rec.arrival_time.trim().is_empty() {
            untimed += 1;
            continue;
        }
        let arrival: GtfsTime = rec.arrival_time.parse()?;
        per_trip
            .entry(rec.trip_id)
            .or_default()
            .push((rec.stop_sequence, rec.stop_id, arrival));
    }
    if untimed > 0 {
        debug!("[GTFS] Skipped {} stop times without an arrival time", untimed);
    }

    let mut rows = Vec::new();
    let mut unknown_service = 0;
    for (trip_id, mut stop_times) in per_trip {
        let service_days = match service_per_trip
            .get(trip_id.as_str())
            .and_then(|service_id| calendar.get(*service_id))
        {
            Some(days) => *days,
            None => {
                unknown_service += 1;
                continue;
            }
        };
        // Sort by stop_sequence, in case the file isn't in order
        stop_times.sort_by_key(|(seq, _, _)| *seq);
        for (_, stop_id, arrival_time) in stop_times {
            rows.push(ScheduleRow {
                trip_id: trip_id.clone(),
                stop_id,
                arrival_time,
                service_days,
            });
        }
    }
    if unknown_service > 0 {
        warn!(
            "[GTFS] {} trips in stop_times.txt have no service calendar and are unscheduled",
            unknown_service
        );
    }

    Ok(Schedule::new(rows))
}

/// `trip_id` -> `trip_headsign` for trips that have one.
pub fn trip_headsigns(trips: &[GtfsTrip]) -> HashMap<String, String> {
    trips
        .iter()
        .filter_map(|trip| {
            let headsign = trip.trip_headsign.as_deref().filter(|h| !h.is_empty())?;
            Some((trip.trip_id.clone(), headsign.to_string()))
        })
        .collect()
}

/// Load everything the engine needs from an unpacked GTFS directory.
pub fn load_feed(gtfs_dir: &Path) -> Result<TransitFeed> {
    let start = std::time::Instant::now();

    let stops = read_stops(open(&gtfs_dir.join("stops.txt"))?)?;
    let trips = read_trips(open(&gtfs_dir.join("trips.txt"))?)?;
    let shape_rows = read_shapes(open(&gtfs_dir.join("shapes.txt"))?)?;
    let calendar = read_calendar(open(&gtfs_dir.join("calendar.txt"))?)?;
    let schedule = read_stop_times(open(&gtfs_dir.join("stop_times.txt"))?, &trips, &calendar)?;

    let trip_shapes: HashMap<String, String> = trips
        .iter()
        .filter_map(|trip| {
            let shape_id = trip.shape_id.as_deref().filter(|id| !id.is_empty())?;
            Some((trip.trip_id.clone(), shape_id.to_string()))
        })
        .collect();

    let feed = TransitFeed::new(&shape_rows, trip_shapes, schedule, stops).with_headsigns(trip_headsigns(&trips));
    info!(
        "[GTFS] Loaded {} stops, {} shapes, {} scheduled trips from {} in {}ms",
        feed.stops.len(),
        feed.shapes.len(),
        feed.schedule.trip_count(),
        gtfs_dir.display(),
        start.elapsed().as_millis()
    );
    Ok(feed)
}

// ============================================================================
// Feed versions
// ============================================================================

/// One published GTFS version and the service dates it covers (inclusive).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedVersion {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub dir: PathBuf,
}

impl FeedVersion {
    pub fn covers(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

/// `index.json` of a versioned GTFS directory: parallel lists of start and end dates.
#[derive(Deserialize)]
struct FeedIndex {
    start: Vec<String>,
    end: Vec<String>,
}

fn parse_index_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .map_err(|_| Error::FeedIndex(format!("bad date {:?}", raw)))
}

/// Parse an `index.json` into versions stored under `root/<start>_<end>/`.
pub fn parse_feed_index(json: &str, root: &Path) -> Result<Vec<FeedVersion>> {
    let index: FeedIndex = serde_json::from_str(json).map_err(|err| Error::FeedIndex(err.to_string()))?;
    if index.start.len() != index.end.len() {
        return Err(Error::FeedIndex(format!(
            "{} start dates but {} end dates",
            index.start.len(),
            index.end.len()
        )));
    }

    let mut versions = Vec::with_capacity(index.start.len());
    for (start, end) in index.start.iter().zip(&index.end) {
        let start = parse_index_date(start)?;
        let end = parse_index_date(end)?;
        if end < start {
            return Err(Error::FeedIndex(format!("version {} ends before it starts", start)));
        }
        let dir = root.join(format!("{}_{}", start.format("%Y%m%d"), end.format("%Y%m%d")));
        versions.push(FeedVersion { start, end, dir });
    }
    versions.sort_by_key(|version| version.start);
    Ok(versions)
}

/// The version in force on `day`: the latest-starting one that covers it.
pub fn select_version(versions: &[FeedVersion], day: NaiveDate) -> Option<&FeedVersion> {
    versions
        .iter()
        .filter(|version| version.covers(day))
        .max_by_key(|version| version.start)
}

/// GTFS feeds keyed by service date, loaded on first use.
///
/// A directory with an `index.json` holds one feed per version; any other
/// directory is a single feed used for every date.
#[derive(Debug)]
pub struct FeedCatalog {
    versions: Vec<FeedVersion>,
    loaded: HashMap<PathBuf, TransitFeed>,
}

impl FeedCatalog {
    /// A single feed directory valid for every date.
    pub fn single(gtfs_dir: &Path) -> Self {
        Self {
            versions: vec![FeedVersion {
                start: NaiveDate::MIN,
                end: NaiveDate::MAX,
                dir: gtfs_dir.to_path_buf(),
            }],
            loaded: HashMap::new(),
        }
    }

    pub fn open(root: &Path) -> Result<Self> {
        let index_path = root.join("index.json");
        if !index_path.exists() {
            return Ok(Self::single(root));
        }
        let json = std::fs::read_to_string(&index_path)?;
        let versions = parse_feed_index(&json, root)?;
        info!("[GTFS] {} feed versions in {}", versions.len(), root.display());
        Ok(Self {
            versions,
            loaded: HashMap::new(),
        })
    }

    pub fn versions(&self) -> &[FeedVersion] {
        &self.versions
    }

    /// The feed for `day`, or `None` when no version covers it.
    pub fn feed_for(&mut self, day: NaiveDate) -> Result<Option<&TransitFeed>> {
        let dir = match select_version(&self.versions, day) {
            Some(version) => version.dir.clone(),
            None => return Ok(None),
        };
        if !self.loaded.contains_key(&dir) {
            let feed = load_feed(&dir)?;
            self.loaded.insert(dir.clone(), feed);
        }
        Ok(self.loaded.get(&dir))
    }
}

// ============================================================================
// Vehicle positions
// ============================================================================

#[derive(Deserialize)]
struct FixRecord {
    #[serde(default)]
    vehicle_id: Option<String>,
    #[serde(default)]
    trip_id: Option<String>,
    #[serde(default)]
    route_id: Option<String>,
    #[serde(default)]
    stop_id: Option<String>,
    #[serde(alias = "lat")]
    latitude: f64,
    #[serde(alias = "lon")]
    longitude: f64,
    timestamp: String,
    #[serde(default)]
    speed: Option<f64>,
}

/// Parse a position timestamp.
///
/// Accepts RFC 3339, Unix epoch seconds (integer or fractional) and
/// `YYYY-MM-DD HH:MM:SS`, the last one taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(secs) = raw.parse::<i64>() {
        return Utc
            .timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| Error::InvalidTimestamp(raw.to_string()));
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() {
            let millis = (secs * 1000.0).round() as i64;
            if let Some(ts) = Utc.timestamp_millis_opt(millis).single() {
                return Ok(ts);
            }
        }
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::InvalidTimestamp(raw.to_string()))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Read a vehicle positions CSV.
///
/// Expected columns are `trip_id`, `route_id`, `latitude`, `longitude` and
/// `timestamp`; `vehicle_id`, `stop_id` and `speed` are optional. Positions without
/// a trip or route are kept here and dropped by the pipeline.
pub fn read_vehicle_fixes<R: Read>(reader: R) -> Result<Vec<VehicleFix>> {
    let mut fixes = Vec::new();
    for rec in csv::Reader::from_reader(reader).deserialize() {
        let rec: FixRecord = rec.map_err(csv_error("vehicle positions"))?;
        let timestamp = parse_timestamp(&rec.timestamp)?;
        let mut fix = VehicleFix::new(
            &non_empty(rec.trip_id).unwrap_or_default(),
            &non_empty(rec.route_id).unwrap_or_default(),
            rec.latitude,
            rec.longitude,
            timestamp,
        );
        fix.vehicle_id = non_empty(rec.vehicle_id);
        fix.stop_id = non_empty(rec.stop_id);
        fix.speed = rec.speed;
        fixes.push(fix);
    }
    Ok(fixes)
}

pub fn read_vehicle_fixes_file(path: &Path) -> Result<Vec<VehicleFix>> {
    let fixes = read_vehicle_fixes(open(path)?)?;
    debug!("[IO] Read {} positions from {}", fixes.len(), path.display());
    Ok(fixes)
}

// ============================================================================
// Output
// ============================================================================

#[derive(Serialize)]
struct OutputRecord<'a> {
    vehicle_id: Option<&'a str>,
    trip_id: &'a str,
    route_id: &'a str,
    trip_headsign: &'a str,
    stop_id: Option<&'a str>,
    latitude: f64,
    longitude: f64,
    timestamp: DateTime<Utc>,
    speed: Option<f64>,
    dist_traveled: f64,
    nearest_shape_index: u32,
    sched_time: Option<DateTime<Utc>>,
    sched_dev: Option<i64>,
    distance_to_stop: Option<f64>,
    dayofweek: u32,
    hourofday: u32,
}

impl<'a> From<&'a VehicleFix> for OutputRecord<'a> {
    fn from(fix: &'a VehicleFix) -> Self {
        Self {
            vehicle_id: fix.vehicle_id.as_deref(),
            trip_id: &fix.trip_id,
            route_id: &fix.route_id,
            trip_headsign: &fix.trip_headsign,
            stop_id: fix.stop_id.as_deref(),
            latitude: fix.lat,
            longitude: fix.lon,
            timestamp: fix.timestamp,
            speed: fix.speed,
            dist_traveled: fix.dist_traveled,
            nearest_shape_index: fix.nearest_shape_index,
            sched_time: fix.sched_time,
            sched_dev: fix.sched_dev,
            distance_to_stop: fix.distance_to_stop,
            dayofweek: fix.day_of_week,
            hourofday: fix.hour_of_day,
        }
    }
}

/// Write processed fixes (or selected arrivals) as CSV with a header row.
pub fn write_fixes<W: Write>(writer: W, fixes: &[VehicleFix]) -> Result<()> {
    let mut out = csv::Writer::from_writer(writer);
    for fix in fixes {
        out.serialize(OutputRecord::from(fix)).map_err(csv_error("output"))?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_fixes_file(path: &Path, fixes: &[VehicleFix]) -> Result<()> {
    let file = File::create(path)?;
    write_fixes(file, fixes)?;
    info!("[IO] Wrote {} rows to {}", fixes.len(), path.display());
    Ok(())
}

// ============================================================================
// Config
// ============================================================================

impl EngineConfig {
    /// Parse a JSON config. Missing fields keep their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(std::io::BufReader::new(file))?)
    }
}
