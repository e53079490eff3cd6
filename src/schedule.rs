//! # Schedule Matching
//!
//! Attaches a scheduled arrival time and a signed schedule deviation to a fix.
//!
//! GTFS arrival times are offsets from the start of the *service day* and may run
//! past `24:00:00` for trips that cross midnight. Two rules resolve the date:
//! - the service day is picked from the fix's local weekday, falling back to the
//!   day before and then the day after when the trip does not run that day
//! - an hour of 24 or more is folded back into the day, and the date advances by one
//!   only when the fix itself was recorded during the 23:00 hour
//!
//! The second rule is a heuristic: a post-midnight arrival observed at 23:58 rolls
//! forward while the same arrival observed at 00:02 does not need to.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, NaiveDate, TimeZone, Timelike, Utc, Weekday};
use log::debug;

use crate::error::Error;

/// Days of the week a service runs, as in GTFS `calendar.txt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceDays {
    pub monday: bool,
    pub tuesday: bool,
    pub wednesday: bool,
    pub thursday: bool,
    pub friday: bool,
    pub saturday: bool,
    pub sunday: bool,
}

impl ServiceDays {
    pub fn every_day() -> Self {
        Self {
            monday: true,
            tuesday: true,
            wednesday: true,
            thursday: true,
            friday: true,
            saturday: true,
            sunday: true,
        }
    }

    /// Service running only on the given days.
    pub fn only(days: &[Weekday]) -> Self {
        let mut service = Self::default();
        for day in days {
            match day {
                Weekday::Mon => service.monday = true,
                Weekday::Tue => service.tuesday = true,
                Weekday::Wed => service.wednesday = true,
                Weekday::Thu => service.thursday = true,
                Weekday::Fri => service.friday = true,
                Weekday::Sat => service.saturday = true,
                Weekday::Sun => service.sunday = true,
            }
        }
        service
    }

    pub fn runs_on(&self, weekday: Weekday) -> bool {
        match weekday {
            Weekday::Mon => self.monday,
            Weekday::Tue => self.tuesday,
            Weekday::Wed => self.wednesday,
            Weekday::Thu => self.thursday,
            Weekday::Fri => self.friday,
            Weekday::Sat => self.saturday,
            Weekday::Sun => self.sunday,
        }
    }
}

/// A GTFS `HH:MM:SS` time. Hours may be 24 or more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GtfsTime {
    pub hours: u32,
    pub minutes: u32,
    pub seconds: u32,
}

impl GtfsTime {
    pub fn new(hours: u32, minutes: u32, seconds: u32) -> Self {
        Self { hours, minutes, seconds }
    }

    /// True for arrivals after midnight of the service day.
    pub fn is_past_midnight(&self) -> bool {
        self.hours >= 24
    }
}

impl FromStr for GtfsTime {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidTime(s.to_string());

        let mut parts = s.trim().split(':');
        let mut next = || -> Result<u32, Error> {
            parts.next().ok_or_else(invalid)?.parse::<u32>().map_err(|_| invalid())
        };
        let hours = next()?;
        let minutes = next()?;
        let seconds = next()?;
        if parts.next().is_some() || minutes > 59 || seconds > 59 {
            return Err(invalid());
        }
        Ok(Self { hours, minutes, seconds })
    }
}

impl fmt::Display for GtfsTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// One scheduled stop visit: `stop_times` joined with the trip's service calendar.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleRow {
    pub trip_id: String,
    pub stop_id: String,
    pub arrival_time: GtfsTime,
    pub service_days: ServiceDays,
}

/// Scheduled stop visits, indexed by trip.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    rows_per_trip: HashMap<String, Vec<ScheduleRow>>,
}

impl Schedule {
    /// Rows keep their input order within each trip.
    pub fn new(rows: Vec<ScheduleRow>) -> Self {
        let mut rows_per_trip: HashMap<String, Vec<ScheduleRow>> = HashMap::new();
        for row in rows {
            rows_per_trip.entry(row.trip_id.clone()).or_default().push(row);
        }
        Self { rows_per_trip }
    }

    pub fn rows_for_trip(&self, trip_id: &str) -> &[ScheduleRow] {
        self.rows_per_trip.get(trip_id).map(|rows| rows.as_slice()).unwrap_or(&[])
    }

    /// Every stop the trip visits on any service day.
    pub fn stop_ids_for_trip(&self, trip_id: &str) -> HashSet<&str> {
        self.rows_for_trip(trip_id).iter().map(|row| row.stop_id.as_str()).collect()
    }

    pub fn trip_count(&self) -> usize {
        self.rows_per_trip.len()
    }

    /// Resolve the trip's rows for the service day around `local_date`.
    ///
    /// Tries `local_date`, then the day before, then the day after. Returns `None`
    /// when the trip runs on none of them.
    pub fn timetable(&self, trip_id: &str, local_date: NaiveDate) -> Option<TripTimetable<'_>> {
        TripTimetable::resolve(self.rows_for_trip(trip_id), local_date)
    }
}

/// A trip's scheduled visits for a single service day.
#[derive(Debug, Clone)]
pub struct TripTimetable<'a> {
    pub service_date: NaiveDate,
    rows: Vec<&'a ScheduleRow>,
}

impl<'a> TripTimetable<'a> {
    pub fn resolve(rows: &'a [ScheduleRow], local_date: NaiveDate) -> Option<Self> {
        let candidates = [
            Some(local_date),
            local_date.checked_sub_days(Days::new(1)),
            local_date.checked_add_days(Days::new(1)),
        ];

        for date in candidates.into_iter().flatten() {
            let weekday = date.weekday();
            let matching: Vec<&ScheduleRow> = rows
                .iter()
                .filter(|row| row.service_days.runs_on(weekday))
                .collect();
            if !matching.is_empty() {
                if date != local_date {
                    debug!("[Schedule] No service on {}, using {} instead", local_date, date);
                }
                return Some(Self { service_date: date, rows: matching });
            }
        }
        None
    }

    /// Arrival time of the first visit to `stop_id`.
    pub fn arrival_at(&self, stop_id: &str) -> Option<GtfsTime> {
        self.rows
            .iter()
            .find(|row| row.stop_id == stop_id)
            .map(|row| row.arrival_time)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Scheduled timestamp for `arrival`, on the calendar date of the local fix time.
///
/// Hours of 24 or more are reduced by 24; the date then moves forward one day only
/// if the fix's local hour is 23. Returns `None` when the result does not exist
/// (a second wrap past 48:00, or a local time skipped by a DST change).
///
/// # Example
/// ```
/// use chrono::TimeZone;
/// use chrono_tz::America::Chicago;
/// use route_odometer::{scheduled_time, GtfsTime};
///
/// let fix = Chicago.with_ymd_and_hms(2024, 3, 5, 23, 50, 0).unwrap();
/// let sched = scheduled_time(&fix, "25:10:00".parse::<GtfsTime>().unwrap()).unwrap();
/// assert_eq!(sched, Chicago.with_ymd_and_hms(2024, 3, 6, 1, 10, 0).unwrap());
/// ```
pub fn scheduled_time<Tz: TimeZone>(local_fix_time: &DateTime<Tz>, arrival: GtfsTime) -> Option<DateTime<Tz>> {
    let mut hours = arrival.hours;
    let mut days = 0;
    if arrival.is_past_midnight() {
        hours -= 24;
        if local_fix_time.hour() == 23 {
            days = 1;
        }
    }

    let date = local_fix_time.date_naive().checked_add_days(Days::new(days))?;
    let naive = date.and_hms_opt(hours, arrival.minutes, arrival.seconds)?;
    local_fix_time.timezone().from_local_datetime(&naive).earliest()
}

/// Signed seconds from the scheduled time to the fix time.
///
/// Negative when the fix happened before the scheduled time (ahead of schedule),
/// positive when after (behind schedule).
pub fn schedule_deviation(fix_time: DateTime<Utc>, sched_time: DateTime<Utc>) -> i64 {
    (fix_time - sched_time).num_seconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;
    use chrono_tz::Tz;

    fn row(trip_id: &str, stop_id: &str, time: &str, service_days: ServiceDays) -> ScheduleRow {
        ScheduleRow {
            trip_id: trip_id.to_string(),
            stop_id: stop_id.to_string(),
            arrival_time: time.parse().unwrap(),
            service_days,
        }
    }

    fn chicago(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> DateTime<Tz> {
        Chicago.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_parse_gtfs_time() {
        assert_eq!("08:05:30".parse::<GtfsTime>().unwrap(), GtfsTime::new(8, 5, 30));
        assert_eq!("25:10:00".parse::<GtfsTime>().unwrap(), GtfsTime::new(25, 10, 0));
        assert_eq!(" 7:00:00".parse::<GtfsTime>().unwrap(), GtfsTime::new(7, 0, 0));
        assert_eq!(GtfsTime::new(7, 0, 0).to_string(), "07:00:00");
    }

    #[test]
    fn test_parse_gtfs_time_rejects_garbage() {
        assert!("8:05".parse::<GtfsTime>().is_err());
        assert!("08:05:30:00".parse::<GtfsTime>().is_err());
        assert!("aa:bb:cc".parse::<GtfsTime>().is_err());
        assert!("08:75:00".parse::<GtfsTime>().is_err());
    }

    #[test]
    fn test_service_days() {
        let weekdays = ServiceDays::only(&[Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]);
        assert!(weekdays.runs_on(Weekday::Wed));
        assert!(!weekdays.runs_on(Weekday::Sat));
        assert!(ServiceDays::every_day().runs_on(Weekday::Sun));
    }

    #[test]
    fn test_timetable_uses_fix_weekday() {
        let rows = vec![
            row("t1", "A", "08:00:00", ServiceDays::only(&[Weekday::Tue])),
            row("t1", "A", "09:00:00", ServiceDays::only(&[Weekday::Sat])),
        ];
        let schedule = Schedule::new(rows);
        // 2024-03-05 is a Tuesday
        let timetable = schedule.timetable("t1", NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).unwrap();
        assert_eq!(timetable.arrival_at("A"), Some(GtfsTime::new(8, 0, 0)));
    }

    #[test]
    fn test_timetable_falls_back_to_previous_then_next_day() {
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();

        let monday_only = Schedule::new(vec![row("t1", "A", "23:30:00", ServiceDays::only(&[Weekday::Mon]))]);
        let timetable = monday_only.timetable("t1", tuesday).unwrap();
        assert_eq!(timetable.service_date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());

        let wednesday_only = Schedule::new(vec![row("t1", "A", "00:30:00", ServiceDays::only(&[Weekday::Wed]))]);
        let timetable = wednesday_only.timetable("t1", tuesday).unwrap();
        assert_eq!(timetable.service_date, NaiveDate::from_ymd_opt(2024, 3, 6).unwrap());

        // Both neighbours run: the day before wins
        let both = Schedule::new(vec![
            row("t1", "A", "00:30:00", ServiceDays::only(&[Weekday::Wed])),
            row("t1", "A", "23:30:00", ServiceDays::only(&[Weekday::Mon])),
        ]);
        let timetable = both.timetable("t1", tuesday).unwrap();
        assert_eq!(timetable.arrival_at("A"), Some(GtfsTime::new(23, 30, 0)));
    }

    #[test]
    fn test_timetable_unmatched() {
        let saturday_only = Schedule::new(vec![row("t1", "A", "08:00:00", ServiceDays::only(&[Weekday::Sat]))]);
        let tuesday = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert!(saturday_only.timetable("t1", tuesday).is_none());
        assert!(saturday_only.timetable("unknown-trip", tuesday).is_none());
    }

    #[test]
    fn test_first_visit_wins_for_repeated_stop() {
        let every_day = ServiceDays::every_day();
        let schedule = Schedule::new(vec![
            row("loop", "A", "08:00:00", every_day),
            row("loop", "B", "08:10:00", every_day),
            row("loop", "A", "08:20:00", every_day),
        ]);
        let timetable = schedule.timetable("loop", NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()).unwrap();
        assert_eq!(timetable.arrival_at("A"), Some(GtfsTime::new(8, 0, 0)));
        assert_eq!(timetable.arrival_at("C"), None);
    }

    #[test]
    fn test_scheduled_time_same_day() {
        let fix = chicago(2024, 3, 5, 8, 3, 0);
        let sched = scheduled_time(&fix, GtfsTime::new(8, 0, 0)).unwrap();
        assert_eq!(sched, chicago(2024, 3, 5, 8, 0, 0));
    }

    #[test]
    fn test_overnight_rolls_forward_at_hour_23() {
        let fix = chicago(2024, 3, 5, 23, 58, 0);
        let sched = scheduled_time(&fix, GtfsTime::new(25, 10, 0)).unwrap();
        assert_eq!(sched, chicago(2024, 3, 6, 1, 10, 0));
        assert_eq!(sched.hour(), 1);
    }

    #[test]
    fn test_overnight_does_not_roll_forward_otherwise() {
        let fix = chicago(2024, 3, 5, 10, 0, 0);
        let sched = scheduled_time(&fix, GtfsTime::new(25, 10, 0)).unwrap();
        assert_eq!(sched, chicago(2024, 3, 5, 1, 10, 0));

        // Fix already past midnight
        let fix = chicago(2024, 3, 6, 1, 5, 0);
        let sched = scheduled_time(&fix, GtfsTime::new(25, 10, 0)).unwrap();
        assert_eq!(sched, chicago(2024, 3, 6, 1, 10, 0));
    }

    #[test]
    fn test_scheduled_time_second_wrap_is_unmatched() {
        let fix = chicago(2024, 3, 5, 10, 0, 0);
        assert!(scheduled_time(&fix, GtfsTime::new(49, 0, 0)).is_none());
    }

    #[test]
    fn test_schedule_deviation_sign() {
        let sched = chicago(2024, 3, 5, 8, 0, 0).with_timezone(&Utc);
        let late = chicago(2024, 3, 5, 8, 5, 0).with_timezone(&Utc);
        let early = chicago(2024, 3, 5, 7, 58, 0).with_timezone(&Utc);
        assert_eq!(schedule_deviation(late, sched), 300);
        assert_eq!(schedule_deviation(early, sched), -120);
        assert_eq!(schedule_deviation(sched, sched), 0);
    }

    #[test]
    fn test_schedule_deviation_spans_days() {
        let sched = chicago(2024, 3, 6, 1, 10, 0).with_timezone(&Utc);
        let fix = chicago(2024, 3, 5, 1, 10, 0).with_timezone(&Utc);
        assert_eq!(schedule_deviation(fix, sched), -86_400);
    }
}
