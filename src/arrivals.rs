//! Reduces repeated fixes at one stop to a single arrival record.
//!
//! A vehicle that sits at a stop reports several fixes tagged with the same
//! (trip, stop). For reliability reporting only one of them matters:
//!
//! - if the vehicle was on time or late at any point, the first such fix tells how
//!   late it was when it got there
//! - if every fix was early, the last one tells how early it was when it left,
//!   which is what makes riders miss it

use std::borrow::Borrow;
use std::collections::BTreeMap;

use crate::VehicleFix;

/// Default proximity threshold for fixes in a multi-fix group (about 250 m at the
/// default distance-to-stop scale).
pub const DEFAULT_ARRIVAL_PROXIMITY: f64 = 0.25;

/// Pick the representative fix of one (trip, stop) group.
///
/// `group` must be in chronological order. A single fix is always returned. Larger
/// groups only consider fixes within `threshold` of the stop, and yield `None` when
/// there are none. Works on owned fixes or on the references a grouping yields.
///
/// # Example
/// ```
/// use chrono::{TimeZone, Utc};
/// use route_odometer::{select_arrival, VehicleFix};
///
/// let fix = |dev: i64| {
///     let mut f = VehicleFix::new("t1", "r1", 30.0, -97.0, Utc.timestamp_opt(0, 0).unwrap());
///     f.sched_dev = Some(dev);
///     f.distance_to_stop = Some(0.1);
///     f
/// };
/// let group = vec![fix(-120), fix(-30), fix(40)];
/// assert_eq!(select_arrival(&group, 0.25).unwrap().sched_dev, Some(40));
/// ```
pub fn select_arrival<F: Borrow<VehicleFix>>(group: &[F], threshold: f64) -> Option<&VehicleFix> {
    if group.len() == 1 {
        return group.first().map(Borrow::borrow);
    }

    let nearby: Vec<&VehicleFix> = group
        .iter()
        .map(Borrow::borrow)
        .filter(|fix| fix.distance_to_stop.map_or(false, |d| d <= threshold))
        .collect();

    nearby
        .iter()
        .find(|fix| fix.sched_dev.map_or(false, |dev| dev >= 0))
        .or_else(|| nearby.last())
        .copied()
}

/// Group processed fixes by (trip_id, stop_id), keeping their order.
///
/// Fixes without a stop are left out.
pub fn group_by_trip_stop(fixes: &[VehicleFix]) -> BTreeMap<(&str, &str), Vec<&VehicleFix>> {
    let mut groups: BTreeMap<(&str, &str), Vec<&VehicleFix>> = BTreeMap::new();
    for fix in fixes {
        if let Some(stop_id) = fix.stop_id.as_deref() {
            groups
                .entry((fix.trip_id.as_str(), stop_id))
                .or_default()
                .push(fix);
        }
    }
    groups
}

/// Result of reducing a run's fixes to arrivals.
#[derive(Debug, Clone, Default)]
pub struct ArrivalSelection {
    /// One fix per (trip, stop) group, in (trip_id, stop_id) order
    pub arrivals: Vec<VehicleFix>,
    /// Groups dropped because no fix was close enough to the stop
    pub empty_groups: usize,
}

/// Select one arrival per (trip, stop) group.
pub fn select_arrivals(fixes: &[VehicleFix], threshold: f64) -> ArrivalSelection {
    let mut selection = ArrivalSelection::default();
    for (_, group) in group_by_trip_stop(fixes) {
        match select_arrival(&group, threshold) {
            Some(fix) => selection.arrivals.push(fix.clone()),
            None => selection.empty_groups += 1,
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fix(trip: &str, stop: Option<&str>, minute: i64, dev: Option<i64>, dist: Option<f64>) -> VehicleFix {
        let mut f = VehicleFix::new(trip, "r1", 30.0, -97.0, Utc.timestamp_opt(1_700_000_000 + minute * 60, 0).unwrap());
        f.stop_id = stop.map(str::to_string);
        f.sched_dev = dev;
        f.distance_to_stop = dist;
        f
    }

    fn at_stop(minute: i64, dev: i64) -> VehicleFix {
        fix("t1", Some("A"), minute, Some(dev), Some(0.1))
    }

    #[test]
    fn test_single_fix_always_selected() {
        // Even far away from the stop
        let group = vec![fix("t1", Some("A"), 0, Some(-10), Some(5.0))];
        assert_eq!(select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap().sched_dev, Some(-10));
    }

    #[test]
    fn test_first_non_negative_deviation_wins() {
        let group = vec![at_stop(0, -120), at_stop(1, -30), at_stop(2, 40)];
        let chosen = select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, Some(40));

        let group = vec![at_stop(0, -10), at_stop(1, 0), at_stop(2, 60)];
        let chosen = select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, Some(0));
    }

    #[test]
    fn test_all_early_takes_last() {
        let group = vec![at_stop(0, -120), at_stop(1, -30)];
        let chosen = select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, Some(-30));
    }

    #[test]
    fn test_far_fixes_are_ignored() {
        let group = vec![
            fix("t1", Some("A"), 0, Some(30), Some(0.8)),
            fix("t1", Some("A"), 1, Some(-15), Some(0.2)),
        ];
        let chosen = select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, Some(-15));
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let group = vec![
            fix("t1", Some("A"), 0, Some(-5), Some(0.25)),
            fix("t1", Some("A"), 1, Some(-2), Some(0.3)),
        ];
        assert_eq!(select_arrival(&group, 0.25).unwrap().sched_dev, Some(-5));
    }

    #[test]
    fn test_no_nearby_fix_yields_none() {
        let group = vec![
            fix("t1", Some("A"), 0, Some(30), Some(0.8)),
            fix("t1", Some("A"), 1, Some(-15), None),
        ];
        assert!(select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).is_none());
    }

    #[test]
    fn test_unscheduled_fixes_fall_back_to_last_nearby() {
        let group = vec![at_stop(0, -40), fix("t1", Some("A"), 1, None, Some(0.1))];
        let chosen = select_arrival(&group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, None);
    }

    #[test]
    fn test_select_from_grouped_references() {
        let fixes = vec![at_stop(0, -90), at_stop(1, 15), at_stop(2, 45)];
        let groups = group_by_trip_stop(&fixes);
        let group = &groups[&("t1", "A")];

        let chosen = select_arrival(group, DEFAULT_ARRIVAL_PROXIMITY).unwrap();
        assert_eq!(chosen.sched_dev, Some(15));
        // The selection points into the input, nothing is copied
        assert!(std::ptr::eq(chosen, &fixes[1]));
    }

    #[test]
    fn test_select_arrivals_groups_and_counts() {
        let fixes = vec![
            fix("t1", Some("A"), 0, Some(-60), Some(0.1)),
            fix("t1", Some("A"), 1, Some(10), Some(0.1)),
            fix("t1", Some("B"), 5, Some(20), Some(0.9)),
            fix("t1", Some("B"), 6, Some(25), Some(0.7)),
            fix("t2", Some("A"), 0, Some(0), Some(3.0)),
            fix("t2", None, 1, Some(0), Some(0.1)),
        ];
        let selection = select_arrivals(&fixes, DEFAULT_ARRIVAL_PROXIMITY);
        assert_eq!(selection.arrivals.len(), 2);
        assert_eq!(selection.empty_groups, 1);
        assert_eq!(selection.arrivals[0].trip_id, "t1");
        assert_eq!(selection.arrivals[0].sched_dev, Some(10));
        assert_eq!(selection.arrivals[1].trip_id, "t2");
    }
}
