//! Run one synthetic trip through the engine and print every stage.
//!
//! Run with: cargo run --example single_trip

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use route_odometer::{
    process_fixes, EngineConfig, GtfsTime, Schedule, ScheduleRow, ServiceDays, ShapeRow, Stop, TransitFeed,
    VehicleFix,
};

fn main() {
    // A short L-shaped route in downtown Chicago
    let shape_rows = vec![
        ShapeRow::new("s1", 41.8781, -87.6298, 1),
        ShapeRow::new("s1", 41.8781, -87.6298, 2), // duplicate, dropped
        ShapeRow::new("s1", 41.8820, -87.6298, 3),
        ShapeRow::new("s1", 41.8820, -87.6250, 4),
    ];
    let stops = vec![
        Stop::new("100", 41.8781, -87.6298),
        Stop::new("200", 41.8820, -87.6297),
        Stop::new("300", 41.8820, -87.6251),
    ];
    let every_day = ServiceDays::every_day();
    let schedule = Schedule::new(
        [("100", GtfsTime::new(8, 0, 0)), ("200", GtfsTime::new(8, 4, 0)), ("300", GtfsTime::new(8, 8, 0))]
            .into_iter()
            .map(|(stop_id, arrival_time)| ScheduleRow {
                trip_id: "t1".to_string(),
                stop_id: stop_id.to_string(),
                arrival_time,
                service_days: every_day,
            })
            .collect(),
    );
    let feed = TransitFeed::new(
        &shape_rows,
        HashMap::from([("t1".to_string(), "s1".to_string())]),
        schedule,
        stops,
    );

    // 08:00 in Chicago on 2024-03-05 is 14:00 UTC
    let at = |m: u32, s: u32| Utc.with_ymd_and_hms(2024, 3, 5, 14, m, s).unwrap();
    let fixes = vec![
        VehicleFix::new("t1", "22", 41.8781, -87.6298, at(0, 20)),
        VehicleFix::new("t1", "22", 41.8800, -87.6299, at(2, 0)),
        VehicleFix::new("t1", "22", 41.8819, -87.6297, at(3, 30)),
        VehicleFix::new("t1", "22", 41.8820, -87.6296, at(4, 45)),
        VehicleFix::new("t1", "22", 41.8821, -87.6270, at(6, 30)),
        VehicleFix::new("t1", "22", 41.8820, -87.6251, at(7, 50)),
    ];

    let run = match process_fixes(&feed, fixes, &EngineConfig::default()) {
        Ok(run) => run,
        Err(err) => {
            eprintln!("Processing failed: {}", err);
            return;
        }
    };

    println!("Positions\n");
    for fix in &run.fixes {
        println!(
            "  {}  stop {:>4}  dist {:.5}  shape pt {}  dev {:>5}",
            fix.timestamp.format("%H:%M:%S"),
            fix.stop_id.as_deref().unwrap_or("-"),
            fix.dist_traveled,
            fix.nearest_shape_index,
            fix.sched_dev.map_or("-".to_string(), |d| d.to_string()),
        );
    }

    println!("\nArrivals\n");
    for fix in &run.arrivals {
        println!(
            "  stop {:>4}  {}  dev {:>5}s",
            fix.stop_id.as_deref().unwrap_or("-"),
            fix.timestamp.format("%H:%M:%S"),
            fix.sched_dev.map_or("-".to_string(), |d| d.to_string()),
        );
    }

    println!("\n{:?}", run.summary);
}
