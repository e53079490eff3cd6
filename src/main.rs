use std::path::PathBuf;
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use log::{info, warn};

use route_odometer::io::{read_vehicle_fixes_file, write_fixes_file, FeedCatalog};
use route_odometer::{process_fixes, EngineConfig, RunSummary, VehicleFix};

#[derive(Parser, Debug)]
#[command(name = "route-odometer")]
#[command(about = "Distance travelled, schedule deviation and stop arrivals for transit vehicle positions")]
struct Args {
    /// First day to process (YYYY-MM-DD)
    #[arg(short, long)]
    start: NaiveDate,

    /// Last day to process, inclusive (YYYY-MM-DD)
    #[arg(short, long)]
    end: NaiveDate,

    /// Directory holding vehicle_positions/<date>.csv
    #[arg(short, long, env = "ROUTE_ODOMETER_DATA_DIR")]
    data_dir: PathBuf,

    /// Unpacked GTFS feed used for every day. Without it, <data-dir>/gtfs is used,
    /// picking a version per day when it holds an index.json
    #[arg(long)]
    gtfs_dir: Option<PathBuf>,

    /// Where to write <start>_<end>.csv
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// JSON engine config; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Agency time zone, e.g. America/Chicago
    #[arg(long)]
    timezone: Option<String>,

    /// Shape points examined per nearest-point search
    #[arg(long)]
    search_window: Option<usize>,

    /// Also write every processed position to this file
    #[arg(long)]
    positions_out: Option<PathBuf>,
}

fn engine_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(tz) = &args.timezone {
        config.timezone = tz
            .parse()
            .map_err(|err| anyhow!("unknown time zone {}: {}", tz, err))?;
    }
    if let Some(window) = args.search_window {
        config.search_window = window;
    }
    Ok(config)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.end < args.start {
        bail!("end date {} is before start date {}", args.end, args.start);
    }
    let config = engine_config(&args)?;

    let mut catalog = match &args.gtfs_dir {
        Some(dir) => FeedCatalog::single(dir),
        None => {
            let root = args.data_dir.join("gtfs");
            FeedCatalog::open(&root).with_context(|| format!("reading GTFS index in {}", root.display()))?
        }
    };

    info!("Processing dates from {} to {}", args.start, args.end);

    let mut arrivals: Vec<VehicleFix> = Vec::new();
    let mut positions: Vec<VehicleFix> = Vec::new();
    let mut summary = RunSummary::default();

    for day in args.start.iter_days().take_while(|day| *day <= args.end) {
        let now = Instant::now();
        let path = args
            .data_dir
            .join("vehicle_positions")
            .join(format!("{}.csv", day.format("%Y-%m-%d")));
        if !path.exists() {
            warn!("No vehicle positions for {} at {}, skipping", day, path.display());
            continue;
        }

        let feed = match catalog.feed_for(day).with_context(|| format!("loading GTFS for {}", day))? {
            Some(feed) => feed,
            None => {
                warn!("No GTFS version covers {}, skipping", day);
                continue;
            }
        };

        let fixes = read_vehicle_fixes_file(&path)?;
        let run = process_fixes(feed, fixes, &config).with_context(|| format!("processing {}", day))?;

        summary.merge(&run.summary);
        arrivals.extend(run.arrivals);
        if args.positions_out.is_some() {
            positions.extend(run.fixes);
        }
        info!("Processed {} in {}s", day, now.elapsed().as_secs());
    }

    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating {}", args.output_dir.display()))?;
    let output = args.output_dir.join(format!("{}_{}.csv", args.start, args.end));
    write_fixes_file(&output, &arrivals)?;

    if let Some(path) = &args.positions_out {
        write_fixes_file(path, &positions)?;
    }

    info!(
        "Done: {} arrivals from {} positions; {} regressions, {} unmatched schedule, {} trips without shape, {} empty stop groups, {} positions out of service",
        summary.arrivals,
        summary.fixes,
        summary.regressions,
        summary.unmatched_schedule,
        summary.trips_missing_shape,
        summary.empty_arrival_groups,
        summary.fixes_out_of_service
    );

    Ok(())
}
