//! Hard failures.
//!
//! Missing shapes, distance regressions, unmatched schedules and empty arrival groups
//! are expected in real feeds and never show up here; they are counted in
//! [`RunSummary`](crate::pipeline::RunSummary) instead. An [`Error`] means the input
//! itself is structurally unusable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid GTFS time {0:?}, expected HH:MM:SS")]
    InvalidTime(String),

    #[error("fix of trip {trip_id} at {timestamp} has non-finite coordinates ({lat}, {lon})")]
    InvalidFix {
        trip_id: String,
        timestamp: String,
        lat: f64,
        lon: f64,
    },

    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(String),

    #[cfg(feature = "io")]
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "io")]
    #[error("failed to read {file_name}")]
    Csv {
        file_name: String,
        #[source]
        source: csv::Error,
    },

    #[cfg(feature = "io")]
    #[error("invalid GTFS index: {0}")]
    FeedIndex(String),

    #[cfg(feature = "io")]
    #[error("invalid config file")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
