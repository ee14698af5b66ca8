//! Centralised error types for the ingestor.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that abort the whole import run.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("I/O error reading {}: {1}", .0.display())]
    Io(PathBuf, #[source] std::io::Error),

    #[error("CSV error in {}: {1}", .0.display())]
    Csv(PathBuf, #[source] csv::Error),

    #[error("{}:{line}: invalid timestamp {value:?}: {source}", .path.display())]
    Timestamp {
        path: PathBuf,
        line: u64,
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("{}:{line}: expected 3 columns (start, offsets, values), found {found}", .path.display())]
    ShortRecord {
        path: PathBuf,
        line: u64,
        found: usize,
    },

    #[error(
        "{}:{line}: found {found} columns, expected 3 (start, offsets, values); quote array columns that contain commas",
        .path.display()
    )]
    ExtraColumns {
        path: PathBuf,
        line: u64,
        found: usize,
    },

    #[error("Invalid InfluxDB URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("HTTP error writing to InfluxDB: {0}")]
    Http(#[from] reqwest::Error),

    #[error("InfluxDB rejected write with status {status}: {body}")]
    WriteRejected {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("Timestamp {0} cannot be encoded as nanoseconds")]
    TimestampRange(DateTime<Utc>),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Errors confined to a single CSV row. The row is skipped, the file is not.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RowError {
    #[error("row has {offsets} offsets but {values} values")]
    LengthMismatch { offsets: usize, values: usize },

    #[error("offset of {0}s moves the sample out of the representable time range")]
    OffsetOutOfRange(i64),
}
