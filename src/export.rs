//! export.rs
//!
//! Withings export files: reading the CSV, parsing the bracketed array
//! columns, and expanding each row into individual timestamped samples.
//!
//! A row looks like
//!
//! ```text
//! start,duration,value
//! 2023-01-01T00:00:00Z,"[0,60]","[1.5,2.5]"
//! ```
//!
//! where `duration` holds second offsets from `start` and `value` holds one
//! reading per offset.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Deserialize;
use tracing::warn;

use crate::errors::{IngestError, RowError};
use crate::metrics::VALUE_PARSE_FAILURES;

/// How the value column of an export is typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    /// Whole counts (steps, beats per minute), coerced to `f64`
    Integer,
    /// Fractional readings (distance in metres)
    Float,
}

impl ValueKind {
    /// Parse a bracketed value array according to this kind.
    pub fn parse_values(self, raw: &str) -> Vec<f64> {
        match self {
            ValueKind::Integer => parse_int_array(raw).into_iter().map(|v| v as f64).collect(),
            ValueKind::Float => parse_float_array(raw),
        }
    }
}

/// One known export file and the measurement its samples are written to.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportFile {
    pub file_name: String,
    pub measurement: String,
    pub value_kind: ValueKind,
}

impl ExportFile {
    pub fn new(file_name: &str, measurement: &str, value_kind: ValueKind) -> Self {
        ExportFile {
            file_name: file_name.to_string(),
            measurement: measurement.to_string(),
            value_kind,
        }
    }
}

/// A single reading at a single instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// One CSV row: a start instant plus parallel offset and value arrays.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub start: DateTime<Utc>,
    pub offsets: Vec<i64>,
    pub values: Vec<f64>,
}

impl Row {
    /// Zip offsets and values into samples at `start + offset` seconds.
    ///
    /// Fails without producing anything when the arrays differ in length or
    /// an offset moves a sample outside what an i64 nanosecond timestamp can
    /// hold (roughly 1677 to 2262), the range line protocol can carry.
    pub fn expand(&self) -> Result<Vec<Sample>, RowError> {
        if self.offsets.len() != self.values.len() {
            return Err(RowError::LengthMismatch {
                offsets: self.offsets.len(),
                values: self.values.len(),
            });
        }

        self.offsets
            .iter()
            .zip(&self.values)
            .map(|(&offset, &value)| {
                let timestamp = Duration::try_seconds(offset)
                    .and_then(|delta| self.start.checked_add_signed(delta))
                    .filter(|ts| ts.timestamp_nanos_opt().is_some())
                    .ok_or(RowError::OffsetOutOfRange(offset))?;
                Ok(Sample { timestamp, value })
            })
            .collect()
    }
}

/// A parsed row with the CSV line it came from, for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    pub line: u64,
    pub row: Row,
}

/// Strip the surrounding brackets and split on commas.
/// `""` and `"[]"` are empty arrays.
fn array_elements(raw: &str) -> impl Iterator<Item = &str> {
    let inner = raw.trim().trim_matches(|c| c == '[' || c == ']').trim();
    inner
        .split(',')
        .map(str::trim)
        .filter(move |_| !inner.is_empty())
}

fn parse_array<T>(raw: &str, kind: &str) -> Vec<T>
where
    T: std::str::FromStr + Default,
    T::Err: std::fmt::Display,
{
    array_elements(raw)
        .map(|element| match element.parse::<T>() {
            Ok(v) => v,
            Err(e) => {
                VALUE_PARSE_FAILURES.inc();
                warn!(element, error = %e, "Error parsing {}, defaulting to zero", kind);
                T::default()
            }
        })
        .collect()
}

/// Parse `"[1, 2, 3]"` into integers. Unparsable elements become `0`.
pub fn parse_int_array(raw: &str) -> Vec<i64> {
    parse_array(raw, "integer")
}

/// Parse `"[1.5, 2.5]"` into floats. Unparsable elements become `0.0`.
///
/// `NaN` and infinities parse fine but have no line protocol encoding, so they
/// are zeroed too.
pub fn parse_float_array(raw: &str) -> Vec<f64> {
    parse_array::<f64>(raw, "float")
        .into_iter()
        .map(|v| {
            if v.is_finite() {
                v
            } else {
                VALUE_PARSE_FAILURES.inc();
                warn!(value = %v, "Non-finite float, defaulting to zero");
                0.0
            }
        })
        .collect()
}

/// Recover the two array columns from a record.
///
/// Properly quoted exports give exactly three fields. Unquoted arrays get
/// split by the CSV reader on their inner commas, so when the offsets field
/// opens a bracket it does not close, the tail is rejoined and cut after the
/// first closing bracket. Anything else with more than three fields is
/// rejected.
fn array_columns(record: &StringRecord) -> Option<(String, String)> {
    if record.len() == 3 {
        return Some((record[1].to_string(), record[2].to_string()));
    }

    let first = record.get(1)?;
    if !first.starts_with('[') || first.ends_with(']') {
        return None;
    }

    let tail = record.iter().skip(1).collect::<Vec<_>>().join(",");
    let close = tail.find(']')?;
    let (offsets, values) = tail.split_at(close + 1);
    let values = values.strip_prefix(',')?;
    if !values.starts_with('[') || !values.ends_with(']') {
        return None;
    }
    Some((offsets.to_string(), values.to_string()))
}

/// Parse an export from any reader. `path` is only used in errors.
///
/// Timestamp and CSV failures abort the whole file; bad array elements are
/// logged and zeroed.
pub fn parse_export<R: Read>(
    reader: R,
    path: &Path,
    kind: ValueKind,
) -> Result<Vec<ParsedRow>, IngestError> {
    let mut csv_reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let mut rows = Vec::new();
    for result in csv_reader.records() {
        let record = result.map_err(|e| IngestError::Csv(path.to_path_buf(), e))?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        let (offsets, values) =
            array_columns(&record).ok_or_else(|| {
                if record.len() < 3 {
                    IngestError::ShortRecord {
                        path: path.to_path_buf(),
                        line,
                        found: record.len(),
                    }
                } else {
                    IngestError::ExtraColumns {
                        path: path.to_path_buf(),
                        line,
                        found: record.len(),
                    }
                }
            })?;

        let start = DateTime::parse_from_rfc3339(&record[0])
            .map_err(|source| IngestError::Timestamp {
                path: path.to_path_buf(),
                line,
                value: record[0].to_string(),
                source,
            })?
            .with_timezone(&Utc);

        rows.push(ParsedRow {
            line,
            row: Row {
                start,
                offsets: parse_int_array(&offsets),
                values: kind.parse_values(&values),
            },
        });
    }

    Ok(rows)
}

/// Open and parse the export at `path`.
pub fn read_export(path: &Path, kind: ValueKind) -> Result<Vec<ParsedRow>, IngestError> {
    let file = File::open(path).map_err(|e| IngestError::Io(path.to_path_buf(), e))?;
    parse_export(file, path, kind)
}
