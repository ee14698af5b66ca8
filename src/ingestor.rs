//! ingestor.rs
//!
//! Core import loop: for each known export in the folder, read it, expand
//! every row into samples, and write one point per sample, flushing once per
//! file before the next one starts.

use std::path::Path;

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::errors::IngestError;
use crate::export::{read_export, ExportFile, ParsedRow, Sample};
use crate::influx::{BatchWriter, LineSink, Point};
use crate::metrics::{ROWS_READ, ROWS_REJECTED};

/// Field every sample value is written to.
pub const VALUE_FIELD: &str = "count";

/// Outcome of importing one export file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSummary {
    pub file_name: String,
    pub measurement: String,
    pub rows: usize,
    pub rejected_rows: usize,
    pub samples: usize,
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: Vec<FileSummary>,
    /// Known export files that were not present in the folder
    pub missing: Vec<String>,
}

impl IngestSummary {
    pub fn total_samples(&self) -> usize {
        self.files.iter().map(|f| f.samples).sum()
    }

    pub fn total_rejected_rows(&self) -> usize {
        self.files.iter().map(|f| f.rejected_rows).sum()
    }
}

/// Expand every row, logging and skipping those whose arrays don't line up.
/// Returns the samples in row order plus the number of rejected rows.
pub fn expand_rows(path: &Path, rows: &[ParsedRow]) -> (Vec<Sample>, usize) {
    let mut samples = Vec::new();
    let mut rejected = 0;

    for parsed in rows {
        match parsed.row.expand() {
            Ok(expanded) => samples.extend(expanded),
            Err(e) => {
                rejected += 1;
                ROWS_REJECTED.inc();
                error!(
                    file  = %path.display(),
                    line  = parsed.line,
                    error = %e,
                    "Skipping row"
                );
            }
        }
    }

    (samples, rejected)
}

/// Build the write point for one sample.
pub fn sample_to_point(measurement: &str, device: &str, sample: &Sample) -> Point {
    Point::new(measurement, sample.timestamp)
        .tag("device", device)
        .field(VALUE_FIELD, sample.value)
}

/// Read, expand and write a single export file.
pub async fn ingest_file<S: LineSink>(
    settings: &Settings,
    export: &ExportFile,
    path: &Path,
    sink: &mut S,
) -> Result<FileSummary, IngestError> {
    info!(file = %path.display(), "Reading file");
    let rows = read_export(path, export.value_kind)?;
    ROWS_READ.inc_by(rows.len() as u64);
    info!(
        file = %path.display(),
        rows = rows.len(),
        "Found a total of {} records in CSV file",
        rows.len()
    );

    let (samples, rejected_rows) = expand_rows(path, &rows);

    info!(
        measurement = %export.measurement,
        samples = samples.len(),
        "Writing samples to InfluxDB"
    );
    let mut writer = BatchWriter::new(sink, settings.influxdb.batch_size);
    for sample in &samples {
        let point = sample_to_point(&export.measurement, &settings.device, sample);
        writer.write_point(&point).await?;
    }
    let written = writer.flush().await?;

    let summary = FileSummary {
        file_name: export.file_name.clone(),
        measurement: export.measurement.clone(),
        rows: rows.len(),
        rejected_rows,
        samples: written,
    };
    info!(
        file          = %summary.file_name,
        measurement   = %summary.measurement,
        rows          = summary.rows,
        samples       = summary.samples,
        rejected_rows = summary.rejected_rows,
        "Data successfully written to InfluxDB"
    );
    Ok(summary)
}

/// Import every configured export present in `folder`, one file at a time.
///
/// A missing folder or missing file is logged and skipped; parse failures and
/// write failures abort the run.
pub async fn ingest_folder<S: LineSink>(
    settings: &Settings,
    folder: &Path,
    sink: &mut S,
) -> Result<IngestSummary, IngestError> {
    if !folder.is_dir() {
        warn!(folder = %folder.display(), "Folder not found");
    }

    let mut summary = IngestSummary::default();
    for export in &settings.exports {
        let path = folder.join(&export.file_name);
        if !path.is_file() {
            info!(file = %path.display(), "File doesn't exist, skipping");
            summary.missing.push(export.file_name.clone());
            continue;
        }

        let file_summary = ingest_file(settings, export, &path, sink).await?;
        summary.files.push(file_summary);
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::Row;
    use chrono::{TimeZone, Utc};

    fn parsed(line: u64, offsets: Vec<i64>, values: Vec<f64>) -> ParsedRow {
        ParsedRow {
            line,
            row: Row {
                start: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
                offsets,
                values,
            },
        }
    }

    #[test]
    fn expand_rows_skips_mismatched_rows_only() {
        let rows = vec![
            parsed(2, vec![0, 60], vec![1.0, 2.0]),
            parsed(3, vec![0, 60], vec![1.0]),
            parsed(4, vec![0], vec![3.0]),
        ];

        let (samples, rejected) = expand_rows(Path::new("raw_tracker_steps.csv"), &rows);

        assert_eq!(rejected, 1);
        let values: Vec<_> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn points_carry_device_tag_and_count_field() {
        let sample = Sample {
            timestamp: Utc.with_ymd_and_hms(2023, 1, 1, 0, 1, 0).unwrap(),
            value: 2.5,
        };
        let line = sample_to_point("distance", "scanwatch", &sample)
            .to_line()
            .unwrap();
        assert_eq!(line, "distance,device=scanwatch count=2.5 1672531260000000000");
    }

    #[test]
    fn summary_totals_add_up() {
        let summary = IngestSummary {
            files: vec![
                FileSummary {
                    samples: 3,
                    rejected_rows: 1,
                    ..Default::default()
                },
                FileSummary {
                    samples: 4,
                    ..Default::default()
                },
            ],
            missing: vec![],
        };
        assert_eq!(summary.total_samples(), 7);
        assert_eq!(summary.total_rejected_rows(), 1);
    }
}
