//! Entrypoint: set up tracing, load `.env` and configuration, then import the
//! Withings export folder given on the command line into InfluxDB.
//!
//! Connection settings come from `Settings` (see `config.rs`):
//!  - `INFLUXDB_URL`      – InfluxDB base URL
//!  - `TOKEN`             – API token
//!  - `INFLUXDB_ORG`      – organisation
//!  - `INFLUXDB_BUCKET`   – target bucket

use std::path::PathBuf;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{fmt, EnvFilter};

use scanwatch_ingestor::config::Settings;
use scanwatch_ingestor::errors::IngestError;
use scanwatch_ingestor::influx::{DryRunSink, InfluxClient};
use scanwatch_ingestor::ingestor::ingest_folder;
use scanwatch_ingestor::metrics;

#[derive(Parser, Debug)]
#[command(author, version, about = "Import Withings ScanWatch CSV exports into InfluxDB", long_about = None)]
struct Cli {
    /// Folder containing withings export CSV files
    #[arg(short, long)]
    folder: PathBuf,

    /// Config file name, with or without the `.toml` extension
    #[arg(long, default_value = "Config")]
    config: String,

    /// Parse and render every point without sending anything
    #[arg(long)]
    dry_run: bool,
}

/// Application entrypoint for the ScanWatch importer.
///
/// **Workflow**:
/// 1. Initialise tracing/logging from `RUST_LOG` (or default to `info`).
/// 2. Load `.env`, `Config.toml` and the `INFLUXDB_*`/`TOKEN` overrides.
/// 3. Import each known export file in the folder, flushing per file.
/// 4. Log a run summary and the collected metrics.
#[tokio::main]
async fn main() -> Result<(), IngestError> {
    // ───────────────────────────────────────────────────────────────
    // 1. Initialise tracing / logging
    // ───────────────────────────────────────────────────────────────
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // ───────────────────────────────────────────────────────────────
    // 2. Load configuration
    // ───────────────────────────────────────────────────────────────
    if let Err(e) = dotenvy::dotenv() {
        debug!(error = %e, "No .env file loaded");
    }
    let cli = Cli::parse();

    let settings = Settings::new(&cli.config)?;
    info!(
        url    = %settings.influxdb.url,
        org    = %settings.influxdb.org,
        bucket = %settings.influxdb.bucket,
        device = %settings.device,
        exports = settings.exports.len(),
        "Loaded configuration"
    );

    // ───────────────────────────────────────────────────────────────
    // 3. Import
    // ───────────────────────────────────────────────────────────────
    let summary = if cli.dry_run {
        info!("Dry run: nothing will be written to InfluxDB");
        let mut sink = DryRunSink::default();
        let summary = ingest_folder(&settings, &cli.folder, &mut sink).await?;
        info!(points = sink.lines, "Dry run complete");
        summary
    } else {
        settings.validate()?;
        let mut client = InfluxClient::new(&settings.influxdb)?;
        info!(url = %client.write_url(), "Writing to InfluxDB");
        ingest_folder(&settings, &cli.folder, &mut client).await?
    };

    // ───────────────────────────────────────────────────────────────
    // 4. Summary
    // ───────────────────────────────────────────────────────────────
    info!(
        files         = summary.files.len(),
        missing       = summary.missing.len(),
        samples       = summary.total_samples(),
        rejected_rows = summary.total_rejected_rows(),
        "Import complete"
    );
    debug!("Metrics:\n{}", metrics::gather_metrics());

    Ok(())
}
