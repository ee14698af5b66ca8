//! Prometheus metrics registry and metric definitions.
//!
//! The importer is one-shot, so nothing scrapes these; the text exposition is
//! logged when a run finishes.

use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder};

/// Global registry under crate namespace
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("scanwatch_ingestor".into()), None)
        .expect("failed to create Prometheus registry")
});

fn register_counter(name: &str, help: &str) -> IntCounter {
    let c = IntCounter::with_opts(Opts::new(name, help)).expect("counter opts");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("counter registration");
    c
}

/// CSV rows read from export files
pub static ROWS_READ: Lazy<IntCounter> =
    Lazy::new(|| register_counter("rows_read_total", "Total number of CSV rows read"));

/// Rows skipped because their arrays could not be expanded
pub static ROWS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "rows_rejected_total",
        "Total number of CSV rows skipped due to row-level errors",
    )
});

/// Array elements that failed to parse and were replaced by zero
pub static VALUE_PARSE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_counter(
        "value_parse_failures_total",
        "Total number of array elements defaulted to zero after a parse failure",
    )
});

/// Points accepted by InfluxDB
pub static POINTS_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_counter("points_written_total", "Total number of points written")
});

/// Histogram of batch write durations
pub static WRITE_HISTOGRAM: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "write_duration_seconds",
        "Duration of one InfluxDB batch write in seconds",
    );
    let h = Histogram::with_opts(opts).expect("histogram opts");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("histogram registration");
    h
});

/// Encode all metrics as text
pub fn gather_metrics() -> String {
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    encoder.encode(&mf, &mut buffer).expect("failed to encode");
    String::from_utf8(buffer).expect("invalid utf8")
}
