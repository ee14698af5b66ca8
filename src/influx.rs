//! influx.rs
//!
//! InfluxDB v2 write path: line protocol points, a batching writer, and the
//! HTTP client that posts batches to `/api/v2/write`.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use tracing::debug;
use url::Url;

use crate::config::InfluxSettings;
use crate::errors::IngestError;
use crate::metrics::{POINTS_WRITTEN, WRITE_HISTOGRAM};

/// One InfluxDB point with float fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, f64>,
    timestamp: DateTime<Utc>,
}

impl Point {
    pub fn new(measurement: &str, timestamp: DateTime<Utc>) -> Self {
        Point {
            measurement: measurement.to_string(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp,
        }
    }

    pub fn tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: f64) -> Self {
        self.fields.insert(key.to_string(), value);
        self
    }

    /// Render as a line protocol record with a nanosecond timestamp.
    ///
    /// Tags and fields come out sorted by key, which is the order InfluxDB
    /// prefers for tags.
    pub fn to_line(&self) -> Result<String, IngestError> {
        let nanos = self
            .timestamp
            .timestamp_nanos_opt()
            .ok_or(IngestError::TimestampRange(self.timestamp))?;

        let mut line = escape(&self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            line.push_str(&format!(
                ",{}={}",
                escape(key, &[',', '=', ' ']),
                escape(value, &[',', '=', ' '])
            ));
        }

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape(key, &[',', '=', ' ']), value))
            .collect::<Vec<_>>()
            .join(",");

        line.push_str(&format!(" {} {}", fields, nanos));
        Ok(line)
    }
}

fn escape(raw: &str, special: &[char]) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Destination for batches of line protocol.
#[allow(async_fn_in_trait)]
pub trait LineSink {
    /// Deliver one batch. Either every line is accepted or an error is returned.
    async fn write_lines(&mut self, lines: &[String]) -> Result<(), IngestError>;
}

/// Posts batches to an InfluxDB v2 instance.
pub struct InfluxClient {
    client: Client,
    write_url: Url,
    token: String,
}

impl InfluxClient {
    pub fn new(settings: &InfluxSettings) -> Result<Self, IngestError> {
        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(concat!("scanwatch_ingestor/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(InfluxClient {
            client,
            write_url: write_url(&settings.url, &settings.org, &settings.bucket)?,
            token: settings.token.clone(),
        })
    }

    pub fn write_url(&self) -> &Url {
        &self.write_url
    }
}

/// Build `{base}/api/v2/write?org=..&bucket=..&precision=ns`, keeping any
/// path prefix the base URL carries (reverse proxies).
pub fn write_url(base: &str, org: &str, bucket: &str) -> Result<Url, IngestError> {
    let mut base = Url::parse(base)?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    let mut url = base.join("api/v2/write")?;
    url.query_pairs_mut()
        .append_pair("org", org)
        .append_pair("bucket", bucket)
        .append_pair("precision", "ns");
    Ok(url)
}

impl LineSink for InfluxClient {
    async fn write_lines(&mut self, lines: &[String]) -> Result<(), IngestError> {
        if lines.is_empty() {
            return Ok(());
        }
        let start = Instant::now();

        let resp = self
            .client
            .post(self.write_url.clone())
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(lines.join("\n"))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(IngestError::WriteRejected { status, body });
        }

        WRITE_HISTOGRAM.observe(start.elapsed().as_secs_f64());
        POINTS_WRITTEN.inc_by(lines.len() as u64);
        debug!(points = lines.len(), %status, "Batch written");
        Ok(())
    }
}

/// Accepts everything and only counts; used for `--dry-run`.
#[derive(Debug, Default)]
pub struct DryRunSink {
    pub lines: usize,
}

impl LineSink for DryRunSink {
    async fn write_lines(&mut self, lines: &[String]) -> Result<(), IngestError> {
        if let Some(first) = lines.first() {
            debug!(points = lines.len(), first = %first, "Dry run, batch not sent");
        }
        self.lines += lines.len();
        Ok(())
    }
}

/// Buffers rendered points and hands them to a sink `batch_size` at a time.
///
/// Nothing is guaranteed delivered until [`BatchWriter::flush`] returns.
pub struct BatchWriter<'a, S: LineSink> {
    sink: &'a mut S,
    batch_size: usize,
    buffer: Vec<String>,
    written: usize,
}

impl<'a, S: LineSink> BatchWriter<'a, S> {
    pub fn new(sink: &'a mut S, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        BatchWriter {
            sink,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            written: 0,
        }
    }

    pub async fn write_point(&mut self, point: &Point) -> Result<(), IngestError> {
        self.buffer.push(point.to_line()?);
        if self.buffer.len() >= self.batch_size {
            self.send().await?;
        }
        Ok(())
    }

    /// Send whatever is buffered. Returns the number of points delivered
    /// since the previous flush.
    pub async fn flush(&mut self) -> Result<usize, IngestError> {
        self.send().await?;
        Ok(std::mem::take(&mut self.written))
    }

    async fn send(&mut self) -> Result<(), IngestError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.sink.write_lines(&self.buffer).await?;
        self.written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }
}
