//! Library entrypoint: re‑export modules

pub mod config;
pub mod errors;
pub mod export;
pub mod influx;
pub mod ingestor;
pub mod metrics;
