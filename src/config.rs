//! Type-safe configuration loader using the `config` crate,
//! with manual environment-variable overrides for the InfluxDB connection.

use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::{env, time::Duration};
use url::Url;

use crate::export::{ExportFile, ValueKind};

/// Top-level application settings loaded from `Config.toml`
/// and then overridden (where applicable) by environment variables.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Settings {
    /// Where and how to write points
    pub influxdb: InfluxSettings,

    /// Value of the `device` tag attached to every point
    pub device: String,

    /// Export files to look for in the folder, in processing order
    pub exports: Vec<ExportFile>,
}

/// Connection details for an InfluxDB v2 instance.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InfluxSettings {
    /// Base URL, e.g. `http://localhost:8086`
    pub url: String,

    /// API token with write access to `bucket`
    pub token: String,

    pub org: String,

    pub bucket: String,

    /// Per-request timeout (e.g. "30s", "2m")
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Points buffered before a batch is sent
    pub batch_size: usize,
}

impl Default for InfluxSettings {
    fn default() -> Self {
        InfluxSettings {
            url: String::new(),
            token: String::new(),
            org: String::new(),
            bucket: String::new(),
            timeout: Duration::from_secs(30),
            batch_size: 5000,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            influxdb: InfluxSettings::default(),
            device: "scanwatch".to_string(),
            exports: default_exports(),
        }
    }
}

/// The three files a Withings account export carries for the ScanWatch.
pub fn default_exports() -> Vec<ExportFile> {
    vec![
        ExportFile::new("raw_tracker_steps.csv", "steps", ValueKind::Integer),
        ExportFile::new("raw_hr_hr.csv", "heart_rate", ValueKind::Integer),
        ExportFile::new("raw_tracker_distance.csv", "distance", ValueKind::Float),
    ]
}

impl Settings {
    /// Load settings from `<config_name>.toml` (if present),
    /// then apply any overrides from these environment variables:
    ///
    /// - `INFLUXDB_URL`
    /// - `TOKEN`
    /// - `INFLUXDB_ORG`
    /// - `INFLUXDB_BUCKET`
    /// - `INFLUXDB_TIMEOUT` (humantime, e.g. "45s")
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honoured.
    /// The result is not validated; see [`Settings::validate`].
    pub fn new(config_name: &str) -> Result<Self, ConfigError> {
        // 1) Base values from the config file
        let cfg = Config::builder()
            .add_source(File::with_name(config_name).required(false))
            .build()?;

        let mut settings: Settings = cfg.try_deserialize()?;

        // 2) Environment wins over the file
        settings.apply_env_overrides(|key| env::var(key).ok())?;

        Ok(settings)
    }

    /// Override connection settings from `lookup`. Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(val) = get("INFLUXDB_URL") {
            self.influxdb.url = val;
        }
        if let Some(val) = get("TOKEN") {
            self.influxdb.token = val;
        }
        if let Some(val) = get("INFLUXDB_ORG") {
            self.influxdb.org = val;
        }
        if let Some(val) = get("INFLUXDB_BUCKET") {
            self.influxdb.bucket = val;
        }
        if let Some(val) = get("INFLUXDB_TIMEOUT") {
            self.influxdb.timeout =
                humantime::parse_duration(&val).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
        }

        Ok(())
    }

    /// Reject settings that cannot possibly produce a successful write.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("INFLUXDB_URL", &self.influxdb.url),
            ("TOKEN", &self.influxdb.token),
            ("INFLUXDB_ORG", &self.influxdb.org),
            ("INFLUXDB_BUCKET", &self.influxdb.bucket),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::Message(format!(
                "missing InfluxDB settings: {}",
                missing.join(", ")
            )));
        }

        Url::parse(&self.influxdb.url).map_err(|e| ConfigError::Foreign(Box::new(e)))?;

        if self.influxdb.batch_size == 0 {
            return Err(ConfigError::Message(
                "influxdb.batch_size must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn complete_env() -> impl Fn(&str) -> Option<String> {
        env_from(&[
            ("INFLUXDB_URL", "http://localhost:8086"),
            ("TOKEN", "secret"),
            ("INFLUXDB_ORG", "home"),
            ("INFLUXDB_BUCKET", "health"),
        ])
    }

    #[test]
    fn defaults_cover_the_three_scanwatch_exports() {
        let settings = Settings::default();
        let names: Vec<_> = settings
            .exports
            .iter()
            .map(|e| e.measurement.as_str())
            .collect();
        assert_eq!(names, ["steps", "heart_rate", "distance"]);
        assert_eq!(settings.exports[2].value_kind, ValueKind::Float);
        assert_eq!(settings.device, "scanwatch");
        assert_eq!(settings.influxdb.batch_size, 5000);
    }

    #[test]
    fn env_overrides_fill_connection_settings() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(complete_env()).unwrap();

        assert_eq!(settings.influxdb.url, "http://localhost:8086");
        assert_eq!(settings.influxdb.token, "secret");
        assert_eq!(settings.influxdb.org, "home");
        assert_eq!(settings.influxdb.bucket, "health");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn empty_env_values_do_not_clobber_file_values() {
        let mut settings = Settings::default();
        settings.influxdb.org = "from-file".to_string();
        settings
            .apply_env_overrides(env_from(&[("INFLUXDB_ORG", "  ")]))
            .unwrap();
        assert_eq!(settings.influxdb.org, "from-file");
    }

    #[test]
    fn timeout_override_uses_humantime() {
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(env_from(&[("INFLUXDB_TIMEOUT", "1m 30s")]))
            .unwrap();
        assert_eq!(settings.influxdb.timeout, Duration::from_secs(90));

        assert!(settings
            .apply_env_overrides(env_from(&[("INFLUXDB_TIMEOUT", "soon")]))
            .is_err());
    }

    #[test]
    fn validate_lists_every_missing_setting() {
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(env_from(&[("INFLUXDB_URL", "http://localhost:8086")]))
            .unwrap();

        let err = settings.validate().unwrap_err().to_string();
        assert!(err.contains("TOKEN"));
        assert!(err.contains("INFLUXDB_ORG"));
        assert!(err.contains("INFLUXDB_BUCKET"));
        assert!(!err.contains("INFLUXDB_URL"));
    }

    #[test]
    fn validate_rejects_bad_url_and_zero_batch() {
        let mut settings = Settings::default();
        settings.apply_env_overrides(complete_env()).unwrap();

        settings.influxdb.url = "not a url".to_string();
        assert!(settings.validate().is_err());

        settings.influxdb.url = "http://localhost:8086".to_string();
        settings.influxdb.batch_size = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn file_values_deserialize_with_defaults_for_the_rest() {
        let cfg = Config::builder()
            .add_source(config::File::from_str(
                r#"
                device = "wrist"

                [influxdb]
                url = "http://influx:8086"
                timeout = "5s"

                [[exports]]
                file_name = "raw_tracker_calories-earned.csv"
                measurement = "calories"
                value_kind = "float"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap();
        let settings: Settings = cfg.try_deserialize().unwrap();

        assert_eq!(settings.device, "wrist");
        assert_eq!(settings.influxdb.url, "http://influx:8086");
        assert_eq!(settings.influxdb.timeout, Duration::from_secs(5));
        assert_eq!(settings.influxdb.batch_size, 5000);
        assert_eq!(settings.exports.len(), 1);
        assert_eq!(settings.exports[0].measurement, "calories");
        assert_eq!(settings.exports[0].value_kind, ValueKind::Float);
    }
}
