//! Run configuration.
//!
//! A run is described by one TOML file:
//!
//! ```toml
//! [input]
//! stations = "stations.toml"
//! observations = "observations.csv"
//! start = "1990-01-01"          # optional analysis window
//! end = "1999-12-31"
//! missing_values = ["-9999"]    # extra sentinels read as missing
//!
//! [input.search]                # optional station search area
//! latitude = 40.66
//! longitude = -89.69
//! radius_km = 150.0
//!
//! [reconcile]
//! key_stations = ["USC00116610", "USC00118740"]
//! max_donors = 4
//! weighting = "inverse_distance"   # or "nearest_only"
//! distance_metric = "great_circle" # or "planar"
//! key_station_donors = true
//! workers = 4
//!
//! [output]
//! directory = "forcing"
//! prefix = "station_"
//! missing_marker = "NA"
//!
//! [logging]
//! level = "info"
//! file = "metfill.log"
//! ```
//!
//! Enumerated options are kept as strings until `reconcile_options` so an
//! unknown value surfaces as `InvalidConfiguration` rather than a TOML
//! parse error. `METFILL_OUTPUT_DIR`, `METFILL_WORKERS` and
//! `METFILL_LOG_LEVEL` override the file.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;

use crate::analysis::distance::DistanceMetricKind;
use crate::analysis::infill::Weighting;
use crate::ingest::SearchArea;
use crate::logging::LogLevel;
use crate::model::{
    DEFAULT_FILE_EXTENSION, DEFAULT_FILE_PREFIX, DEFAULT_MISSING_MARKER, DateRange,
    ReconcileError,
};
use crate::output::WriterOptions;
use crate::reconcile::ReconcileOptions;

pub const ENV_OUTPUT_DIR: &str = "METFILL_OUTPUT_DIR";
pub const ENV_WORKERS: &str = "METFILL_WORKERS";
pub const ENV_LOG_LEVEL: &str = "METFILL_LOG_LEVEL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read configuration {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("configuration is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Invalid(#[from] ReconcileError),
}

// ============================================================================
// File layout
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub input: InputConfig,
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputConfig {
    pub stations: PathBuf,
    pub observations: PathBuf,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(default)]
    pub missing_values: Vec<String>,
    pub search: Option<SearchArea>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub key_stations: Vec<String>,
    pub max_donors: Option<i64>,
    pub weighting: Option<String>,
    pub distance_metric: Option<String>,
    pub key_station_donors: Option<bool>,
    pub workers: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub directory: PathBuf,
    pub prefix: String,
    pub extension: String,
    pub missing_marker: String,
    pub manifest: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            directory: PathBuf::from("output"),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
            extension: DEFAULT_FILE_EXTENSION.to_string(),
            missing_marker: DEFAULT_MISSING_MARKER.to_string(),
            manifest: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub timestamps: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
            timestamps: false,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl RunConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads a configuration file. Relative input and output paths are
    /// resolved against the file's directory.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.input.stations);
        resolve(&mut self.input.observations);
        resolve(&mut self.output.directory);
    }

    /// Applies overrides from a variable lookup. `lookup` is `std::env::var`
    /// in the binary and a map in tests.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(dir) = lookup(ENV_OUTPUT_DIR) {
            self.output.directory = PathBuf::from(dir);
        }
        if let Some(workers) = lookup(ENV_WORKERS) {
            let parsed = workers.trim().parse::<i64>().map_err(|_| {
                ReconcileError::InvalidConfiguration(format!(
                    "{} must be an integer, got '{}'",
                    ENV_WORKERS, workers
                ))
            })?;
            self.reconcile.workers = Some(parsed);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        Ok(())
    }

    /// Applies overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    // ------------------------------------------------------------------------
    // Validation into typed options
    // ------------------------------------------------------------------------

    pub fn key_stations(&self) -> Result<Vec<String>, ReconcileError> {
        if self.reconcile.key_stations.is_empty() {
            return Err(ReconcileError::InvalidConfiguration(
                "reconcile.key_stations is empty".to_string(),
            ));
        }
        Ok(self.reconcile.key_stations.clone())
    }

    pub fn reconcile_options(&self) -> Result<ReconcileOptions, ReconcileError> {
        let r = &self.reconcile;
        let weighting = match &r.weighting {
            Some(s) => s.parse::<Weighting>()?,
            None => Weighting::default(),
        };
        let distance_metric = match &r.distance_metric {
            Some(s) => s.parse::<DistanceMetricKind>()?,
            None => DistanceMetricKind::default(),
        };
        let workers = match r.workers {
            None => None,
            Some(n) if n > 0 => Some(n as usize),
            Some(n) => {
                return Err(ReconcileError::InvalidConfiguration(format!(
                    "workers must be positive, got {}",
                    n
                )));
            }
        };
        let options = ReconcileOptions {
            max_donors: r.max_donors,
            weighting,
            distance_metric,
            decay: None,
            key_station_donors: r.key_station_donors.unwrap_or(true),
            workers,
        };
        options.validated_max_donors()?;
        Ok(options)
    }

    pub fn writer_options(&self) -> Result<WriterOptions, ReconcileError> {
        let o = &self.output;
        let options = WriterOptions {
            directory: o.directory.clone(),
            prefix: o.prefix.clone(),
            extension: o.extension.clone(),
            missing_marker: o.missing_marker.clone(),
            workers: self.reconcile_options()?.workers,
            write_manifest: o.manifest,
        };
        options.validate()?;
        Ok(options)
    }

    pub fn date_range(&self) -> Result<Option<DateRange>, ReconcileError> {
        match (self.input.start, self.input.end) {
            (None, None) => Ok(None),
            (Some(start), Some(end)) => DateRange::new(start, end).map(Some).ok_or_else(|| {
                ReconcileError::InvalidConfiguration(format!(
                    "input.start {} is after input.end {}",
                    start, end
                ))
            }),
            _ => Err(ReconcileError::InvalidConfiguration(
                "input.start and input.end must be given together".to_string(),
            )),
        }
    }

    pub fn log_level(&self) -> Result<LogLevel, ReconcileError> {
        self.logging
            .level
            .parse()
            .map_err(ReconcileError::InvalidConfiguration)
    }

    /// Every validation at once, before any data is read.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        self.key_stations()?;
        self.reconcile_options()?;
        self.writer_options()?;
        self.date_range()?;
        self.log_level()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
[input]
stations = "stations.toml"
observations = "obs.csv"

[reconcile]
key_stations = ["A", "B"]
"#;

    fn with_reconcile(extra: &str) -> RunConfig {
        let text = format!("{}{}\n", MINIMAL, extra);
        RunConfig::from_toml_str(&text).unwrap()
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = RunConfig::from_toml_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());
        let options = config.reconcile_options().unwrap();
        assert_eq!(options.weighting, Weighting::InverseDistance);
        assert_eq!(options.distance_metric, DistanceMetricKind::GreatCircle);
        assert_eq!(options.max_donors, None);
        assert!(options.key_station_donors);
        assert_eq!(config.output.missing_marker, "NA");
        assert_eq!(config.output.prefix, "station_");
    }

    #[test]
    fn test_enumerated_options_parse() {
        let config = with_reconcile("max_donors = 3\nweighting = \"nearest_only\"\ndistance_metric = \"planar\"");
        let options = config.reconcile_options().unwrap();
        assert_eq!(options.max_donors, Some(3));
        assert_eq!(options.weighting, Weighting::NearestOnly);
        assert_eq!(options.distance_metric, DistanceMetricKind::Planar);
    }

    #[test]
    fn test_unknown_weighting_is_invalid_configuration() {
        let config = with_reconcile("weighting = \"kriging\"");
        assert!(matches!(
            config.reconcile_options(),
            Err(ReconcileError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_non_positive_max_donors_is_invalid_configuration() {
        let config = with_reconcile("max_donors = 0");
        assert!(matches!(
            config.validate(),
            Err(ReconcileError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_empty_key_stations_is_invalid_configuration() {
        let text = MINIMAL.replace(r#"["A", "B"]"#, "[]");
        let config = RunConfig::from_toml_str(&text).unwrap();
        assert!(matches!(
            config.key_stations(),
            Err(ReconcileError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = RunConfig::from_toml_str(&format!("{}colour = \"blue\"\n", MINIMAL));
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_date_window_must_be_complete_and_ordered() {
        let mut config = RunConfig::from_toml_str(MINIMAL).unwrap();
        config.input.start = NaiveDate::from_ymd_opt(2000, 1, 1);
        assert!(config.date_range().is_err(), "start without end");
        config.input.end = NaiveDate::from_ymd_opt(1999, 1, 1);
        assert!(config.date_range().is_err(), "start after end");
        config.input.end = NaiveDate::from_ymd_opt(2000, 12, 31);
        assert_eq!(config.date_range().unwrap().unwrap().len_days(), 366);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = RunConfig::from_toml_str(MINIMAL).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_OUTPUT_DIR, "/tmp/forcing"),
            (ENV_WORKERS, "2"),
            (ENV_LOG_LEVEL, "debug"),
        ]
        .into_iter()
        .collect();
        config
            .apply_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.output.directory, PathBuf::from("/tmp/forcing"));
        assert_eq!(config.reconcile_options().unwrap().workers, Some(2));
        assert_eq!(config.log_level().unwrap(), LogLevel::Debug);
    }

    #[test]
    fn test_bad_worker_override_is_rejected() {
        let mut config = RunConfig::from_toml_str(MINIMAL).unwrap();
        let result = config.apply_overrides(|k| (k == ENV_WORKERS).then(|| "many".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_relative_paths_resolve_against_config_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, MINIMAL).unwrap();
        let config = RunConfig::load(&path).unwrap();
        assert_eq!(config.input.stations, dir.path().join("stations.toml"));
        assert_eq!(config.output.directory, dir.path().join("output"));
    }
}
