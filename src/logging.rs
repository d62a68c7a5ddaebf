//! Structured logging for the reconciliation service.
//!
//! Provides context-rich logging with pipeline stage and station
//! identifiers. Events go through `tracing`; `init_logger` installs a
//! subscriber that writes to the console and, optionally, appends to a log
//! file for batch runs.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Mutex;

use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt as tracing_fmt};

use crate::model::ReconcileError;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl LogLevel {
    fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Ingest,
    Detect,
    Donor,
    Infill,
    Report,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Config => write!(f, "CONFIG"),
            Stage::Ingest => write!(f, "INGEST"),
            Stage::Detect => write!(f, "DETECT"),
            Stage::Donor => write!(f, "DONOR"),
            Stage::Infill => write!(f, "INFILL"),
            Stage::Report => write!(f, "REPORT"),
            Stage::Write => write!(f, "WRITE"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - a caller-side data condition the run tolerates
    Expected,
    /// Unexpected failure - indicates an environment or configuration problem
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Installs the global subscriber.
///
/// Console output goes to stderr. When `log_file` is given, every event is
/// also appended to it without ANSI colour codes. `RUST_LOG` overrides
/// `min_level`. Calling this twice keeps the first subscriber.
pub fn init_logger(
    min_level: LogLevel,
    log_file: Option<&str>,
    console_timestamps: bool,
) -> std::io::Result<()> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    let console = tracing_fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);
    if console_timestamps {
        layers.push(console.boxed());
    } else {
        layers.push(console.without_time().boxed());
    }

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        layers.push(
            tracing_fmt::layer()
                .with_ansi(false)
                .with_target(false)
                .with_writer(Mutex::new(file))
                .boxed(),
        );
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(level_filter(min_level))
        .try_init();
    Ok(())
}

fn level_filter(min_level: LogLevel) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(min_level.filter().into())
        .from_env_lossy()
}

fn emit(level: LogLevel, stage: Stage, station_id: Option<&str>, message: &str) {
    let station = station_id.unwrap_or("-");
    match level {
        LogLevel::Debug => tracing::debug!(stage = %stage, station, "{}", message),
        LogLevel::Info => tracing::info!(stage = %stage, station, "{}", message),
        LogLevel::Warning => tracing::warn!(stage = %stage, station, "{}", message),
        LogLevel::Error => tracing::error!(stage = %stage, station, "{}", message),
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(stage: Stage, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Info, stage, station_id, message);
}

/// Log a warning message
pub fn warn(stage: Stage, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, stage, station_id, message);
}

/// Log an error message
pub fn error(stage: Stage, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Error, stage, station_id, message);
}

/// Log a debug message
pub fn debug(stage: Stage, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, stage, station_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a per-station failure by its error variant.
pub fn classify_failure(err: &ReconcileError) -> FailureType {
    match err {
        // The caller asked for a station the providers had no data for.
        ReconcileError::UnknownStation { .. } => FailureType::Expected,
        ReconcileError::IrreconcilableGap(_) => FailureType::Expected,
        // Unwritable target directory, full disk, permissions.
        ReconcileError::OutputWrite { .. } => FailureType::Unexpected,
        ReconcileError::WorkerPool(_) => FailureType::Unexpected,
        _ => FailureType::Unknown,
    }
}

/// Log a station failure with automatic classification
pub fn log_station_failure(stage: Stage, station_id: &str, operation: &str, err: &ReconcileError) {
    let failure_type = classify_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => warn(stage, Some(station_id), &message),
        FailureType::Unexpected => error(stage, Some(station_id), &message),
        FailureType::Unknown => warn(stage, Some(station_id), &message),
    }
}

// ---------------------------------------------------------------------------
// Run Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a reconciliation run
pub fn log_reconcile_summary(total_gaps: usize, filled: usize, unfilled: usize, failed_stations: usize) {
    let message = format!(
        "Reconciliation complete: {}/{} gaps filled, {} irreconcilable, {} stations failed",
        filled, total_gaps, unfilled, failed_stations
    );

    if unfilled == 0 && failed_stations == 0 {
        info(Stage::Report, None, &message);
    } else if filled == 0 && total_gaps > 0 {
        error(Stage::Report, None, &message);
    } else {
        warn(Stage::Report, None, &message);
    }
}

/// Log a summary of an output batch
pub fn log_write_summary(total: usize, written: usize, failed: usize) {
    let message = format!(
        "Output complete: {}/{} station files written, {} failed",
        written, total, failed
    );

    if failed == 0 {
        info(Stage::Write, None, &message);
    } else if written == 0 {
        error(Stage::Write, None, &message);
    } else {
        warn(Stage::Write, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!("WARN".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert!("verbose".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        let unknown = ReconcileError::unknown_station("K1", "no coverage in the observation table");
        assert_eq!(classify_failure(&unknown), FailureType::Expected);

        let write = ReconcileError::output_write("K1", "permission denied");
        assert_eq!(classify_failure(&write), FailureType::Unexpected);

        let table = ReconcileError::InvalidTable("duplicate row".into());
        assert_eq!(classify_failure(&table), FailureType::Unknown);
    }

    #[test]
    fn test_logging_without_subscriber_is_a_no_op() {
        info(Stage::Detect, Some("K1"), "no subscriber installed");
        log_reconcile_summary(10, 8, 2, 0);
    }
}
