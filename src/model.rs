//! Core data types for the station reconciliation service.
//!
//! This module defines the shared domain model imported by all other modules:
//! stations, gaps, per-cell provenance, date windows and the error types.
//! It contains no I/O and no reconciliation logic.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Marker written in place of a value that could not be reconciled.
pub const DEFAULT_MISSING_MARKER: &str = "NA";

/// Prefix of every per-station output file name.
pub const DEFAULT_FILE_PREFIX: &str = "station_";

/// Extension of every per-station output file.
pub const DEFAULT_FILE_EXTENSION: &str = "csv";

/// Text form used for every daily date in input and output files.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// Metadata for a single weather station.
///
/// Loaded once per run from the station metadata provider and never
/// modified afterwards. Coordinates are WGS84 degrees, elevation in metres.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub elevation: f64,
}

// ---------------------------------------------------------------------------
// Gaps and cells
// ---------------------------------------------------------------------------

/// A single missing (station, date, variable) cell of a key station.
///
/// Ordering is station, then date, then variable name, which is the order
/// gaps are listed in the reconciliation report.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Gap {
    pub station_id: String,
    pub date: NaiveDate,
    pub variable: String,
}

impl std::fmt::Display for Gap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.station_id,
            self.date.format(DATE_FORMAT),
            self.variable
        )
    }
}

/// Where the value of a reconciled cell came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellSource {
    /// The raw observation was present.
    Observed,
    /// The raw observation was missing and a donor-derived value was written.
    Infilled,
    /// The raw observation was missing and no donor could supply it.
    Missing,
}

// ---------------------------------------------------------------------------
// Date windows
// ---------------------------------------------------------------------------

/// An inclusive range of daily dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Returns `None` when `end` precedes `start`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(DateRange { start, end })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of days in the range, both ends included.
    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the reconciliation core and the station writer.
///
/// `UnknownStation` and `OutputWrite` are scoped to a single station and are
/// recorded in the report while the batch continues. `InvalidConfiguration`
/// is raised before any work starts. `IrreconcilableGap` is never returned
/// from `reconcile`; it is the warning form of a report entry.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReconcileError {
    #[error("unknown station {station_id}: {reason}")]
    UnknownStation { station_id: String, reason: String },

    #[error("irreconcilable gap: no donor value for {0}")]
    IrreconcilableGap(Gap),

    #[error("output for station {station_id} could not be written: {message}")]
    OutputWrite { station_id: String, message: String },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid station record: {0}")]
    InvalidStation(String),

    #[error("invalid observation table: {0}")]
    InvalidTable(String),

    #[error("worker pool could not be started: {0}")]
    WorkerPool(String),
}

impl ReconcileError {
    pub fn unknown_station(station_id: &str, reason: impl Into<String>) -> Self {
        ReconcileError::UnknownStation {
            station_id: station_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn output_write(station_id: &str, message: impl std::fmt::Display) -> Self {
        ReconcileError::OutputWrite {
            station_id: station_id.to_string(),
            message: message.to_string(),
        }
    }

    /// The station a per-station error is scoped to, if any.
    pub fn station_id(&self) -> Option<&str> {
        match self {
            ReconcileError::UnknownStation { station_id, .. }
            | ReconcileError::OutputWrite { station_id, .. } => Some(station_id),
            ReconcileError::IrreconcilableGap(gap) => Some(&gap.station_id),
            _ => None,
        }
    }
}

/// Errors raised while loading stations, observations or written output
/// units from disk.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("station file is not valid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Table(#[from] ReconcileError),
}

impl IngestError {
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        IngestError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        IngestError::Parse {
            line,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_range_rejects_reversed_bounds() {
        assert!(DateRange::new(date(2020, 1, 2), date(2020, 1, 1)).is_none());
        assert!(DateRange::new(date(2020, 1, 1), date(2020, 1, 1)).is_some());
    }

    #[test]
    fn test_date_range_days_are_inclusive_and_contiguous() {
        let range = DateRange::new(date(2020, 2, 27), date(2020, 3, 1)).unwrap();
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![date(2020, 2, 27), date(2020, 2, 28), date(2020, 2, 29), date(2020, 3, 1)],
            "leap day must be included"
        );
        assert_eq!(range.len_days(), 4);
    }

    #[test]
    fn test_gaps_order_by_station_then_date_then_variable() {
        let mut gaps = vec![
            Gap { station_id: "B".into(), date: date(2020, 1, 1), variable: "tmax".into() },
            Gap { station_id: "A".into(), date: date(2020, 1, 2), variable: "prec".into() },
            Gap { station_id: "A".into(), date: date(2020, 1, 1), variable: "tmin".into() },
            Gap { station_id: "A".into(), date: date(2020, 1, 1), variable: "prec".into() },
        ];
        gaps.sort();
        let keys: Vec<_> = gaps.iter().map(|g| g.to_string()).collect();
        assert_eq!(
            keys,
            vec![
                "A 2020-01-01 prec",
                "A 2020-01-01 tmin",
                "A 2020-01-02 prec",
                "B 2020-01-01 tmax",
            ]
        );
    }

    #[test]
    fn test_station_scoped_errors_expose_station_id() {
        let err = ReconcileError::unknown_station("KPIA", "no coverage");
        assert_eq!(err.station_id(), Some("KPIA"));
        assert_eq!(err.to_string(), "unknown station KPIA: no coverage");

        let err = ReconcileError::InvalidConfiguration("empty key station set".into());
        assert_eq!(err.station_id(), None);
    }
}
