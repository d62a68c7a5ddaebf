//! Reconciliation report.
//!
//! Accumulates, per run, how many gaps were found and filled, which gaps
//! could not be reconciled, and which stations failed outright. The report
//! is a warning object, not an error: a run with irreconcilable gaps still
//! completes, and the caller decides whether the outcome is acceptable.
//!
//! Workers build one `StationReport` each; the coordinator merges them with
//! `ReconciliationReport::merge`, which is the only mutation point.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{Gap, ReconcileError};

// ============================================================================
// Per-station results
// ============================================================================

/// Outcome of reconciling one key station.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StationReport {
    pub station_id: String,
    pub gaps: usize,
    pub filled: usize,
    pub irreconcilable: Vec<Gap>,
}

impl StationReport {
    pub fn new(station_id: &str) -> Self {
        StationReport {
            station_id: station_id.to_string(),
            ..Default::default()
        }
    }

    pub fn record_filled(&mut self) {
        self.gaps += 1;
        self.filled += 1;
    }

    pub fn record_irreconcilable(&mut self, gap: Gap) {
        self.gaps += 1;
        self.irreconcilable.push(gap);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownStation,
    OutputWrite,
    Other,
}

/// A station excluded from output, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationFailure {
    pub station_id: String,
    pub kind: FailureKind,
    pub message: String,
}

impl StationFailure {
    pub fn from_error(station_id: &str, err: &ReconcileError) -> Self {
        let kind = match err {
            ReconcileError::UnknownStation { .. } => FailureKind::UnknownStation,
            ReconcileError::OutputWrite { .. } => FailureKind::OutputWrite,
            _ => FailureKind::Other,
        };
        StationFailure {
            station_id: station_id.to_string(),
            kind,
            message: err.to_string(),
        }
    }
}

/// What happened to a key station, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StationOutcome {
    /// Every gap was filled (or there were none).
    Complete,
    /// Reconciled, but at least one gap remains missing.
    Incomplete,
    /// Excluded from output.
    Failed,
}

// ============================================================================
// Run report
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub total_gaps: usize,
    pub filled: usize,
    /// Every irreconcilable gap exactly once, ordered by station, date and
    /// variable.
    pub irreconcilable: Vec<Gap>,
    pub station_failures: Vec<StationFailure>,
    /// Per-station counts for stations that reconciled, in identifier order.
    pub stations: Vec<StationReport>,
}

impl ReconciliationReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds a worker's per-station result into the run totals.
    pub fn merge(&mut self, partial: StationReport) {
        self.total_gaps += partial.gaps;
        self.filled += partial.filled;
        self.irreconcilable.extend(partial.irreconcilable.iter().cloned());
        self.stations.push(partial);
    }

    pub fn record_failure(&mut self, station_id: &str, err: &ReconcileError) {
        self.station_failures
            .push(StationFailure::from_error(station_id, err));
    }

    /// Adds failures produced after reconciliation, e.g. by the writer.
    pub fn absorb_failures(&mut self, failures: &[StationFailure]) {
        self.station_failures.extend(failures.iter().cloned());
        self.finalize();
    }

    /// Puts every list into its canonical order. Merging order then has no
    /// effect on the finished report.
    pub fn finalize(&mut self) {
        self.irreconcilable.sort();
        self.irreconcilable.dedup();
        self.stations.sort_by(|a, b| a.station_id.cmp(&b.station_id));
        self.station_failures
            .sort_by(|a, b| (&a.station_id, a.kind as u8).cmp(&(&b.station_id, b.kind as u8)));
    }

    pub fn unfilled(&self) -> usize {
        self.irreconcilable.len()
    }

    /// No irreconcilable gaps and no failed stations.
    pub fn is_clean(&self) -> bool {
        self.irreconcilable.is_empty() && self.station_failures.is_empty()
    }

    pub fn outcome_for(&self, station_id: &str) -> Option<StationOutcome> {
        if self.station_failures.iter().any(|f| f.station_id == station_id) {
            return Some(StationOutcome::Failed);
        }
        self.stations
            .iter()
            .find(|s| s.station_id == station_id)
            .map(|s| {
                if s.irreconcilable.is_empty() {
                    StationOutcome::Complete
                } else {
                    StationOutcome::Incomplete
                }
            })
    }

    /// Irreconcilable-gap counts per variable.
    pub fn unfilled_by_variable(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for gap in &self.irreconcilable {
            *counts.entry(gap.variable.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// The irreconcilable gaps as warning values.
    pub fn warnings(&self) -> Vec<ReconcileError> {
        self.irreconcilable
            .iter()
            .cloned()
            .map(ReconcileError::IrreconcilableGap)
            .collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Reconciliation summary")?;
        writeln!(
            f,
            "  Gaps:            {} found, {} filled, {} irreconcilable",
            self.total_gaps,
            self.filled,
            self.unfilled()
        )?;
        writeln!(
            f,
            "  Stations:        {} reconciled, {} failed",
            self.stations.len(),
            self.station_failures.len()
        )?;
        for (variable, count) in self.unfilled_by_variable() {
            writeln!(f, "  Unfilled {:<8} {}", variable, count)?;
        }
        for failure in &self.station_failures {
            writeln!(f, "  ✗ {}: {}", failure.station_id, failure.message)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn gap(station: &str, day: u32, variable: &str) -> Gap {
        Gap {
            station_id: station.into(),
            date: NaiveDate::from_ymd_opt(2020, 7, day).unwrap(),
            variable: variable.into(),
        }
    }

    #[test]
    fn test_merge_accumulates_counts() {
        let mut a = StationReport::new("A");
        a.record_filled();
        a.record_filled();
        a.record_irreconcilable(gap("A", 3, "prec"));
        let mut b = StationReport::new("B");
        b.record_irreconcilable(gap("B", 1, "tmax"));

        let mut report = ReconciliationReport::new();
        report.merge(b);
        report.merge(a);
        report.finalize();

        assert_eq!(report.total_gaps, 4);
        assert_eq!(report.filled, 2);
        assert_eq!(report.unfilled(), 2);
        assert_eq!(report.irreconcilable[0].station_id, "A", "sorted after finalize");
        assert_eq!(report.stations[0].station_id, "A");
        assert!(!report.is_clean());
    }

    #[test]
    fn test_outcomes_distinguish_complete_incomplete_failed() {
        let mut report = ReconciliationReport::new();
        let mut complete = StationReport::new("A");
        complete.record_filled();
        let mut incomplete = StationReport::new("B");
        incomplete.record_irreconcilable(gap("B", 2, "prec"));
        report.merge(complete);
        report.merge(incomplete);
        report.record_failure("C", &ReconcileError::unknown_station("C", "no coverage"));

        assert_eq!(report.outcome_for("A"), Some(StationOutcome::Complete));
        assert_eq!(report.outcome_for("B"), Some(StationOutcome::Incomplete));
        assert_eq!(report.outcome_for("C"), Some(StationOutcome::Failed));
        assert_eq!(report.outcome_for("Z"), None);
        assert_eq!(report.station_failures[0].kind, FailureKind::UnknownStation);
    }

    #[test]
    fn test_warnings_mirror_irreconcilable_gaps() {
        let mut partial = StationReport::new("A");
        partial.record_irreconcilable(gap("A", 9, "tmin"));
        let mut report = ReconciliationReport::new();
        report.merge(partial);

        let warnings = report.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(matches!(&warnings[0], ReconcileError::IrreconcilableGap(g) if g.variable == "tmin"));
    }

    #[test]
    fn test_unfilled_by_variable_counts() {
        let mut partial = StationReport::new("A");
        partial.record_irreconcilable(gap("A", 1, "prec"));
        partial.record_irreconcilable(gap("A", 2, "prec"));
        partial.record_irreconcilable(gap("A", 2, "tmax"));
        let mut report = ReconciliationReport::new();
        report.merge(partial);

        let counts = report.unfilled_by_variable();
        assert_eq!(counts.get("prec"), Some(&2));
        assert_eq!(counts.get("tmax"), Some(&1));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let mut partial = StationReport::new("A");
        partial.record_irreconcilable(gap("A", 1, "prec"));
        let mut report = ReconciliationReport::new();
        report.merge(partial);

        let json = report.to_json().unwrap();
        let back: ReconciliationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
        assert!(json.contains("\"2020-07-01\""), "dates serialize as ISO strings");
    }

    #[test]
    fn test_display_lists_failures() {
        let mut report = ReconciliationReport::new();
        report.record_failure("K9", &ReconcileError::output_write("K9", "disk full"));
        let text = report.to_string();
        assert!(text.contains("1 failed"));
        assert!(text.contains("K9"));
    }
}
