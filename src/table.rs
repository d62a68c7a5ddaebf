//! In-memory observation table.
//!
//! One row per (station, date), one column per tracked variable. Every
//! station's rows cover a contiguous daily window: the builder materializes
//! explicit missing cells for any date absent between a station's first and
//! last observation, so a missing value is never confused with no entry.
//!
//! The table also owns the station registry it was built against, so the
//! reconciliation core receives everything it reads as one explicit value.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::logging::{self, Stage};
use crate::model::{DateRange, ReconcileError};
use crate::stations::StationRegistry;

/// Raw rows of one station over its coverage window.
#[derive(Debug, Clone, PartialEq)]
struct StationRows {
    start: NaiveDate,
    /// Indexed by day offset from `start`, then by variable index.
    values: Vec<Vec<Option<f64>>>,
}

impl StationRows {
    fn coverage(&self) -> DateRange {
        let end = self.start + chrono::Days::new(self.values.len() as u64 - 1);
        DateRange { start: self.start, end }
    }

    fn offset(&self, date: NaiveDate) -> Option<usize> {
        let days = (date - self.start).num_days();
        (days >= 0 && (days as usize) < self.values.len()).then_some(days as usize)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    registry: StationRegistry,
    variables: Vec<String>,
    rows: BTreeMap<String, StationRows>,
}

impl ObservationTable {
    pub fn builder(registry: StationRegistry, variables: Vec<String>) -> TableBuilder {
        TableBuilder {
            registry,
            variables,
            rows: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.registry
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn variable_index(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v == name)
    }

    /// Stations with at least one row, in identifier order.
    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn has_coverage(&self, station_id: &str) -> bool {
        self.rows.contains_key(station_id)
    }

    /// First and last date of a station's rows, or `None` without coverage.
    pub fn coverage(&self, station_id: &str) -> Option<DateRange> {
        self.rows.get(station_id).map(StationRows::coverage)
    }

    /// The raw value of one cell. `None` when the value is missing or the
    /// date lies outside the station's coverage window.
    pub fn value(&self, station_id: &str, date: NaiveDate, variable: usize) -> Option<f64> {
        let rows = self.rows.get(station_id)?;
        let offset = rows.offset(date)?;
        rows.values[offset].get(variable).copied().flatten()
    }

    /// Date-ordered rows of a station, or `None` without coverage.
    pub fn rows(
        &self,
        station_id: &str,
    ) -> Option<impl Iterator<Item = (NaiveDate, &[Option<f64>])>> {
        let rows = self.rows.get(station_id)?;
        Some(
            rows.coverage()
                .days()
                .zip(rows.values.iter().map(Vec::as_slice)),
        )
    }

    /// Number of missing cells across all stations.
    pub fn missing_cells(&self) -> usize {
        self.rows
            .values()
            .flat_map(|r| r.values.iter())
            .flat_map(|row| row.iter())
            .filter(|v| v.is_none())
            .count()
    }
}

/// Accumulates observations before the contiguous-window invariant is
/// enforced by `build`.
#[derive(Debug)]
pub struct TableBuilder {
    registry: StationRegistry,
    variables: Vec<String>,
    rows: BTreeMap<String, BTreeMap<NaiveDate, Vec<Option<f64>>>>,
}

impl TableBuilder {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Adds a full row for one (station, date). A row may be pushed once.
    ///
    /// Non-finite values are stored as missing.
    pub fn push_row(
        &mut self,
        station_id: &str,
        date: NaiveDate,
        values: Vec<Option<f64>>,
    ) -> Result<(), ReconcileError> {
        if values.len() != self.variables.len() {
            return Err(ReconcileError::InvalidTable(format!(
                "row for {} on {} has {} values, expected {}",
                station_id,
                date,
                values.len(),
                self.variables.len()
            )));
        }
        let station_rows = self.rows.entry(station_id.to_string()).or_default();
        if station_rows.contains_key(&date) {
            return Err(ReconcileError::InvalidTable(format!(
                "duplicate row for {} on {}",
                station_id, date
            )));
        }
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        station_rows.insert(date, values);
        Ok(())
    }

    /// Sets a single cell, creating the row with every other variable
    /// missing if it does not exist yet.
    pub fn set(
        &mut self,
        station_id: &str,
        date: NaiveDate,
        variable: &str,
        value: Option<f64>,
    ) -> Result<(), ReconcileError> {
        let index = self
            .variables
            .iter()
            .position(|v| v == variable)
            .ok_or_else(|| {
                ReconcileError::InvalidTable(format!("unknown variable '{}'", variable))
            })?;
        let width = self.variables.len();
        let row = self
            .rows
            .entry(station_id.to_string())
            .or_default()
            .entry(date)
            .or_insert_with(|| vec![None; width]);
        row[index] = value.filter(|x| x.is_finite());
        Ok(())
    }

    /// Validates variable names and fills every station's coverage window
    /// with explicit missing rows where dates were absent.
    pub fn build(self) -> Result<ObservationTable, ReconcileError> {
        validate_variables(&self.variables)?;
        let width = self.variables.len();

        let mut rows = BTreeMap::new();
        for (station_id, dated) in self.rows {
            let (Some(&start), Some(&end)) = (dated.keys().next(), dated.keys().next_back())
            else {
                continue;
            };
            if !self.registry.contains(&station_id) {
                logging::debug(
                    Stage::Ingest,
                    Some(&station_id),
                    "observations for a station outside the registry; it cannot donate",
                );
            }
            let window = DateRange { start, end };
            let mut values = Vec::with_capacity(window.len_days());
            let mut filled_dates = 0usize;
            let mut dated = dated;
            for day in window.days() {
                match dated.remove(&day) {
                    Some(row) => values.push(row),
                    None => {
                        filled_dates += 1;
                        values.push(vec![None; width]);
                    }
                }
            }
            if filled_dates > 0 {
                logging::debug(
                    Stage::Ingest,
                    Some(&station_id),
                    &format!("{} absent dates inside coverage window marked missing", filled_dates),
                );
            }
            rows.insert(station_id, StationRows { start, values });
        }

        Ok(ObservationTable {
            registry: self.registry,
            variables: self.variables,
            rows,
        })
    }
}

/// Variable names become output column headers, so they must be non-empty,
/// unique, distinct from the date column, and free of control characters.
fn validate_variables(variables: &[String]) -> Result<(), ReconcileError> {
    if variables.is_empty() {
        return Err(ReconcileError::InvalidTable(
            "at least one variable must be tracked".to_string(),
        ));
    }
    for (i, name) in variables.iter().enumerate() {
        if name.is_empty() || name == "date" {
            return Err(ReconcileError::InvalidTable(format!(
                "invalid variable name '{}'",
                name
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(ReconcileError::InvalidTable(format!(
                "variable name '{}' contains a control character",
                name
            )));
        }
        if variables[..i].contains(name) {
            return Err(ReconcileError::InvalidTable(format!(
                "duplicate variable '{}'",
                name
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
