//! Daily observations from a CSV file.
//!
//! The first column holds the station identifier, the second the ISO date,
//! and every further column one variable:
//!
//! ```text
//! station,date,prec,tmax,tmin
//! KPIA,1990-01-01,0.0,3.9,-6.1
//! KPIA,1990-01-02,null,1.7,-8.3
//! ```
//!
//! Blank lines and lines starting with `#` are skipped, and fields may be
//! quoted. Cells matching one of the missing tokens are stored as missing;
//! any other cell that is not a finite number is an error, since silently
//! dropping it would turn bad data into a gap.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::ingest::ObservationProvider;
use crate::logging::{self, Stage};
use crate::model::{DATE_FORMAT, DateRange, IngestError};
use crate::stations::StationRegistry;
use crate::table::ObservationTable;

/// Cell values read as missing unless configured otherwise.
pub const DEFAULT_MISSING_TOKENS: &[&str] = &["", "NA", "null", "NaN", "nan"];

#[derive(Debug, Clone)]
pub struct CsvObservationProvider {
    path: PathBuf,
    missing_tokens: Vec<String>,
}

impl CsvObservationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvObservationProvider {
            path: path.into(),
            missing_tokens: DEFAULT_MISSING_TOKENS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Adds sentinel values (e.g. `-9999`) to the missing tokens.
    pub fn with_missing_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.missing_tokens.extend(tokens);
        self
    }
}

impl ObservationProvider for CsvObservationProvider {
    fn observations(
        &self,
        registry: &StationRegistry,
        station_ids: &[String],
        range: Option<DateRange>,
    ) -> Result<ObservationTable, IngestError> {
        let text = fs::read_to_string(&self.path).map_err(|e| IngestError::io(&self.path, e))?;
        let table = parse_observation_csv(
            &text,
            registry.clone(),
            station_ids,
            range,
            &self.missing_tokens,
        )?;
        logging::info(
            Stage::Ingest,
            None,
            &format!(
                "Loaded observations for {} stations ({} missing cells) from {}",
                table.station_ids().count(),
                table.missing_cells(),
                self.path.display()
            ),
        );
        Ok(table)
    }
}

/// Parses observation CSV text into a table.
///
/// Rows for stations outside `station_ids` (when non-empty) or dates outside
/// `range` are skipped.
pub fn parse_observation_csv(
    text: &str,
    registry: StationRegistry,
    station_ids: &[String],
    range: Option<DateRange>,
    missing_tokens: &[String],
) -> Result<ObservationTable, IngestError> {
    let wanted: BTreeSet<&str> = station_ids.iter().map(String::as_str).collect();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(text.as_bytes());

    let columns = reader.headers().map_err(csv_error)?.clone();
    if columns.len() < 3 || columns.iter().all(str::is_empty) {
        return Err(IngestError::parse(
            1,
            "header needs a station column, a date column and at least one variable",
        ));
    }
    let variables: Vec<String> = columns.iter().skip(2).map(str::to_string).collect();

    let parse_field = |line: u64, s: &str| -> Result<Option<f64>, IngestError> {
        if missing_tokens.iter().any(|t| t == s) {
            return Ok(None);
        }
        match s.parse::<f64>() {
            Ok(v) if v.is_finite() => Ok(Some(v)),
            Ok(_) => Err(IngestError::parse(
                line as usize,
                format!("'{}' is not a finite number; list it as a missing token if it marks a gap", s),
            )),
            Err(_) => Err(IngestError::parse(
                line as usize,
                format!("'{}' is neither a number nor a missing token", s),
            )),
        }
    };

    let mut builder = ObservationTable::builder(registry, variables);
    let mut skipped = 0usize;

    for result in reader.records() {
        let record = result.map_err(csv_error)?;
        let n = record.position().map_or(0, |p| p.line());
        if record.len() == 1 && record[0].is_empty() {
            continue;
        }
        if record.len() != columns.len() {
            return Err(IngestError::parse(
                n as usize,
                format!("expected {} fields, found {}", columns.len(), record.len()),
            ));
        }

        let station_id = &record[0];
        if !wanted.is_empty() && !wanted.contains(station_id) {
            skipped += 1;
            continue;
        }

        let date = NaiveDate::parse_from_str(&record[1], DATE_FORMAT).map_err(|e| {
            IngestError::parse(n as usize, format!("bad date '{}': {}", &record[1], e))
        })?;
        if range.is_some_and(|r| !r.contains(date)) {
            skipped += 1;
            continue;
        }

        let values = record
            .iter()
            .skip(2)
            .map(|f| parse_field(n, f))
            .collect::<Result<Vec<_>, _>>()?;
        builder
            .push_row(station_id, date, values)
            .map_err(|e| IngestError::parse(n as usize, e.to_string()))?;
    }

    if skipped > 0 {
        logging::debug(
            Stage::Ingest,
            None,
            &format!("{} rows outside the requested stations or date range skipped", skipped),
        );
    }

    Ok(builder.build()?)
}

fn csv_error(err: csv::Error) -> IngestError {
    let line = err.position().map_or(0, |p| p.line() as usize);
    IngestError::parse(line, err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
