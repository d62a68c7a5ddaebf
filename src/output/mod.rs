//! Station writer: one self-describing file per reconciled key station.
//!
//! Every unit is written to a temporary file inside the target directory
//! and renamed into place only after it has been fully flushed and synced.
//! A unit that fails at any point is discarded when its temporary file is
//! dropped, so a partially written unit is never visible under its final
//! name. Failures are per station: the rest of the batch proceeds.
//!
//! Submodules:
//! - `format`: header and table layout, file naming, and the parser used
//!   to read units back.

pub mod format;

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::logging::{self, Stage};
use crate::model::{
    DEFAULT_FILE_EXTENSION, DEFAULT_FILE_PREFIX, DEFAULT_MISSING_MARKER, IngestError,
    ReconcileError,
};
use crate::reconcile::{ReconciledSeries, ReconciledStation};
use crate::report::StationFailure;
use crate::stations::StationRegistry;

pub use format::{UnitContents, parse_unit, unit_file_name};

/// File name of the batch manifest written next to the station units.
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq)]
pub struct WriterOptions {
    pub directory: PathBuf,
    pub prefix: String,
    pub extension: String,
    pub missing_marker: String,
    /// Concurrent writers. `None` uses the available parallelism.
    pub workers: Option<usize>,
    pub write_manifest: bool,
}

impl WriterOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        WriterOptions {
            directory: directory.into(),
            prefix: DEFAULT_FILE_PREFIX.to_string(),
            extension: DEFAULT_FILE_EXTENSION.to_string(),
            missing_marker: DEFAULT_MISSING_MARKER.to_string(),
            workers: None,
            write_manifest: true,
        }
    }

    /// Checks options that would make every unit unreadable.
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let invalid = |msg: String| Err(ReconcileError::InvalidConfiguration(msg));
        let marker = &self.missing_marker;
        if marker.is_empty() || marker.contains(',') || marker.chars().any(char::is_control) {
            return invalid(format!("missing marker '{}' is not a valid CSV field", marker));
        }
        if marker.parse::<f64>().is_ok() {
            return invalid(format!(
                "missing marker '{}' parses as a number and would be read back as a value",
                marker
            ));
        }
        if self
            .prefix
            .chars()
            .chain(self.extension.chars())
            .any(|c| std::path::is_separator(c) || c.is_control())
        {
            return invalid("file prefix and extension may not contain path separators".into());
        }
        if self.workers == Some(0) {
            return invalid("writer workers must be at least 1".into());
        }
        if self.unit_name_can_be_manifest() {
            return invalid(format!(
                "prefix '{}' and extension '{}' let a station file take the name {}",
                self.prefix, self.extension, MANIFEST_FILE
            ));
        }
        Ok(())
    }

    /// Whether some station identifier would map onto the manifest's file
    /// name, compared without regard to letter case.
    fn unit_name_can_be_manifest(&self) -> bool {
        let target = MANIFEST_FILE.to_ascii_lowercase();
        let prefix = self.prefix.to_ascii_lowercase();
        let suffix = match self.extension.as_str() {
            "" => String::new(),
            ext => format!(".{}", ext.to_ascii_lowercase()),
        };
        let Some(middle) = target
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_suffix(suffix.as_str()))
        else {
            return false;
        };
        // Escaped identifiers only ever contain these bytes.
        !middle.is_empty()
            && middle
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b == b'%')
    }

    pub fn unit_path(&self, station_id: &str) -> PathBuf {
        self.directory
            .join(unit_file_name(&self.prefix, station_id, &self.extension))
    }
}

/// Handle to a finalized station unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputUnit {
    pub station_id: String,
    pub path: PathBuf,
    pub rows: usize,
    /// Cells written with the missing marker (irreconcilable gaps).
    pub missing_cells: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteOutcome {
    /// Units in station identifier order.
    pub units: Vec<OutputUnit>,
    pub failures: Vec<StationFailure>,
    pub manifest: Option<PathBuf>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    generated_at: String,
    missing_marker: &'a str,
    units: Vec<ManifestEntry<'a>>,
}

#[derive(Serialize)]
struct ManifestEntry<'a> {
    station_id: &'a str,
    name: &'a str,
    latitude: f64,
    longitude: f64,
    elevation: f64,
    file: String,
    rows: usize,
    missing_cells: usize,
}

/// Writes one unit per reconciled station.
///
/// Returns `Err` only for invalid options. Every per-station problem
/// (unknown to the registry, unwritable target) becomes an `OutputWrite`
/// failure in the outcome while the other stations are still written.
pub fn write(
    series: &ReconciledSeries,
    registry: &StationRegistry,
    options: &WriterOptions,
) -> Result<WriteOutcome, ReconcileError> {
    options.validate()?;
    let workers = match options.workers {
        Some(n) => n,
        None => std::thread::available_parallelism().map_or(1, |n| n.get()),
    };

    let mut outcome = WriteOutcome::default();
    let stations: Vec<&ReconciledStation> = series.iter().collect();

    if let Err(e) = fs::create_dir_all(&options.directory) {
        let message = format!("cannot create {}: {}", options.directory.display(), e);
        for station in &stations {
            let err = ReconcileError::output_write(&station.station.id, &message);
            logging::log_station_failure(Stage::Write, &station.station.id, "write", &err);
            outcome
                .failures
                .push(StationFailure::from_error(&station.station.id, &err));
        }
        logging::log_write_summary(stations.len(), 0, stations.len());
        return Ok(outcome);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("writer-{}", i))
        .build()
        .map_err(|e| ReconcileError::WorkerPool(e.to_string()))?;

    let collisions = case_collisions(&stations, options);

    let results: Vec<(String, Result<OutputUnit, ReconcileError>)> = pool.install(|| {
        use rayon::prelude::*;
        stations
            .par_iter()
            .map(|s| {
                let station_id = s.station.id.as_str();
                let result = match collisions.get(station_id) {
                    Some(message) => Err(ReconcileError::output_write(station_id, message)),
                    None => write_station(s, registry, options),
                };
                (station_id.to_string(), result)
            })
            .collect()
    });

    for (station_id, result) in results {
        match result {
            Ok(unit) => {
                logging::debug(
                    Stage::Write,
                    Some(&station_id),
                    &format!("wrote {} rows to {}", unit.rows, unit.path.display()),
                );
                outcome.units.push(unit);
            }
            Err(err) => {
                logging::log_station_failure(Stage::Write, &station_id, "write", &err);
                outcome
                    .failures
                    .push(StationFailure::from_error(&station_id, &err));
            }
        }
    }

    if options.write_manifest && !outcome.units.is_empty() {
        match write_manifest(&outcome.units, registry, options) {
            Ok(path) => outcome.manifest = Some(path),
            Err(err) => {
                logging::log_station_failure(Stage::Write, MANIFEST_FILE, "manifest", &err);
                outcome
                    .failures
                    .push(StationFailure::from_error(MANIFEST_FILE, &err));
            }
        }
    }

    logging::log_write_summary(stations.len(), outcome.units.len(), outcome.failures.len());
    Ok(outcome)
}

/// Stations whose file names differ only in letter case. On a
/// case-insensitive filesystem they would overwrite each other, so none of
/// them is written.
fn case_collisions<'a>(
    stations: &[&'a ReconciledStation],
    options: &WriterOptions,
) -> BTreeMap<&'a str, String> {
    let mut by_folded_name: BTreeMap<String, Vec<&'a str>> = BTreeMap::new();
    for station in stations {
        let name = unit_file_name(&options.prefix, &station.station.id, &options.extension);
        by_folded_name
            .entry(name.to_lowercase())
            .or_default()
            .push(&station.station.id);
    }

    let mut collisions = BTreeMap::new();
    for (name, ids) in by_folded_name.into_iter().filter(|(_, ids)| ids.len() > 1) {
        for id in &ids {
            collisions.insert(
                *id,
                format!(
                    "file name {} is shared, ignoring letter case, by stations {}",
                    name,
                    ids.join(", ")
                ),
            );
        }
    }
    collisions
}

fn write_station(
    series: &ReconciledStation,
    registry: &StationRegistry,
    options: &WriterOptions,
) -> Result<OutputUnit, ReconcileError> {
    let station_id = series.station.id.as_str();
    let station = registry.find_station(station_id).ok_or_else(|| {
        ReconcileError::output_write(station_id, "station metadata not found in registry")
    })?;
    let path = options.unit_path(station_id);

    persist_atomically(&options.directory, &path, |out| {
        format::render_unit(out, station, series, &options.missing_marker)
    })
    .map_err(|e| ReconcileError::output_write(station_id, e))?;

    let missing_cells = series
        .rows
        .iter()
        .flat_map(|r| r.values.iter())
        .filter(|v| v.is_none())
        .count();
    Ok(OutputUnit {
        station_id: station_id.to_string(),
        path,
        rows: series.rows.len(),
        missing_cells,
    })
}

fn write_manifest(
    units: &[OutputUnit],
    registry: &StationRegistry,
    options: &WriterOptions,
) -> Result<PathBuf, ReconcileError> {
    let entries = units
        .iter()
        .filter_map(|unit| {
            let station = registry.find_station(&unit.station_id)?;
            Some(ManifestEntry {
                station_id: &station.id,
                name: &station.name,
                latitude: station.latitude,
                longitude: station.longitude,
                elevation: station.elevation,
                file: unit
                    .path
                    .file_name()
                    .map(|f| f.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                rows: unit.rows,
                missing_cells: unit.missing_cells,
            })
        })
        .collect();
    let manifest = Manifest {
        generated_at: Utc::now().to_rfc3339(),
        missing_marker: &options.missing_marker,
        units: entries,
    };

    let path = options.directory.join(MANIFEST_FILE);
    persist_atomically(&options.directory, &path, |out| {
        serde_json::to_writer_pretty(&mut *out, &manifest)?;
        writeln!(out)
    })
    .map_err(|e| ReconcileError::output_write(MANIFEST_FILE, e))?;
    Ok(path)
}

/// Writes through a temporary file in `dir` and renames it onto `target`.
///
/// The temporary file is removed on every early return, including a
/// failing `render`.
fn persist_atomically(
    dir: &Path,
    target: &Path,
    render: impl FnOnce(&mut BufWriter<&mut fs::File>) -> std::io::Result<()>,
) -> std::io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut out = BufWriter::new(tmp.as_file_mut());
        render(&mut out)?;
        out.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// Reads a unit written by `write` back from disk.
pub fn read_unit(path: &Path) -> Result<UnitContents, IngestError> {
    let text = fs::read_to_string(path).map_err(|e| IngestError::io(path, e))?;
    parse_unit(&text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
