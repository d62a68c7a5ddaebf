//! Text layout of a per-station output unit.
//!
//! ```text
//! # metfill station unit v1
//! # station_id: "USC00116610"
//! # name: "PEORIA GTR PEORIA AP"
//! # latitude: 40.6675
//! # longitude: -89.6839
//! # elevation: 198.7
//! # missing_marker: "NA"
//! date,prec,tmax,tmin
//! 1990-01-01,0,3.9,-6.1
//! 1990-01-02,NA,1.7,-8.3
//! ```
//!
//! String fields in the header are JSON-encoded so names with quotes or
//! non-ASCII characters survive a round trip. The table below it is CSV,
//! quoted where a field needs it. Values use Rust's shortest
//! round-trip float formatting, so re-reading a unit reproduces every value
//! bit for bit.

use std::io::{self, Write};

use chrono::NaiveDate;

use crate::model::{DATE_FORMAT, IngestError, Station};
use crate::reconcile::ReconciledStation;

const MAGIC: &str = "# metfill station unit v1";
/// The magic line plus the six metadata lines.
const HEADER_LINES: usize = 7;

/// Output file name for a station: prefix, escaped identifier, extension.
///
/// Bytes outside `[A-Za-z0-9_-]` are written as `%XX`, which makes the
/// mapping injective: distinct identifiers never share a file name, and no
/// identifier can introduce a path separator.
pub fn unit_file_name(prefix: &str, station_id: &str, extension: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + station_id.len() + extension.len() + 1);
    name.push_str(prefix);
    for byte in station_id.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            name.push(byte as char);
        } else {
            name.push_str(&format!("%{:02X}", byte));
        }
    }
    if !extension.is_empty() {
        name.push('.');
        name.push_str(extension);
    }
    name
}

fn json_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}

fn format_value(value: Option<f64>, missing_marker: &str) -> String {
    match value {
        Some(v) => format!("{}", v),
        None => missing_marker.to_string(),
    }
}

/// Writes the metadata block and the date-ordered table.
pub fn render_unit<W: Write>(
    out: &mut W,
    station: &Station,
    series: &ReconciledStation,
    missing_marker: &str,
) -> io::Result<()> {
    writeln!(out, "{}", MAGIC)?;
    writeln!(out, "# station_id: {}", json_string(&station.id))?;
    writeln!(out, "# name: {}", json_string(&station.name))?;
    writeln!(out, "# latitude: {}", station.latitude)?;
    writeln!(out, "# longitude: {}", station.longitude)?;
    writeln!(out, "# elevation: {}", station.elevation)?;
    writeln!(out, "# missing_marker: {}", json_string(missing_marker))?;

    let mut table = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(&mut *out);
    table.write_record(std::iter::once("date").chain(series.variables.iter().map(String::as_str)))?;
    for row in &series.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.date.format(DATE_FORMAT).to_string());
        record.extend(row.values.iter().map(|v| format_value(*v, missing_marker)));
        table.write_record(&record)?;
    }
    table.flush()?;
    Ok(())
}

/// A parsed output unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitContents {
    pub station: Station,
    pub missing_marker: String,
    pub variables: Vec<String>,
    pub rows: Vec<(NaiveDate, Vec<Option<f64>>)>,
}

/// Parses text produced by `render_unit`.
pub fn parse_unit(text: &str) -> Result<UnitContents, IngestError> {
    // Magic line, six metadata lines, then the CSV table.
    let mut parts = text.splitn(HEADER_LINES + 1, '\n');
    let mut lines = (&mut parts)
        .take(HEADER_LINES)
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end_matches('\r')));

    match lines.next() {
        Some((_, MAGIC)) => {}
        _ => return Err(IngestError::parse(1, "not a station unit (missing header line)")),
    }

    let mut header = |key: &str| -> Result<(usize, String), IngestError> {
        let (n, line) = lines
            .next()
            .ok_or_else(|| IngestError::parse(0, format!("header ends before '{}'", key)))?;
        let prefix = format!("# {}: ", key);
        line.strip_prefix(&prefix)
            .map(|v| (n, v.to_string()))
            .ok_or_else(|| IngestError::parse(n, format!("expected '{}' header", key)))
    };
    let string_field = |(n, raw): (usize, String)| -> Result<String, IngestError> {
        serde_json::from_str(&raw).map_err(|e| IngestError::parse(n, e.to_string()))
    };
    let number_field = |(n, raw): (usize, String)| -> Result<f64, IngestError> {
        raw.parse()
            .map_err(|_| IngestError::parse(n, format!("'{}' is not a number", raw)))
    };

    let id = string_field(header("station_id")?)?;
    let name = string_field(header("name")?)?;
    let latitude = number_field(header("latitude")?)?;
    let longitude = number_field(header("longitude")?)?;
    let elevation = number_field(header("elevation")?)?;
    let missing_marker = string_field(header("missing_marker")?)?;

    let body = parts
        .next()
        .filter(|b| !b.is_empty())
        .ok_or_else(|| IngestError::parse(HEADER_LINES + 1, "missing column header"))?;
    let line_of = |pos: Option<&csv::Position>| HEADER_LINES + pos.map_or(0, |p| p.line() as usize);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());
    let columns = reader
        .headers()
        .map_err(|e| IngestError::parse(line_of(e.position()), e.to_string()))?
        .clone();
    if columns.get(0) != Some("date") {
        return Err(IngestError::parse(HEADER_LINES + 1, "first column must be 'date'"));
    }
    let variables: Vec<String> = columns.iter().skip(1).map(str::to_string).collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| IngestError::parse(line_of(e.position()), e.to_string()))?;
        let n = line_of(record.position());
        let date_field = record.get(0).unwrap_or_default();
        let date = NaiveDate::parse_from_str(date_field, DATE_FORMAT)
            .map_err(|e| IngestError::parse(n, format!("bad date '{}': {}", date_field, e)))?;
        let values = record
            .iter()
            .skip(1)
            .map(|f| {
                if f == missing_marker {
                    Ok(None)
                } else {
                    f.parse::<f64>()
                        .map(Some)
                        .map_err(|_| IngestError::parse(n, format!("bad value '{}'", f)))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if values.len() != variables.len() {
            return Err(IngestError::parse(
                n,
                format!("expected {} values, found {}", variables.len(), values.len()),
            ));
        }
        rows.push((date, values));
    }

    Ok(UnitContents {
        station: Station {
            id,
            name,
            latitude,
            longitude,
            elevation,
        },
        missing_marker,
        variables,
        rows,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
