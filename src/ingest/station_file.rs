//! Station metadata from a TOML file.
//!
//! ```toml
//! [[stations]]
//! id = "USC00116610"
//! name = "PEORIA GTR PEORIA AP"
//! latitude = 40.6675
//! longitude = -89.6839
//! elevation = 198.7
//! ```

use std::fs;
use std::path::PathBuf;

use serde::Deserialize;

use crate::ingest::StationProvider;
use crate::logging::{self, Stage};
use crate::model::{IngestError, Station};
use crate::stations::StationRegistry;

#[derive(Debug, Deserialize)]
struct StationFile {
    #[serde(default)]
    stations: Vec<Station>,
}

/// Restricts the loaded stations to a great-circle radius around a point.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SearchArea {
    pub latitude: f64,
    pub longitude: f64,
    pub radius_km: f64,
}

#[derive(Debug, Clone)]
pub struct TomlStationProvider {
    path: PathBuf,
    area: Option<SearchArea>,
}

impl TomlStationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TomlStationProvider {
            path: path.into(),
            area: None,
        }
    }

    pub fn within(mut self, area: SearchArea) -> Self {
        self.area = Some(area);
        self
    }
}

/// Parses station TOML text into a registry. Duplicate identifiers and
/// invalid coordinates are rejected.
pub fn parse_stations(text: &str) -> Result<StationRegistry, IngestError> {
    let file: StationFile = toml::from_str(text)?;
    Ok(StationRegistry::from_stations(file.stations)?)
}

impl StationProvider for TomlStationProvider {
    fn stations(&self) -> Result<StationRegistry, IngestError> {
        let text = fs::read_to_string(&self.path).map_err(|e| IngestError::io(&self.path, e))?;
        let registry = parse_stations(&text)?;

        let registry = match self.area {
            None => registry,
            Some(area) => {
                let kept = registry
                    .within_radius(area.latitude, area.longitude, area.radius_km)
                    .into_iter()
                    .cloned();
                StationRegistry::from_stations(kept)?
            }
        };

        logging::info(
            Stage::Ingest,
            None,
            &format!("Loaded {} stations from {}", registry.len(), self.path.display()),
        );
        Ok(registry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
