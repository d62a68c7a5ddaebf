//! Input collaborators.
//!
//! The reconciliation core does not search for stations or download data.
//! It consumes a finite station set and an observation table through the
//! two provider traits below; file-backed implementations live in the
//! submodules.
//!
//! Submodules:
//! - `station_file`:     `[[stations]]` tables from a TOML file.
//! - `observation_csv`:  daily observations from a CSV file.

pub mod observation_csv;
pub mod station_file;

use crate::model::{DateRange, IngestError};
use crate::stations::StationRegistry;
use crate::table::ObservationTable;

pub use observation_csv::CsvObservationProvider;
pub use station_file::{SearchArea, TomlStationProvider};

/// Yields the deduplicated station set for a run.
pub trait StationProvider {
    fn stations(&self) -> Result<StationRegistry, IngestError>;
}

/// Yields the observation table for a station set and date range.
///
/// An empty `station_ids` slice means every station in the registry. Missing
/// values in the returned table are the normal case, not an error.
pub trait ObservationProvider {
    fn observations(
        &self,
        registry: &StationRegistry,
        station_ids: &[String],
        range: Option<DateRange>,
    ) -> Result<ObservationTable, IngestError>;
}
