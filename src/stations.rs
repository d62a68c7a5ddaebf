//! Station registry for a reconciliation run.
//!
//! Holds the canonical, deduplicated set of stations supplied by the station
//! metadata provider, keyed by identifier. This is the single source of truth
//! for station coordinates: donor ranking and output metadata both read from
//! here rather than from the observation rows.

use std::collections::BTreeMap;

use crate::analysis::distance::{DistanceMetric, GreatCircle};
use crate::model::{ReconcileError, Station};

/// Ordered map of station identifier to station metadata.
///
/// Iteration is always in ascending identifier order, which keeps donor
/// tie-breaking and output ordering reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationRegistry {
    stations: BTreeMap<String, Station>,
}

impl StationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry, rejecting duplicate identifiers and invalid records.
    pub fn from_stations(
        stations: impl IntoIterator<Item = Station>,
    ) -> Result<Self, ReconcileError> {
        let mut registry = Self::new();
        for station in stations {
            registry.insert(station)?;
        }
        Ok(registry)
    }

    /// Adds a station. Fails if the identifier is already registered or the
    /// record does not pass `validate_station`.
    pub fn insert(&mut self, station: Station) -> Result<(), ReconcileError> {
        validate_station(&station)?;
        if self.stations.contains_key(&station.id) {
            return Err(ReconcileError::InvalidStation(format!(
                "duplicate station identifier '{}'",
                station.id
            )));
        }
        self.stations.insert(station.id.clone(), station);
        Ok(())
    }

    /// Looks up a station by identifier. Returns `None` if not found.
    pub fn find_station(&self, id: &str) -> Option<&Station> {
        self.stations.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.stations.keys().map(String::as_str)
    }

    /// Stations within `radius_km` (great-circle) of the given point, in
    /// identifier order.
    pub fn within_radius(&self, latitude: f64, longitude: f64, radius_km: f64) -> Vec<&Station> {
        let centre = Station {
            id: String::new(),
            name: String::new(),
            latitude,
            longitude,
            elevation: 0.0,
        };
        self.stations
            .values()
            .filter(|s| GreatCircle.distance(&centre, s) <= radius_km)
            .collect()
    }
}

/// Checks the invariants every registered station must satisfy.
///
/// Identifiers appear as CSV fields and inside output file names, so they
/// may not be empty or contain commas, whitespace or control characters.
pub fn validate_station(station: &Station) -> Result<(), ReconcileError> {
    let invalid = |reason: String| Err(ReconcileError::InvalidStation(reason));

    if station.id.is_empty() {
        return invalid("station identifier must not be empty".to_string());
    }
    if station
        .id
        .chars()
        .any(|c| c == ',' || c.is_whitespace() || c.is_control())
    {
        return invalid(format!(
            "station identifier '{}' contains a comma, whitespace or control character",
            station.id
        ));
    }
    if station.name.chars().any(char::is_control) {
        return invalid(format!(
            "name of station '{}' contains a control character",
            station.id
        ));
    }
    if !(-90.0..=90.0).contains(&station.latitude) {
        return invalid(format!(
            "latitude {} of station '{}' is outside [-90, 90]",
            station.latitude, station.id
        ));
    }
    if !(-180.0..=180.0).contains(&station.longitude) {
        return invalid(format!(
            "longitude {} of station '{}' is outside [-180, 180]",
            station.longitude, station.id
        ));
    }
    if !station.elevation.is_finite() {
        return invalid(format!("elevation of station '{}' is not finite", station.id));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn station(id: &str, latitude: f64, longitude: f64) -> Station {
        Station {
            id: id.to_string(),
            name: format!("Station {}", id),
            latitude,
            longitude,
            elevation: 200.0,
        }
    }

    #[test]
    fn test_no_duplicate_station_ids() {
        let result = StationRegistry::from_stations(vec![
            station("KPIA", 40.66, -89.69),
            station("KPIA", 40.70, -89.60),
        ]);
        assert!(
            matches!(result, Err(ReconcileError::InvalidStation(ref msg)) if msg.contains("duplicate")),
            "duplicate identifiers must be rejected, got {:?}",
            result
        );
    }

    #[test]
    fn test_find_station_returns_correct_entry() {
        let registry = StationRegistry::from_stations(vec![
            station("KPIA", 40.66, -89.69),
            station("KBMI", 40.48, -88.92),
        ])
        .unwrap();
        let found = registry.find_station("KBMI").expect("KBMI should be registered");
        assert_eq!(found.latitude, 40.48);
        assert!(registry.find_station("KXXX").is_none());
    }

    #[test]
    fn test_iteration_is_in_identifier_order() {
        let registry = StationRegistry::from_stations(vec![
            station("C", 0.0, 0.0),
            station("A", 0.0, 0.0),
            station("B", 0.0, 0.0),
        ])
        .unwrap();
        let ids: Vec<_> = registry.ids().collect();
        assert_eq!(ids, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_coordinates_out_of_range_are_rejected() {
        assert!(validate_station(&station("A", 91.0, 0.0)).is_err());
        assert!(validate_station(&station("A", 0.0, -180.5)).is_err());
        assert!(validate_station(&station("A", f64::NAN, 0.0)).is_err());
        assert!(validate_station(&station("A", -90.0, 180.0)).is_ok());
    }

    #[test]
    fn test_identifiers_with_separators_are_rejected() {
        assert!(validate_station(&station("", 0.0, 0.0)).is_err());
        assert!(validate_station(&station("K,PIA", 0.0, 0.0)).is_err());
        assert!(validate_station(&station("K PIA", 0.0, 0.0)).is_err());
        assert!(validate_station(&station("USC00/116610", 0.0, 0.0)).is_ok());
    }

    #[test]
    fn test_within_radius_filters_by_great_circle_distance() {
        // Peoria and Bloomington are ~68 km apart; Chicago O'Hare ~220 km.
        let registry = StationRegistry::from_stations(vec![
            station("KPIA", 40.6642, -89.6931),
            station("KBMI", 40.4771, -88.9159),
            station("KORD", 41.9742, -87.9073),
        ])
        .unwrap();
        let near: Vec<_> = registry
            .within_radius(40.6642, -89.6931, 100.0)
            .into_iter()
            .map(|s| s.id.as_str())
            .collect();
        assert_eq!(near, vec!["KBMI", "KPIA"]);
    }
}
