//! Gap detection for key stations.
//!
//! Detection is per variable: a missing precipitation value says nothing
//! about temperature on the same day. Only the key stations are scanned.

use chrono::NaiveDate;

use crate::model::{Gap, ReconcileError};
use crate::table::ObservationTable;

/// Missing cells of one key station, grouped by variable.
#[derive(Debug, Clone, PartialEq)]
pub struct StationGaps {
    pub station_id: String,
    /// One entry per tracked variable, in table column order. Each date list
    /// is ascending.
    pub by_variable: Vec<(String, Vec<NaiveDate>)>,
}

impl StationGaps {
    pub fn total(&self) -> usize {
        self.by_variable.iter().map(|(_, dates)| dates.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// Every gap as a `Gap`, ordered by date and then by column order.
    pub fn gaps(&self) -> Vec<Gap> {
        let mut indexed: Vec<(NaiveDate, usize)> = self
            .by_variable
            .iter()
            .enumerate()
            .flat_map(|(i, (_, dates))| dates.iter().map(move |d| (*d, i)))
            .collect();
        indexed.sort_unstable();
        indexed
            .into_iter()
            .map(|(date, i)| Gap {
                station_id: self.station_id.clone(),
                date,
                variable: self.by_variable[i].0.clone(),
            })
            .collect()
    }
}

/// Scans one key station's coverage window for missing values.
///
/// A station with no rows in the table is an `UnknownStation` error rather
/// than an empty gap set: without coverage there is nothing to reconcile and
/// nothing to write.
pub fn detect_station_gaps(
    table: &ObservationTable,
    station_id: &str,
) -> Result<StationGaps, ReconcileError> {
    let rows = table.rows(station_id).ok_or_else(|| {
        ReconcileError::unknown_station(station_id, "no coverage in the observation table")
    })?;

    let mut by_variable: Vec<(String, Vec<NaiveDate>)> = table
        .variables()
        .iter()
        .map(|v| (v.clone(), Vec::new()))
        .collect();

    for (date, values) in rows {
        for (i, value) in values.iter().enumerate() {
            if value.is_none() {
                by_variable[i].1.push(date);
            }
        }
    }

    Ok(StationGaps {
        station_id: station_id.to_string(),
        by_variable,
    })
}

/// Runs `detect_station_gaps` for each key station, keeping per-station
/// failures separate so one unknown station does not hide the others.
pub fn detect_gaps(
    table: &ObservationTable,
    key_station_ids: &[String],
) -> Vec<(String, Result<StationGaps, ReconcileError>)> {
    key_station_ids
        .iter()
        .map(|id| (id.clone(), detect_station_gaps(table, id)))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Station;
    use crate::stations::StationRegistry;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2019, 3, d).unwrap()
    }

    fn table() -> ObservationTable {
        let registry = StationRegistry::from_stations(vec![Station {
            id: "K1".into(),
            name: "Key one".into(),
            latitude: 10.0,
            longitude: 10.0,
            elevation: 5.0,
        }])
        .unwrap();
        let mut builder =
            ObservationTable::builder(registry, vec!["prec".into(), "tmin".into()]);
        builder.push_row("K1", date(1), vec![Some(0.0), Some(2.0)]).unwrap();
        builder.push_row("K1", date(2), vec![None, Some(1.0)]).unwrap();
        builder.push_row("K1", date(3), vec![Some(4.2), None]).unwrap();
        builder.push_row("K1", date(4), vec![None, None]).unwrap();
        builder.build().unwrap()
    }

    #[test]
    fn test_detection_is_per_variable() {
        let gaps = detect_station_gaps(&table(), "K1").unwrap();
        assert_eq!(gaps.by_variable[0], ("prec".to_string(), vec![date(2), date(4)]));
        assert_eq!(gaps.by_variable[1], ("tmin".to_string(), vec![date(3), date(4)]));
        assert_eq!(gaps.total(), 4);
    }

    #[test]
    fn test_flattened_gaps_are_ordered_by_date_then_column() {
        let gaps = detect_station_gaps(&table(), "K1").unwrap().gaps();
        let keys: Vec<_> = gaps.iter().map(|g| (g.date, g.variable.as_str())).collect();
        assert_eq!(
            keys,
            vec![(date(2), "prec"), (date(3), "tmin"), (date(4), "prec"), (date(4), "tmin")]
        );
    }

    #[test]
    fn test_station_without_coverage_is_unknown() {
        let result = detect_station_gaps(&table(), "K9");
        assert!(
            matches!(result, Err(ReconcileError::UnknownStation { ref station_id, .. }) if station_id == "K9"),
            "expected UnknownStation, got {:?}",
            result
        );
    }

    #[test]
    fn test_detect_gaps_isolates_unknown_stations() {
        let results = detect_gaps(&table(), &["K9".to_string(), "K1".to_string()]);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].1.as_ref().unwrap().total(), 4);
    }
}
