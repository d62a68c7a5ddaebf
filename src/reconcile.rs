//! Reconciliation of key stations.
//!
//! `reconcile` is a pure transformation from an observation table and
//! options to a reconciled series plus its report. It performs no I/O apart
//! from logging; writing the result is a separate step (`output::write`).
//!
//! Key stations are independent: each draws donor values only from raw
//! observations, never from another key station's infilled cells. They are
//! therefore reconciled on a bounded rayon pool, one task per key station,
//! with results sent over a channel to the calling thread, which owns the
//! report and merges partial results in identifier order.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::num::NonZeroUsize;

use chrono::NaiveDate;
use crossbeam::channel;
use serde::Serialize;

use crate::analysis::distance::DistanceMetricKind;
use crate::analysis::donors::DonorSelector;
use crate::analysis::gaps::detect_station_gaps;
use crate::analysis::infill::{DecayFn, InfillEngine, InfillOutcome, Weighting};
use crate::logging::{self, Stage};
use crate::model::{CellSource, ReconcileError, Station};
use crate::report::{ReconciliationReport, StationReport};
use crate::table::ObservationTable;

// ============================================================================
// Options
// ============================================================================

/// Caller-facing reconciliation options.
///
/// Raw values are validated by `reconcile` before any work starts; an
/// invalid value fails the whole call with `InvalidConfiguration`.
#[derive(Clone)]
pub struct ReconcileOptions {
    /// Donors blended per gap. `None` uses every donor with a value.
    pub max_donors: Option<i64>,
    pub weighting: Weighting,
    pub distance_metric: DistanceMetricKind,
    /// Replaces `1/d` under inverse-distance weighting.
    pub decay: Option<DecayFn>,
    /// Whether key stations may donate their raw values to each other.
    pub key_station_donors: bool,
    /// Worker pool size. `None` uses the available parallelism.
    pub workers: Option<usize>,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            max_donors: None,
            weighting: Weighting::InverseDistance,
            distance_metric: DistanceMetricKind::GreatCircle,
            decay: None,
            key_station_donors: true,
            workers: None,
        }
    }
}

impl fmt::Debug for ReconcileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconcileOptions")
            .field("max_donors", &self.max_donors)
            .field("weighting", &self.weighting)
            .field("distance_metric", &self.distance_metric)
            .field("decay", &self.decay.as_ref().map(|_| "<fn>"))
            .field("key_station_donors", &self.key_station_donors)
            .field("workers", &self.workers)
            .finish()
    }
}

impl ReconcileOptions {
    pub(crate) fn validated_max_donors(&self) -> Result<Option<NonZeroUsize>, ReconcileError> {
        match self.max_donors {
            None => Ok(None),
            Some(n) if n > 0 => Ok(NonZeroUsize::new(n as usize)),
            Some(n) => Err(ReconcileError::InvalidConfiguration(format!(
                "max_donors must be positive, got {}",
                n
            ))),
        }
    }

    pub(crate) fn validated_workers(&self) -> Result<usize, ReconcileError> {
        match self.workers {
            Some(0) => Err(ReconcileError::InvalidConfiguration(
                "workers must be at least 1".to_string(),
            )),
            Some(n) => Ok(n),
            None => Ok(std::thread::available_parallelism().map_or(1, NonZeroUsize::get)),
        }
    }
}

// ============================================================================
// Reconciled output
// ============================================================================

/// One date of a reconciled key station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledRow {
    pub date: NaiveDate,
    /// One value per variable, `None` only for irreconcilable cells.
    pub values: Vec<Option<f64>>,
    pub sources: Vec<CellSource>,
}

/// A key station's complete series with its metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconciledStation {
    pub station: Station,
    pub variables: Vec<String>,
    pub rows: Vec<ReconciledRow>,
}

impl ReconciledStation {
    pub fn count(&self, source: CellSource) -> usize {
        self.rows
            .iter()
            .flat_map(|r| r.sources.iter())
            .filter(|s| **s == source)
            .count()
    }
}

/// Reconciled key stations keyed by identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciledSeries {
    stations: BTreeMap<String, ReconciledStation>,
}

impl ReconciledSeries {
    pub fn get(&self, station_id: &str) -> Option<&ReconciledStation> {
        self.stations.get(station_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReconciledStation> {
        self.stations.values()
    }

    pub fn station_ids(&self) -> impl Iterator<Item = &str> {
        self.stations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

// ============================================================================
// Reconciliation
// ============================================================================

/// Read-only state shared by every worker.
struct Context<'a> {
    table: &'a ObservationTable,
    selector: DonorSelector<'a>,
    engine: InfillEngine,
}

type StationResult = Result<(ReconciledStation, StationReport), ReconcileError>;

/// Fills the gaps of every key station from donor stations.
///
/// Fails fast with `InvalidConfiguration` on an empty key set or invalid
/// options. Per-station failures (`UnknownStation`) are recorded in the
/// report and the station is left out of the series; the remaining key
/// stations are still processed.
pub fn reconcile(
    table: &ObservationTable,
    key_station_ids: &[String],
    options: &ReconcileOptions,
) -> Result<(ReconciledSeries, ReconciliationReport), ReconcileError> {
    if key_station_ids.is_empty() {
        return Err(ReconcileError::InvalidConfiguration(
            "key station set is empty".to_string(),
        ));
    }
    let max_donors = options.validated_max_donors()?;
    let workers = options.validated_workers()?;

    let keys: BTreeSet<String> = key_station_ids.iter().cloned().collect();

    let mut engine = InfillEngine::new(options.weighting, max_donors);
    if let Some(decay) = &options.decay {
        engine = engine.with_decay(decay.clone());
    }
    let mut selector = DonorSelector::new(table, options.distance_metric.metric());
    if !options.key_station_donors {
        selector = selector.excluding(keys.iter().cloned());
    }
    let ctx = Context {
        table,
        selector,
        engine,
    };

    logging::info(
        Stage::Config,
        None,
        &format!(
            "Reconciling {} key stations against {} registered stations ({:?}, {}, {} workers)",
            keys.len(),
            table.registry().len(),
            options.weighting,
            options.distance_metric.metric().name(),
            workers
        ),
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .thread_name(|i| format!("reconcile-{}", i))
        .build()
        .map_err(|e| ReconcileError::WorkerPool(e.to_string()))?;

    let (tx, rx) = channel::unbounded::<(String, StationResult)>();
    pool.scope(|scope| {
        for station_id in &keys {
            let tx = tx.clone();
            let ctx = &ctx;
            scope.spawn(move |_| {
                let result = reconcile_station(ctx, station_id);
                let _ = tx.send((station_id.clone(), result));
            });
        }
    });
    drop(tx);

    let results: BTreeMap<String, StationResult> = rx.iter().collect();

    let mut series = ReconciledSeries::default();
    let mut report = ReconciliationReport::new();
    for (station_id, result) in results {
        match result {
            Ok((station, partial)) => {
                series.stations.insert(station_id, station);
                report.merge(partial);
            }
            Err(err) => {
                logging::log_station_failure(Stage::Detect, &station_id, "reconcile", &err);
                report.record_failure(&station_id, &err);
            }
        }
    }
    report.finalize();

    logging::log_reconcile_summary(
        report.total_gaps,
        report.filled,
        report.unfilled(),
        report.station_failures.len(),
    );
    Ok((series, report))
}

fn reconcile_station(ctx: &Context<'_>, station_id: &str) -> StationResult {
    let gaps = detect_station_gaps(ctx.table, station_id)?;
    let station = ctx
        .table
        .registry()
        .find_station(station_id)
        .cloned()
        .ok_or_else(|| {
            ReconcileError::unknown_station(station_id, "not present in the station registry")
        })?;
    logging::debug(
        Stage::Detect,
        Some(station_id),
        &format!("{} gaps", gaps.total()),
    );
    let candidates = if gaps.is_empty() {
        Vec::new()
    } else {
        ctx.selector.rank_candidates(station_id)?
    };
    logging::debug(
        Stage::Donor,
        Some(station_id),
        &format!(
            "{} candidate donors, nearest {}",
            candidates.len(),
            candidates.first().map_or("none", |c| c.station_id.as_str())
        ),
    );

    // Rows exist for every date in the coverage window (table invariant).
    let mut rows: Vec<ReconciledRow> = ctx
        .table
        .rows(station_id)
        .into_iter()
        .flatten()
        .map(|(date, values)| ReconciledRow {
            date,
            values: values.to_vec(),
            sources: values
                .iter()
                .map(|v| match v {
                    Some(_) => CellSource::Observed,
                    None => CellSource::Missing,
                })
                .collect(),
        })
        .collect();
    let start = rows.first().map(|r| r.date);

    let mut partial = StationReport::new(station_id);
    for gap in gaps.gaps() {
        let (Some(start), Some(variable)) = (start, ctx.table.variable_index(&gap.variable)) else {
            continue;
        };
        let offset = (gap.date - start).num_days() as usize;
        let donors = ctx.selector.donors_for(&candidates, &gap);

        match ctx.engine.fill(&donors) {
            InfillOutcome::Filled { value, donors_used } => {
                rows[offset].values[variable] = Some(value);
                rows[offset].sources[variable] = CellSource::Infilled;
                partial.record_filled();
                logging::debug(
                    Stage::Infill,
                    Some(station_id),
                    &format!("{} filled from {} donors", gap, donors_used),
                );
            }
            InfillOutcome::Irreconcilable => {
                logging::debug(
                    Stage::Infill,
                    Some(station_id),
                    &format!("{} irreconcilable ({} donors listed)", gap, donors.len()),
                );
                partial.record_irreconcilable(gap);
            }
        }
    }

    if !partial.irreconcilable.is_empty() {
        logging::warn(
            Stage::Infill,
            Some(station_id),
            &format!(
                "{} of {} gaps irreconcilable",
                partial.irreconcilable.len(),
                partial.gaps
            ),
        );
    }

    Ok((
        ReconciledStation {
            station,
            variables: ctx.table.variables().to_vec(),
            rows,
        },
        partial,
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stations::StationRegistry;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 1, d).unwrap()
    }

    fn station(id: &str, latitude: f64, longitude: f64) -> Station {
        Station {
            id: id.into(),
            name: id.into(),
            latitude,
            longitude,
            elevation: 50.0,
        }
    }

    /// K at the origin with a hole on day 2; A and B lie east at 10 and
    /// 20 km-ish; C co-located with K.
    fn table(with_colocated: bool) -> ObservationTable {
        let mut stations = vec![
            station("K", 0.0, 0.0),
            station("A", 0.0, 0.1),
            station("B", 0.0, 0.2),
        ];
        if with_colocated {
            stations.push(station("C", 0.0, 0.0));
        }
        let registry = StationRegistry::from_stations(stations).unwrap();
        let mut b = ObservationTable::builder(registry, vec!["tavg".into()]);
        b.push_row("K", date(1), vec![Some(1.0)]).unwrap();
        b.push_row("K", date(2), vec![None]).unwrap();
        b.push_row("K", date(3), vec![Some(3.0)]).unwrap();
        b.push_row("A", date(2), vec![Some(10.0)]).unwrap();
        b.push_row("B", date(2), vec![Some(40.0)]).unwrap();
        if with_colocated {
            b.push_row("C", date(2), vec![Some(-5.0)]).unwrap();
        }
        b.build().unwrap()
    }

    fn keys(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_gap_filled_by_inverse_distance() {
        let (series, report) =
            reconcile(&table(false), &keys(&["K"]), &ReconcileOptions::default()).unwrap();
        let k = series.get("K").unwrap();
        // A is half the distance of B: weights 2:1 → (2*10 + 40) / 3 = 20.
        let value = k.rows[1].values[0].unwrap();
        assert!((value - 20.0).abs() < 1e-9, "got {}", value);
        assert_eq!(k.rows[1].sources[0], CellSource::Infilled);
        assert_eq!(k.rows[0].sources[0], CellSource::Observed);
        assert_eq!(report.total_gaps, 1);
        assert_eq!(report.filled, 1);
        assert!(report.is_clean());
    }

    #[test]
    fn test_colocated_donor_used_exactly() {
        let (series, _) =
            reconcile(&table(true), &keys(&["K"]), &ReconcileOptions::default()).unwrap();
        assert_eq!(series.get("K").unwrap().rows[1].values[0], Some(-5.0));
    }

    #[test]
    fn test_raw_table_is_not_mutated() {
        let table = table(false);
        let before = table.clone();
        let _ = reconcile(&table, &keys(&["K"]), &ReconcileOptions::default()).unwrap();
        assert_eq!(table, before);
        assert_eq!(table.value("K", date(2), 0), None);
    }

    #[test]
    fn test_empty_key_set_is_invalid_configuration() {
        let result = reconcile(&table(false), &[], &ReconcileOptions::default());
        assert!(matches!(result, Err(ReconcileError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_non_positive_max_donors_is_invalid_configuration() {
        for bad in [0, -3] {
            let options = ReconcileOptions {
                max_donors: Some(bad),
                ..Default::default()
            };
            let result = reconcile(&table(false), &keys(&["K"]), &options);
            assert!(
                matches!(result, Err(ReconcileError::InvalidConfiguration(_))),
                "max_donors = {} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_zero_workers_is_invalid_configuration() {
        let options = ReconcileOptions {
            workers: Some(0),
            ..Default::default()
        };
        assert!(reconcile(&table(false), &keys(&["K"]), &options).is_err());
    }

    #[test]
    fn test_key_station_donors_can_be_disabled() {
        // A is a key station too; without key donors only B may lend to K.
        let options = ReconcileOptions {
            key_station_donors: false,
            ..Default::default()
        };
        let (series, report) = reconcile(&table(false), &keys(&["K", "A"]), &options).unwrap();
        assert_eq!(series.get("K").unwrap().rows[1].values[0], Some(40.0));
        assert_eq!(report.stations.len(), 2);
    }

    #[test]
    fn test_duplicate_key_ids_are_reconciled_once() {
        let (series, report) =
            reconcile(&table(false), &keys(&["K", "K"]), &ReconcileOptions::default()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(report.total_gaps, 1);
    }
}
