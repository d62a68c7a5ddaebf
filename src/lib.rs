//! Station time-series reconciliation.
//!
//! Fills the missing daily values of chosen key stations from nearby donor
//! stations and writes one metadata-annotated file per key station for a
//! hydrologic model.
//!
//! The pipeline is a pure step followed by an I/O step:
//!
//! 1. [`reconcile`]: observation table + options → reconciled series and
//!    a [`ReconciliationReport`] of filled, irreconcilable and failed cells.
//! 2. [`write`]: reconciled series → one atomically written file per
//!    station, plus a manifest.

pub mod analysis;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod output;
pub mod reconcile;
pub mod report;
pub mod stations;
pub mod table;

pub use analysis::distance::DistanceMetricKind;
pub use analysis::infill::{DecayFn, Weighting};
pub use model::{CellSource, DateRange, Gap, IngestError, ReconcileError, Station};
pub use output::{OutputUnit, WriteOutcome, WriterOptions, read_unit, write};
pub use reconcile::{ReconcileOptions, ReconciledRow, ReconciledSeries, ReconciledStation, reconcile};
pub use report::{ReconciliationReport, StationFailure, StationOutcome};
pub use stations::StationRegistry;
pub use table::ObservationTable;
