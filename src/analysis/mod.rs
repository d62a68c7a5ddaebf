//! Gap analysis and infill for key stations.
//!
//! Submodules, in pipeline order:
//! - `gaps`:     finds the missing (date, variable) cells of a key station.
//! - `distance`: planar and great-circle distance strategies.
//! - `donors`:   ranks stations able to supply a value for a gap.
//! - `infill`:   turns a ranked donor list into a value or an
//!   irreconcilable classification.

pub mod distance;
pub mod donors;
pub mod gaps;
pub mod infill;
