//! Distance strategies used to rank donor stations.
//!
//! Both metrics return kilometres, are symmetric, deterministic and
//! monotonic in separation, and return exactly `0.0` for co-located
//! stations. The active metric is chosen by configuration through
//! `DistanceMetricKind` and handed to the donor selector as a trait object.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::model::{EARTH_RADIUS_KM, ReconcileError, Station};

pub trait DistanceMetric: Send + Sync {
    /// Distance in kilometres between two stations.
    fn distance(&self, from: &Station, to: &Station) -> f64;

    fn name(&self) -> &'static str;
}

/// Equirectangular projection around the pair's mean latitude.
///
/// Accurate for the tens-of-kilometres separations typical of donor
/// networks; degrades towards the poles and across the antimeridian.
#[derive(Debug, Clone, Copy, Default)]
pub struct Planar;

impl DistanceMetric for Planar {
    fn distance(&self, from: &Station, to: &Station) -> f64 {
        let mean_lat = ((from.latitude + to.latitude) / 2.0).to_radians();
        let dx = (to.longitude - from.longitude).to_radians() * mean_lat.cos();
        let dy = (to.latitude - from.latitude).to_radians();
        EARTH_RADIUS_KM * dx.hypot(dy)
    }

    fn name(&self) -> &'static str {
        "planar"
    }
}

/// Haversine distance on a spherical Earth.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreatCircle;

impl DistanceMetric for GreatCircle {
    fn distance(&self, from: &Station, to: &Station) -> f64 {
        let phi1 = from.latitude.to_radians();
        let phi2 = to.latitude.to_radians();
        let dphi = phi2 - phi1;
        let dlambda = (to.longitude - from.longitude).to_radians();

        let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
        // Rounding can push `a` a hair above 1 for antipodal points.
        let c = 2.0 * a.sqrt().min(1.0).asin();
        EARTH_RADIUS_KM * c
    }

    fn name(&self) -> &'static str {
        "great_circle"
    }
}

static PLANAR: Planar = Planar;
static GREAT_CIRCLE: GreatCircle = GreatCircle;

/// Configuration-level choice of distance metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetricKind {
    Planar,
    #[default]
    GreatCircle,
}

impl DistanceMetricKind {
    pub fn metric(self) -> &'static dyn DistanceMetric {
        match self {
            DistanceMetricKind::Planar => &PLANAR,
            DistanceMetricKind::GreatCircle => &GREAT_CIRCLE,
        }
    }
}

impl FromStr for DistanceMetricKind {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "planar" => Ok(DistanceMetricKind::Planar),
            "great_circle" | "great-circle" | "haversine" => Ok(DistanceMetricKind::GreatCircle),
            other => Err(ReconcileError::InvalidConfiguration(format!(
                "unknown distance metric '{}' (expected planar or great_circle)",
                other
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
