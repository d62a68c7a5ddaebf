//! Infill engine: one replacement value per gap from its ranked donors.
//!
//! Weighting is a configuration choice: inverse distance (optionally with a
//! caller-supplied decay function in place of `1/d`), or nearest donor only.
//! A donor at distance zero is used exactly under either weighting.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::analysis::donors::Donor;
use crate::model::ReconcileError;

/// Weight as a function of donor distance in kilometres. Non-positive or
/// non-finite weights drop the donor.
pub type DecayFn = Arc<dyn Fn(f64) -> f64 + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    #[default]
    InverseDistance,
    NearestOnly,
}

impl FromStr for Weighting {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inverse_distance" | "inverse-distance" | "idw" => Ok(Weighting::InverseDistance),
            "nearest_only" | "nearest-only" | "nearest" => Ok(Weighting::NearestOnly),
            other => Err(ReconcileError::InvalidConfiguration(format!(
                "unknown weighting '{}' (expected inverse_distance or nearest_only)",
                other
            ))),
        }
    }
}

/// Result of trying to fill one gap.
#[derive(Debug, Clone, PartialEq)]
pub enum InfillOutcome {
    Filled { value: f64, donors_used: usize },
    Irreconcilable,
}

#[derive(Clone)]
pub struct InfillEngine {
    weighting: Weighting,
    max_donors: Option<NonZeroUsize>,
    decay: Option<DecayFn>,
}

impl fmt::Debug for InfillEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfillEngine")
            .field("weighting", &self.weighting)
            .field("max_donors", &self.max_donors)
            .field("decay", &self.decay.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl InfillEngine {
    pub fn new(weighting: Weighting, max_donors: Option<NonZeroUsize>) -> Self {
        InfillEngine {
            weighting,
            max_donors,
            decay: None,
        }
    }

    pub fn with_decay(mut self, decay: DecayFn) -> Self {
        self.decay = Some(decay);
        self
    }

    /// Fills a gap from donors already ranked nearest first.
    ///
    /// Only the first `max_donors` donors with a finite value take part.
    /// Returns `Irreconcilable` when no donor contributes a positive weight.
    pub fn fill(&self, donors: &[Donor]) -> InfillOutcome {
        let limit = self.max_donors.map_or(usize::MAX, NonZeroUsize::get);
        let usable: Vec<&Donor> = donors
            .iter()
            .filter(|d| d.value.is_finite() && d.distance_km.is_finite())
            .take(limit)
            .collect();

        let Some(nearest) = usable.first() else {
            return InfillOutcome::Irreconcilable;
        };

        if nearest.distance_km <= 0.0 || self.weighting == Weighting::NearestOnly {
            return InfillOutcome::Filled {
                value: nearest.value,
                donors_used: 1,
            };
        }

        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;
        let mut donors_used = 0;
        for donor in &usable {
            let weight = match &self.decay {
                Some(decay) => decay(donor.distance_km),
                None => 1.0 / donor.distance_km,
            };
            if !(weight.is_finite() && weight > 0.0) {
                continue;
            }
            weighted_sum += weight * donor.value;
            weight_total += weight;
            donors_used += 1;
        }

        if donors_used == 0 || weight_total <= 0.0 {
            return InfillOutcome::Irreconcilable;
        }
        InfillOutcome::Filled {
            value: weighted_sum / weight_total,
            donors_used,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn donor(id: &str, distance_km: f64, value: f64) -> Donor {
        Donor {
            station_id: id.into(),
            distance_km,
            value,
        }
    }

    fn filled_value(outcome: InfillOutcome) -> f64 {
        match outcome {
            InfillOutcome::Filled { value, .. } => value,
            InfillOutcome::Irreconcilable => panic!("expected a filled value"),
        }
    }

    #[test]
    fn test_inverse_distance_blend() {
        // Weights 1/10 and 1/30: (0.1*4 + 0.0333*8) / 0.1333 = 5.0
        let engine = InfillEngine::new(Weighting::InverseDistance, None);
        let value = filled_value(engine.fill(&[donor("A", 10.0, 4.0), donor("B", 30.0, 8.0)]));
        assert!((value - 5.0).abs() < 1e-12, "got {}", value);
    }

    #[test]
    fn test_co_located_donor_short_circuits_the_blend() {
        let engine = InfillEngine::new(Weighting::InverseDistance, None);
        let outcome = engine.fill(&[donor("A", 0.0, 3.25), donor("B", 1.0, 100.0)]);
        assert_eq!(
            outcome,
            InfillOutcome::Filled { value: 3.25, donors_used: 1 },
            "a zero-distance donor must be used exactly"
        );
    }

    #[test]
    fn test_nearest_only_uses_first_donor() {
        let engine = InfillEngine::new(Weighting::NearestOnly, None);
        let value = filled_value(engine.fill(&[donor("A", 5.0, 1.5), donor("B", 6.0, 9.0)]));
        assert_eq!(value, 1.5);
    }

    #[test]
    fn test_max_donors_limits_the_blend() {
        let limit = NonZeroUsize::new(1);
        let engine = InfillEngine::new(Weighting::InverseDistance, limit);
        let outcome = engine.fill(&[donor("A", 5.0, 1.5), donor("B", 6.0, 9.0)]);
        assert_eq!(outcome, InfillOutcome::Filled { value: 1.5, donors_used: 1 });
    }

    #[test]
    fn test_no_donors_is_irreconcilable() {
        let engine = InfillEngine::new(Weighting::InverseDistance, None);
        assert_eq!(engine.fill(&[]), InfillOutcome::Irreconcilable);
    }

    #[test]
    fn test_donors_with_non_finite_values_are_skipped() {
        let engine = InfillEngine::new(Weighting::InverseDistance, None);
        assert_eq!(
            engine.fill(&[donor("A", 1.0, f64::NAN)]),
            InfillOutcome::Irreconcilable
        );
        let value = filled_value(engine.fill(&[donor("A", 1.0, f64::NAN), donor("B", 2.0, 7.0)]));
        assert_eq!(value, 7.0);
    }

    #[test]
    fn test_custom_decay_replaces_inverse_distance() {
        // Cut-off at 50 km: the far donor gets no weight.
        let decay: DecayFn = Arc::new(|d| if d < 50.0 { 1.0 } else { 0.0 });
        let engine = InfillEngine::new(Weighting::InverseDistance, None).with_decay(decay);
        let outcome = engine.fill(&[donor("A", 10.0, 2.0), donor("B", 20.0, 4.0), donor("C", 80.0, 100.0)]);
        assert_eq!(outcome, InfillOutcome::Filled { value: 3.0, donors_used: 2 });

        let all_far = engine.fill(&[donor("C", 80.0, 100.0)]);
        assert_eq!(all_far, InfillOutcome::Irreconcilable);
    }

    #[test]
    fn test_filling_is_deterministic() {
        let engine = InfillEngine::new(Weighting::InverseDistance, None);
        let donors = [donor("A", 3.3, 0.1), donor("B", 7.7, 0.2), donor("C", 9.1, 0.3)];
        let first = engine.fill(&donors);
        for _ in 0..10 {
            assert_eq!(engine.fill(&donors), first);
        }
    }

    #[test]
    fn test_weighting_parses_known_names_only() {
        assert_eq!("inverse_distance".parse::<Weighting>().unwrap(), Weighting::InverseDistance);
        assert_eq!("nearest_only".parse::<Weighting>().unwrap(), Weighting::NearestOnly);
        assert!("kriging".parse::<Weighting>().is_err());
    }
}
