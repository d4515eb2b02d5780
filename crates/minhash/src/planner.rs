//! LSH banding parameter planner.
//!
//! A signature of `bands * rows` values is split into `bands` groups of `rows`
//! consecutive slots. Two documents with Jaccard similarity `s` share at least
//! one band with probability `P(s) = 1 - (1 - s^rows)^bands`. The planner
//! picks the cheapest `(bands, rows)` whose error mass on either side of the
//! threshold stays within the requested bounds:
//!
//! - false negatives: `∫_t^1 (1 - P(s)) ds`
//! - false positives: `∫_0^t P(s) ds`

use peroxide::numerical::integral::{integrate, Integral};
use serde::{Deserialize, Serialize};

use crate::config::PlannerError;

/// Largest signature length the planner will ever propose.
pub const MAX_HASHES: usize = 16_384;

/// Default target similarity.
pub const DEFAULT_THRESHOLD: f64 = 0.75;
/// Default bound on the false negative mass.
pub const DEFAULT_MAX_FALSE_NEGATIVE: f64 = 0.05;
/// Default bound on the false positive mass.
pub const DEFAULT_MAX_FALSE_POSITIVE: f64 = 0.05;

// Adaptive Gauss-Kronrod tolerance for the error masses.
const INTEGRATION_TOLERANCE: f64 = 1e-8;

/// Banding layout chosen by [`plan`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    pub num_bands: usize,
    pub rows_per_band: usize,
}

impl LshParams {
    pub fn new(num_bands: usize, rows_per_band: usize) -> Self {
        Self {
            num_bands,
            rows_per_band,
        }
    }

    /// Signature length required by this layout.
    pub fn num_hashes(&self) -> usize {
        self.num_bands * self.rows_per_band
    }

    /// Probability that a pair with similarity `s` collides in some band.
    pub fn collision_probability(&self, s: f64) -> f64 {
        collision_probability(s, self.num_bands, self.rows_per_band)
    }
}

/// `1 - (1 - s^rows)^bands`, evaluated without cancellation for small `s^rows`.
pub fn collision_probability(s: f64, bands: usize, rows: usize) -> f64 {
    let x = s.powi(rows as i32);
    if x >= 1.0 {
        return 1.0;
    }
    if x <= 0.0 {
        return 0.0;
    }
    -(bands as f64 * (-x).ln_1p()).exp_m1()
}

/// Expected mass of pairs above `threshold` that share no band.
pub fn false_negative_mass(threshold: f64, bands: usize, rows: usize) -> f64 {
    mass(
        move |s| 1.0 - collision_probability(s, bands, rows),
        threshold,
        1.0,
    )
}

/// Expected mass of pairs below `threshold` that share a band.
pub fn false_positive_mass(threshold: f64, bands: usize, rows: usize) -> f64 {
    mass(move |s| collision_probability(s, bands, rows), 0.0, threshold)
}

/// Choose a banding layout for `threshold` within the given error bounds.
///
/// Signature budgets are tried in doubling steps `2, 4, …, MAX_HASHES`. For
/// every budget `n` the layout with the fewest bands whose false negative mass
/// fits is taken (`rows = n / bands`); the first budget whose layout also
/// satisfies the false positive bound wins. The result is a pure function of
/// the three inputs.
pub fn plan(
    threshold: f64,
    max_false_negative: f64,
    max_false_positive: f64,
) -> Result<LshParams, PlannerError> {
    validate(threshold, max_false_negative, max_false_positive)?;

    let mut budget = 2;
    while budget <= MAX_HASHES {
        let params = fewest_bands_for(budget, threshold, max_false_negative);
        let fn_mass = false_negative_mass(threshold, params.num_bands, params.rows_per_band);
        if fn_mass <= max_false_negative
            && false_positive_mass(threshold, params.num_bands, params.rows_per_band)
                <= max_false_positive
        {
            return Ok(params);
        }
        budget *= 2;
    }

    Err(PlannerError::Infeasible {
        threshold,
        max_false_negative,
        max_false_positive,
        max_hashes: MAX_HASHES,
    })
}

/// Smallest band count meeting the false negative bound for `budget` hashes,
/// or one row per band when none does.
fn fewest_bands_for(budget: usize, threshold: f64, max_false_negative: f64) -> LshParams {
    (1..=budget)
        .map(|bands| LshParams::new(bands, budget / bands))
        .find(|p| false_negative_mass(threshold, p.num_bands, p.rows_per_band) <= max_false_negative)
        .unwrap_or_else(|| LshParams::new(budget, 1))
}

fn validate(
    threshold: f64,
    max_false_negative: f64,
    max_false_positive: f64,
) -> Result<(), PlannerError> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(PlannerError::InvalidThreshold(threshold));
    }
    for (name, value) in [
        ("max_false_negative_proba", max_false_negative),
        ("max_false_positive_proba", max_false_positive),
    ] {
        if !(value > 0.0 && value < 1.0) {
            return Err(PlannerError::InvalidProbability { name, value });
        }
    }
    Ok(())
}

fn mass<F>(f: F, lo: f64, hi: f64) -> f64
where
    F: Fn(f64) -> f64 + Copy,
{
    if hi <= lo {
        return 0.0;
    }
    integrate(f, (lo, hi), Integral::G7K15(INTEGRATION_TOLERANCE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_plan() {
        let p = plan(
            DEFAULT_THRESHOLD,
            DEFAULT_MAX_FALSE_NEGATIVE,
            DEFAULT_MAX_FALSE_POSITIVE,
        )
        .unwrap();
        assert_eq!(p, LshParams::new(7, 9));
        assert_eq!(p.num_hashes(), 63);
    }

    #[test]
    fn known_layouts() {
        assert_eq!(plan(0.5, 0.05, 0.05).unwrap(), LshParams::new(22, 5));
        assert_eq!(plan(0.95, 0.05, 0.05).unwrap(), LshParams::new(1, 16));
        assert_eq!(plan(0.3, 0.05, 0.05).unwrap(), LshParams::new(61, 4));
        assert_eq!(plan(1.0, 0.05, 0.05).unwrap(), LshParams::new(1, 32));
    }

    #[test]
    fn plan_is_pure() {
        let a = plan(0.6, 0.02, 0.03).unwrap();
        let b = plan(0.6, 0.02, 0.03).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn planned_layout_meets_bounds() {
        for t in [0.3, 0.5, 0.6, 0.75, 0.9] {
            let p = plan(t, 0.05, 0.05).unwrap();
            assert!(p.num_hashes() <= MAX_HASHES);
            assert!(false_negative_mass(t, p.num_bands, p.rows_per_band) <= 0.05);
            assert!(false_positive_mass(t, p.num_bands, p.rows_per_band) <= 0.05);
        }
    }

    #[test]
    fn unreachable_bounds_are_infeasible() {
        let err = plan(0.5, 1e-9, 1e-9).unwrap_err();
        assert!(matches!(err, PlannerError::Infeasible { max_hashes, .. } if max_hashes == MAX_HASHES));
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert_eq!(plan(0.0, 0.05, 0.05), Err(PlannerError::InvalidThreshold(0.0)));
        assert_eq!(plan(1.5, 0.05, 0.05), Err(PlannerError::InvalidThreshold(1.5)));
        assert!(matches!(
            plan(0.5, 0.0, 0.05),
            Err(PlannerError::InvalidProbability { name: "max_false_negative_proba", .. })
        ));
        assert!(matches!(
            plan(0.5, 0.05, 1.0),
            Err(PlannerError::InvalidProbability { name: "max_false_positive_proba", .. })
        ));
        assert!(plan(f64::NAN, 0.05, 0.05).is_err());
    }

    #[test]
    fn collision_probability_edges() {
        assert_eq!(collision_probability(0.0, 10, 5), 0.0);
        assert_eq!(collision_probability(1.0, 10, 5), 1.0);
        let mid = collision_probability(0.5, 22, 5);
        let naive = 1.0 - (1.0 - 0.5f64.powi(5)).powi(22);
        assert!((mid - naive).abs() < 1e-12);
    }

    #[test]
    fn collision_probability_is_monotone() {
        let p = LshParams::new(22, 5);
        let mut prev = 0.0;
        for i in 0..=100 {
            let cur = p.collision_probability(i as f64 / 100.0);
            assert!(cur >= prev);
            prev = cur;
        }
    }

    #[test]
    fn collision_probability_tiny_values_do_not_vanish() {
        // (1 - 1e-20)^1000 rounds to exactly 1.0 in the naive form.
        let p = collision_probability(1e-4, 1000, 5);
        assert!(p > 0.0);
        assert!((p - 1e-17).abs() < 1e-19);
    }

    #[test]
    fn masses_match_closed_forms() {
        // One band of one row collides with probability s.
        assert!((false_positive_mass(0.5, 1, 1) - 0.125).abs() < 1e-10);
        assert!((false_negative_mass(0.5, 1, 1) - 0.125).abs() < 1e-10);
        // One band of two rows: P(s) = s^2.
        assert!((false_positive_mass(0.6, 1, 2) - 0.072).abs() < 1e-10);
        assert_eq!(false_negative_mass(1.0, 7, 9), 0.0);
    }

    #[test]
    fn masses_at_pinned_layouts() {
        let fn_mass = false_negative_mass(0.5, 22, 5);
        let fp_mass = false_positive_mass(0.5, 22, 5);
        assert!((fn_mass - 0.040_500_4).abs() < 1e-6, "{fn_mass}");
        assert!((fp_mass - 0.048_354_4).abs() < 1e-6, "{fp_mass}");
        let fp_exact = false_positive_mass(1.0, 1, 32);
        assert!((fp_exact - 1.0 / 33.0).abs() < 1e-10, "{fp_exact}");
    }
}
