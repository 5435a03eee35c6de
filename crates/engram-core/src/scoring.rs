//! Scoring formulas
//!
//! Pure functions, no state. Importance is computed at write time,
//! confidence is seeded from the observation source and decayed by
//! contradictions, relevance is derived state recomputed only by the
//! consolidation decay cycle.

use crate::model::{ObservationSource, ObservationType};
use chrono::{DateTime, Utc};

/// Narrative length at which the length signal saturates
const NARRATIVE_SATURATION: f64 = 800.0;

/// Fact count at which the fact signal saturates
const FACT_SATURATION: f64 = 6.0;

/// Type weight table. Behavior differences across the observation type set
/// are table-driven rather than polymorphic.
pub fn type_weight(kind: ObservationType) -> f64 {
    match kind {
        ObservationType::Decision => 1.0,
        ObservationType::Discovery => 0.9,
        ObservationType::Pattern => 0.8,
        ObservationType::Insight => 0.8,
        ObservationType::Error => 0.7,
        ObservationType::Change => 0.6,
        ObservationType::Todo => 0.4,
        ObservationType::Note => 0.3,
    }
}

/// Importance: weighted sum of type weight, saturating narrative length,
/// saturating fact count, and the explicit boost, clamped into [0,1].
pub fn importance(kind: ObservationType, narrative_len: usize, fact_count: usize, boost: f64) -> f64 {
    let length_signal = (narrative_len as f64 / NARRATIVE_SATURATION).min(1.0);
    let fact_signal = (fact_count as f64 / FACT_SATURATION).min(1.0);

    let score = 0.55 * type_weight(kind) + 0.2 * length_signal + 0.15 * fact_signal + boost;
    score.clamp(0.0, 1.0)
}

/// Initial confidence by source
pub fn initial_confidence(source: ObservationSource) -> f64 {
    match source {
        ObservationSource::Hook => 0.7,
        ObservationSource::Tool => 0.95,
        ObservationSource::Consolidation => 0.5,
    }
}

/// One-time confidence decay applied when a new `contradicts` relation
/// starts referencing the observation.
pub fn contradicted_confidence(confidence: f64) -> f64 {
    (confidence * 0.9).max(0.1)
}

/// Relevance of an observation at `now`.
///
/// relevance = decay · (0.3 + 0.3·access) · relation_boost
///             · (0.5 + importance) · (0.7 + 0.3·confidence)
///
/// decay = exp(-0.1 · age_days); access = exp(-0.05 · days_since_access)
/// when the observation has been retrieved at least once, otherwise 0;
/// relation_boost = 1 + 0.05 · min(degree, 10).
#[allow(clippy::too_many_arguments)]
pub fn relevance(
    importance: f64,
    confidence: f64,
    age_days: f64,
    days_since_access: f64,
    access_count: i64,
    relation_degree: i64,
) -> f64 {
    let decay = (-0.1 * age_days.max(0.0)).exp();
    let access = if access_count > 0 {
        (-0.05 * days_since_access.max(0.0)).exp()
    } else {
        0.0
    };
    let relation_boost = 1.0 + 0.05 * (relation_degree.clamp(0, 10) as f64);

    let score = decay
        * (0.3 + 0.3 * access)
        * relation_boost
        * (0.5 + importance)
        * (0.7 + 0.3 * confidence);
    score.clamp(0.0, 1.0)
}

/// Relevance computed from observation timestamps.
pub fn relevance_at(
    now: DateTime<Utc>,
    created_at: DateTime<Utc>,
    last_accessed: DateTime<Utc>,
    importance: f64,
    confidence: f64,
    access_count: i64,
    relation_degree: i64,
) -> f64 {
    let age_days = (now - created_at).num_seconds().max(0) as f64 / 86_400.0;
    let access_days = (now - last_accessed).num_seconds().max(0) as f64 / 86_400.0;
    relevance(importance, confidence, age_days, access_days, access_count, relation_degree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_weights_are_ordered() {
        assert_eq!(type_weight(ObservationType::Decision), 1.0);
        assert_eq!(type_weight(ObservationType::Discovery), 0.9);
        assert_eq!(type_weight(ObservationType::Change), 0.6);
        assert_eq!(type_weight(ObservationType::Note), 0.3);
        assert!(type_weight(ObservationType::Decision) > type_weight(ObservationType::Note));
    }

    #[test]
    fn importance_saturates_and_clamps() {
        let short = importance(ObservationType::Note, 0, 0, 0.0);
        let long = importance(ObservationType::Note, 10_000, 100, 0.0);
        assert!(long > short);
        // Saturation: doubling past the cap changes nothing
        assert_eq!(long, importance(ObservationType::Note, 20_000, 200, 0.0));
        // Boost cannot push past 1.0
        assert_eq!(importance(ObservationType::Decision, 10_000, 100, 5.0), 1.0);
    }

    #[test]
    fn confidence_seeds_by_source() {
        assert_eq!(initial_confidence(ObservationSource::Hook), 0.7);
        assert_eq!(initial_confidence(ObservationSource::Tool), 0.95);
        assert_eq!(initial_confidence(ObservationSource::Consolidation), 0.5);
    }

    #[test]
    fn contradiction_decay_floors() {
        let mut c = 0.95;
        for _ in 0..100 {
            c = contradicted_confidence(c);
        }
        assert!((c - 0.1).abs() < 1e-9);
    }

    #[test]
    fn relevance_matches_reference_case() {
        // 30 days old, importance 0.5, confidence 0.8, never accessed,
        // no relations: exp(-3) * 0.3 * 1.0 * 1.0 * 0.94
        let r = relevance(0.5, 0.8, 30.0, 30.0, 0, 0);
        let expected = (-3.0_f64).exp() * 0.3 * 1.0 * 1.0 * 0.94;
        assert!((r - expected).abs() < 1e-9, "r = {r}, expected = {expected}");
        assert!((r - 0.014).abs() < 0.002);
    }

    #[test]
    fn access_and_relations_raise_relevance() {
        let base = relevance(0.5, 0.8, 10.0, 10.0, 0, 0);
        let accessed = relevance(0.5, 0.8, 10.0, 0.0, 5, 0);
        let related = relevance(0.5, 0.8, 10.0, 10.0, 0, 4);
        assert!(accessed > base);
        assert!(related > base);

        // Degree caps at 10
        assert_eq!(
            relevance(0.5, 0.8, 10.0, 10.0, 0, 10),
            relevance(0.5, 0.8, 10.0, 10.0, 0, 50)
        );
    }

    #[test]
    fn relevance_is_deterministic() {
        let a = relevance(0.7, 0.9, 12.5, 3.25, 7, 3);
        let b = relevance(0.7, 0.9, 12.5, 3.25, 7, 3);
        assert_eq!(a, b);
    }
}
