//! Cycle implementations
//!
//! All three cycles are idempotent per run: decay writes values derived
//! only from row state and the cycle timestamp, associations upsert
//! duplicate tuples in place, and forgetting archives each candidate at
//! most once.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::ConsolidationConfig;
use crate::embeddings::cosine_similarity;
use crate::model::{ObservationType, Provenance, Relation, RelationType};
use crate::scoring;
use crate::storage::{CycleRecord, Result, Store};

use super::CycleKind;

/// Pairwise similarity templates fire only below this time distance
const PARALLEL_CONTEXT_WINDOW: Duration = Duration::hours(1);

/// Counters from one cycle run
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub scanned: usize,
    pub updated: usize,
    pub emitted: usize,
    pub archived: usize,
    pub errors: Vec<String>,
    pub interrupted: bool,
}

/// Runs the consolidation cycles against a shared store
pub struct Consolidator {
    store: Arc<Store>,
    config: ConsolidationConfig,
    stop: AtomicBool,
}

impl Consolidator {
    pub fn new(store: Arc<Store>, config: ConsolidationConfig) -> Self {
        Self {
            store,
            config,
            stop: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn config(&self) -> &ConsolidationConfig {
        &self.config
    }

    /// Ask the running cycle to stop at the next page boundary.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Run one cycle now, recording it in the maintenance log.
    pub fn run_cycle(&self, kind: CycleKind) -> Result<CycleOutcome> {
        let started_at = Utc::now();
        let timer = Instant::now();

        let result = match kind {
            CycleKind::Decay => self.decay_at(started_at),
            CycleKind::Associate => self.associate(),
            CycleKind::Forget => self.forget_at(started_at),
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                // Abort the cycle, keep last-good state, leave a trace
                let record = CycleRecord {
                    id: 0,
                    cycle: kind.as_str().to_string(),
                    started_at,
                    duration_ms: timer.elapsed().as_millis() as i64,
                    scanned: 0,
                    updated: 0,
                    emitted: 0,
                    archived: 0,
                    errors: vec![e.to_string()],
                };
                let _ = self.store.record_cycle(&record);
                return Err(e);
            }
        };

        let record = CycleRecord {
            id: 0,
            cycle: kind.as_str().to_string(),
            started_at,
            duration_ms: timer.elapsed().as_millis() as i64,
            scanned: outcome.scanned as i64,
            updated: outcome.updated as i64,
            emitted: outcome.emitted as i64,
            archived: outcome.archived as i64,
            errors: outcome.errors.clone(),
        };
        self.store.record_cycle(&record)?;

        tracing::info!(
            cycle = kind.as_str(),
            scanned = outcome.scanned,
            updated = outcome.updated,
            emitted = outcome.emitted,
            archived = outcome.archived,
            errors = outcome.errors.len(),
            interrupted = outcome.interrupted,
            duration_ms = timer.elapsed().as_millis() as u64,
            "consolidation cycle complete"
        );
        Ok(outcome)
    }

    /// Run decay, then associations, then (when enabled) forgetting.
    pub fn run_all(&self) -> Result<Vec<CycleOutcome>> {
        let mut outcomes = vec![self.run_cycle(CycleKind::Decay)?];
        outcomes.push(self.run_cycle(CycleKind::Associate)?);
        if self.config.forgetting_enabled {
            outcomes.push(self.run_cycle(CycleKind::Forget)?);
        }
        Ok(outcomes)
    }

    // ========================================================================
    // DECAY
    // ========================================================================

    /// Recompute relevance for every non-archived observation, in stable
    /// id-ordered pages. Pure function of row state and `now`, so running
    /// it twice with the same timestamp is a no-op the second time.
    pub fn decay_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();
        let mut after_id = 0_i64;

        loop {
            if self.stopped() {
                outcome.interrupted = true;
                break;
            }
            let page = self.store.page_observations(after_id, self.config.page_size)?;
            let Some(last) = page.last() else { break };
            after_id = last.id;

            let ids: Vec<i64> = page.iter().map(|o| o.id).collect();
            let degrees = self.store.relation_degrees(&ids)?;

            let updates: Vec<(i64, f64)> = page
                .iter()
                .map(|obs| {
                    let degree = degrees.get(&obs.id).copied().unwrap_or(0);
                    let relevance = scoring::relevance_at(
                        now,
                        obs.created_at,
                        obs.last_accessed,
                        obs.importance,
                        obs.confidence,
                        obs.access_count,
                        degree,
                    );
                    (obs.id, relevance)
                })
                .collect();

            self.store.write_relevance(&updates)?;
            outcome.scanned += page.len();
            outcome.updated += updates.len();
        }

        Ok(outcome)
    }

    // ========================================================================
    // ASSOCIATIONS
    // ========================================================================

    /// Sample observations per project and emit template-matched relations
    /// from pairwise embedding similarity. Duplicate (from, to, kind)
    /// tuples update in place.
    pub fn associate(&self) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();

        for project in self.store.list_projects()? {
            if self.stopped() {
                outcome.interrupted = true;
                break;
            }

            let sample = self
                .store
                .sample_for_association(&project, self.config.association_sample)?;
            outcome.scanned += sample.len();
            if sample.len() < 2 {
                continue;
            }

            let ids: Vec<i64> = sample.iter().map(|o| o.id).collect();
            let embeddings = self.store.embeddings_for(&ids)?;

            for i in 0..sample.len() {
                for j in (i + 1)..sample.len() {
                    let a = &sample[i];
                    let b = &sample[j];
                    let (Some(va), Some(vb)) = (embeddings.get(&a.id), embeddings.get(&b.id))
                    else {
                        continue;
                    };
                    let similarity = cosine_similarity(va, vb) as f64;

                    for relation in association_templates(a, b, similarity) {
                        match self.store.insert_relation(&relation) {
                            Ok(_) => outcome.emitted += 1,
                            Err(e) => outcome.errors.push(format!(
                                "{} -> {} ({}): {}",
                                relation.from, relation.to, relation.kind, e
                            )),
                        }
                    }
                }
            }
        }

        Ok(outcome)
    }

    // ========================================================================
    // FORGETTING
    // ========================================================================

    /// Archive observations whose relevance decayed below the threshold,
    /// unless a protection rule applies. Opt-in.
    pub fn forget_at(&self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let mut outcome = CycleOutcome::default();
        let candidates = self
            .store
            .forgetting_candidates(self.config.forgetting_threshold)?;
        let protected = self.store.relation_protected_ids()?;

        outcome.scanned = candidates.len();
        for obs in candidates {
            if self.stopped() {
                outcome.interrupted = true;
                break;
            }
            if obs.importance >= 0.7 {
                continue;
            }
            if obs.age_days(now) < 90.0 {
                continue;
            }
            if matches!(obs.kind, ObservationType::Decision | ObservationType::Discovery) {
                continue;
            }
            if protected.contains(&obs.id) {
                continue;
            }

            match self.store.archive(obs.id) {
                Ok(_) => outcome.archived += 1,
                Err(e) => outcome.errors.push(format!("{}: {}", obs.id, e)),
            }
        }

        Ok(outcome)
    }
}

/// The association templates: which relations a pair's similarity implies.
fn association_templates(
    a: &crate::model::Observation,
    b: &crate::model::Observation,
    similarity: f64,
) -> Vec<Relation> {
    let mut relations = vec![];
    // Canonical direction for symmetric templates: lower id first
    let (lo, hi) = if a.id < b.id { (a, b) } else { (b, a) };

    if a.kind == ObservationType::Decision
        && b.kind == ObservationType::Decision
        && similarity < 0.35
    {
        relations.push(
            Relation::new(lo.id, hi.id, RelationType::Contradicts, 1.0 - similarity)
                .with_provenance(Provenance::Consolidation),
        );
    }

    let is_explainer =
        |kind: ObservationType| matches!(kind, ObservationType::Insight | ObservationType::Pattern);
    if (0.45..=0.75).contains(&similarity) && (is_explainer(a.kind) || is_explainer(b.kind)) {
        // The insight or pattern is the explaining side
        let (from, to) = if is_explainer(a.kind) { (a, b) } else { (b, a) };
        relations.push(
            Relation::new(from.id, to.id, RelationType::Explains, similarity)
                .with_provenance(Provenance::Consolidation),
        );
    }

    if similarity > 0.7 {
        relations.push(
            Relation::new(lo.id, hi.id, RelationType::SharesTheme, similarity)
                .with_provenance(Provenance::Consolidation),
        );
    }

    let dt = (a.created_at - b.created_at).abs();
    if dt <= PARALLEL_CONTEXT_WINDOW && similarity < 0.3 {
        relations.push(
            Relation::new(lo.id, hi.id, RelationType::ParallelContext, 0.5)
                .with_provenance(Provenance::Consolidation),
        );
    }

    relations
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Observation, ObservationDraft, ObservationFilter};
    use tempfile::TempDir;

    const DIMS: usize = 8;

    fn consolidator() -> (TempDir, Consolidator) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engram.db"), 2, DIMS).unwrap());
        let consolidator = Consolidator::new(
            store,
            ConsolidationConfig {
                forgetting_enabled: true,
                page_size: 3,
                ..ConsolidationConfig::default()
            },
        );
        (dir, consolidator)
    }

    /// Unit vector with cosine `target` against the first basis vector
    fn vector_with_cosine(target: f32) -> Vec<f32> {
        let mut v = vec![0.0_f32; DIMS];
        v[0] = target;
        v[1] = (1.0 - target * target).sqrt();
        v
    }

    fn basis() -> Vec<f32> {
        let mut v = vec![0.0_f32; DIMS];
        v[0] = 1.0;
        v
    }

    fn aged(
        project: &str,
        kind: ObservationType,
        title: &str,
        age_days: i64,
        importance: f64,
        relevance: f64,
    ) -> Observation {
        let created = Utc::now() - Duration::days(age_days);
        Observation {
            id: 0,
            project: project.into(),
            session_id: None,
            workstation: "ws".into(),
            kind,
            title: title.into(),
            subtitle: String::new(),
            narrative: "aged fixture".into(),
            facts: vec![],
            tags: vec![],
            files: vec![],
            concepts: vec![],
            importance,
            confidence: 0.8,
            relevance,
            access_count: 0,
            archived: false,
            superseded_by: None,
            embedding_pending: false,
            created_at: created,
            last_accessed: created,
        }
    }

    #[test]
    fn decay_is_idempotent_for_a_fixed_timestamp() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        for i in 0..7 {
            let mut draft =
                ObservationDraft::new("proj_a", ObservationType::Note, format!("note {i}"));
            draft.narrative = "some narrative".into();
            store.insert_observation(&draft, Some(&basis()), "m").unwrap();
        }

        let now = Utc::now() + Duration::days(3);
        let first = consolidator.decay_at(now).unwrap();
        assert_eq!(first.updated, 7);
        let snapshot: Vec<f64> = store
            .list_by_filter(&ObservationFilter::project("proj_a"), 100, 0)
            .unwrap()
            .iter()
            .map(|o| o.relevance)
            .collect();

        let second = consolidator.decay_at(now).unwrap();
        assert_eq!(second.updated, 7);
        let again: Vec<f64> = store
            .list_by_filter(&ObservationFilter::project("proj_a"), 100, 0)
            .unwrap()
            .iter()
            .map(|o| o.relevance)
            .collect();

        for (a, b) in snapshot.iter().zip(again.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn decay_matches_the_reference_value() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        let mut obs = aged("proj_a", ObservationType::Note, "aged", 30, 0.5, 1.0);
        obs.confidence = 0.8;
        let id = store.restore_observation(&obs, Some(&basis()), "m").unwrap();

        consolidator.run_cycle(CycleKind::Decay).unwrap();

        let decayed = store.get_by_id(id).unwrap().unwrap().relevance;
        let expected = (-3.0_f64).exp() * 0.3 * 1.0 * 1.0 * 0.94;
        assert!(
            (decayed - expected).abs() < 1e-4,
            "relevance {decayed} vs expected {expected}"
        );
    }

    #[test]
    fn contradicting_decisions_get_exactly_one_relation() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        let mut d1 = ObservationDraft::new("proj_a", ObservationType::Decision, "store in sqlite");
        d1.narrative = "single node is fine".into();
        let a = store.insert_observation(&d1, Some(&basis()), "m").unwrap();

        let mut d2 = ObservationDraft::new("proj_a", ObservationType::Decision, "move to postgres");
        d2.narrative = "need real concurrency".into();
        let b = store
            .insert_observation(&d2, Some(&vector_with_cosine(0.2)), "m")
            .unwrap();

        consolidator.run_cycle(CycleKind::Associate).unwrap();

        let relations: Vec<_> = store
            .relations_for(a.id)
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == RelationType::Contradicts)
            .collect();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].weight - 0.8).abs() < 1e-4);
        assert_eq!(relations[0].provenance, Provenance::Consolidation);
        assert!(relations[0].from == a.id.min(b.id));

        // A second cycle updates the same tuple instead of duplicating it
        consolidator.run_cycle(CycleKind::Associate).unwrap();
        let relations: Vec<_> = store
            .relations_for(a.id)
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == RelationType::Contradicts)
            .collect();
        assert_eq!(relations.len(), 1);
    }

    #[test]
    fn similar_pairs_share_a_theme() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        let mut d1 = ObservationDraft::new("proj_a", ObservationType::Note, "pool tuning");
        d1.narrative = "raise pool size".into();
        let a = store.insert_observation(&d1, Some(&basis()), "m").unwrap();

        let mut d2 = ObservationDraft::new("proj_a", ObservationType::Note, "pool sizing");
        d2.narrative = "same theme".into();
        let b = store
            .insert_observation(&d2, Some(&vector_with_cosine(0.9)), "m")
            .unwrap();

        consolidator.run_cycle(CycleKind::Associate).unwrap();

        let relations = store.relations_for(a.id).unwrap();
        let theme: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationType::SharesTheme)
            .collect();
        assert_eq!(theme.len(), 1);
        assert!((theme[0].weight - 0.9).abs() < 1e-2);
        assert!(theme[0].from == a.id.min(b.id) && theme[0].to == a.id.max(b.id));
    }

    #[test]
    fn insights_explain_mid_similarity_neighbors() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        let mut d1 = ObservationDraft::new("proj_a", ObservationType::Insight, "locks cascade");
        d1.narrative = "writers stall readers".into();
        let insight = store.insert_observation(&d1, Some(&basis()), "m").unwrap();

        let mut d2 = ObservationDraft::new("proj_a", ObservationType::Error, "deadlock in prod");
        d2.narrative = "two writers".into();
        let error = store
            .insert_observation(&d2, Some(&vector_with_cosine(0.6)), "m")
            .unwrap();

        consolidator.run_cycle(CycleKind::Associate).unwrap();

        let relations = store.relations_for(insight.id).unwrap();
        let explains: Vec<_> = relations
            .iter()
            .filter(|r| r.kind == RelationType::Explains)
            .collect();
        assert_eq!(explains.len(), 1);
        // The insight is the explaining side
        assert_eq!(explains[0].from, insight.id);
        assert_eq!(explains[0].to, error.id);
    }

    #[test]
    fn forgetting_honors_protection_rules() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        // Candidate: old, unimportant, low relevance -> archived
        let stale = store
            .restore_observation(
                &aged("proj_a", ObservationType::Note, "stale", 120, 0.5, 0.02),
                Some(&basis()),
                "m",
            )
            .unwrap();
        // Importance >= 0.7 protects
        let important = store
            .restore_observation(
                &aged("proj_a", ObservationType::Note, "important", 120, 0.75, 0.02),
                Some(&basis()),
                "m",
            )
            .unwrap();
        // Young observations are protected
        let young = store
            .restore_observation(
                &aged("proj_a", ObservationType::Note, "young", 10, 0.5, 0.02),
                Some(&basis()),
                "m",
            )
            .unwrap();
        // Decisions are protected regardless of relevance
        let decision = store
            .restore_observation(
                &aged("proj_a", ObservationType::Decision, "decision", 120, 0.5, 0.02),
                Some(&basis()),
                "m",
            )
            .unwrap();

        let outcome = consolidator.run_cycle(CycleKind::Forget).unwrap();
        assert_eq!(outcome.archived, 1);

        assert!(store.get_by_id(stale).unwrap().unwrap().archived);
        assert!(!store.get_by_id(important).unwrap().unwrap().archived);
        assert!(!store.get_by_id(young).unwrap().unwrap().archived);
        assert!(!store.get_by_id(decision).unwrap().unwrap().archived);
    }

    #[test]
    fn supersedes_relation_protects_from_forgetting() {
        let (_dir, consolidator) = consolidator();
        let store = consolidator.store().clone();

        let old = store
            .restore_observation(
                &aged("proj_a", ObservationType::Note, "old way", 120, 0.5, 0.02),
                Some(&basis()),
                "m",
            )
            .unwrap();
        let new = store
            .restore_observation(
                &aged("proj_a", ObservationType::Note, "new way", 5, 0.5, 0.5),
                Some(&basis()),
                "m",
            )
            .unwrap();
        store.supersede(old, new).unwrap();

        let outcome = consolidator.run_cycle(CycleKind::Forget).unwrap();
        assert_eq!(outcome.archived, 0);
        assert!(!store.get_by_id(old).unwrap().unwrap().archived);
    }

    #[test]
    fn cycle_runs_land_in_the_maintenance_log() {
        let (_dir, consolidator) = consolidator();
        consolidator.run_cycle(CycleKind::Decay).unwrap();
        consolidator.run_cycle(CycleKind::Associate).unwrap();

        let cycles = consolidator.store().list_cycles(10).unwrap();
        assert_eq!(cycles.len(), 2);
        let names: Vec<&str> = cycles.iter().map(|c| c.cycle.as_str()).collect();
        assert!(names.contains(&"decay"));
        assert!(names.contains(&"associate"));
    }
}
