//! Search manager: the ranking core
//!
//! Pipeline: dispatch the vector and lexical branches in parallel, take a
//! single branch's ranking when its top hit clears the short-circuit
//! threshold, otherwise fuse with weighted RRF; hydrate from the row store;
//! drop candidates failing post-filters the indexes cannot express; rerank
//! the shortlist within its latency budget; trim to `top_k`. Ties break on
//! higher importance, newer creation, lower id.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::{RerankConfig, SearchConfig};
use crate::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::model::{Observation, ObservationFilter};
use crate::storage::{Store, StoreError};

use super::fusion::{rrf_fuse, short_circuits, FusedHit};
use super::reranker::{RerankOutcome, Reranker, RerankerConfig};

/// Queries below this cosine similarity are noise, not neighbors
const MIN_VECTOR_SIMILARITY: f32 = 0.25;

/// Query-embedding LRU capacity
const QUERY_CACHE_SIZE: usize = 128;

// ============================================================================
// TYPES
// ============================================================================

/// Search error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

/// Result type for search operations
pub type Result<T> = std::result::Result<T, SearchError>;

/// Which branches participate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Hybrid,
    Vector,
    Lexical,
}

/// Options for one search call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SearchOptions {
    pub top_k: usize,
    /// Candidates fetched per branch before fusion
    pub candidates: usize,
    pub short_circuit_threshold: f64,
    pub rerank: bool,
    pub mode: SearchMode,
    /// Attach per-result ranking explanations
    pub explain: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            candidates: 100,
            short_circuit_threshold: 0.85,
            rerank: true,
            mode: SearchMode::Hybrid,
            explain: false,
        }
    }
}

/// Why a result ranks where it does
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingExplanation {
    pub vector_rank: Option<usize>,
    pub lexical_rank: Option<usize>,
    pub fused_score: f64,
    pub rerank_score: Option<f32>,
    /// Branch that short-circuited fusion, if any
    pub short_circuit: Option<String>,
}

/// One ranked search result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub observation: Observation,
    pub score: f64,
    pub rerank_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<RankingExplanation>,
}

// ============================================================================
// SEARCH MANAGER
// ============================================================================

/// Hybrid retrieval over the store's indexes
pub struct SearchManager {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    reranker: Mutex<Reranker>,
    config: SearchConfig,
    rerank_config: RerankConfig,
    query_cache: Mutex<LruCache<String, Vec<f32>>>,
}

impl SearchManager {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: SearchConfig,
        rerank_config: RerankConfig,
    ) -> Self {
        let reranker = Reranker::new(RerankerConfig {
            budget: rerank_config.budget,
        });
        Self {
            store,
            embedder,
            reranker: Mutex::new(reranker),
            config,
            rerank_config,
            query_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(QUERY_CACHE_SIZE).expect("cache size is non-zero"),
            )),
        }
    }

    /// Load the cross-encoder model. Call once at startup.
    #[cfg(feature = "embeddings")]
    pub fn init_reranker(&self) {
        if self.rerank_config.enabled {
            if let Ok(mut reranker) = self.reranker.lock() {
                reranker.init_cross_encoder();
            }
        }
    }

    /// The shared store handle.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The embedding provider.
    pub fn embedder(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.embedder
    }

    /// Embed a query, caching by text.
    pub fn query_embedding(&self, query: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
        if let Ok(mut cache) = self.query_cache.lock() {
            if let Some(vector) = cache.get(query) {
                return Ok(vector.clone());
            }
        }
        let vector = self.embedder.embed(query)?;
        if let Ok(mut cache) = self.query_cache.lock() {
            cache.put(query.to_string(), vector.clone());
        }
        Ok(vector)
    }

    /// Ranked hybrid search.
    pub fn search(
        &self,
        query: &str,
        filter: &ObservationFilter,
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query cannot be empty".into()));
        }
        let top_k = options.top_k.max(1);
        let candidates = options.candidates.max(top_k);

        // Branch dispatch: lexical on this thread, vector on a scoped one
        let (vector_results, lexical_results) = std::thread::scope(|scope| {
            let vector_handle = (options.mode != SearchMode::Lexical)
                .then(|| scope.spawn(|| self.vector_branch(query, filter, candidates)));

            let lexical = if options.mode != SearchMode::Vector {
                self.lexical_branch(query, filter, candidates)
            } else {
                Ok(vec![])
            };

            let vector = match vector_handle {
                Some(handle) => handle
                    .join()
                    .unwrap_or_else(|_| Err(SearchError::InvalidQuery("vector branch panicked".into()))),
                None => Ok(vec![]),
            };
            (vector, lexical)
        });

        let vector_results = match vector_results {
            Ok(results) => results,
            Err(e) => match options.mode {
                // Hybrid degrades to lexical when the embedder is down
                SearchMode::Hybrid => {
                    tracing::warn!("vector branch unavailable, degrading to lexical: {e}");
                    vec![]
                }
                _ => return Err(e),
            },
        };
        let lexical_results = lexical_results?;

        // Short-circuit: a branch with a confident top hit wins outright
        let mut short_circuit: Option<&'static str> = None;
        let fused: Vec<FusedHit> = if options.mode == SearchMode::Hybrid {
            let vector_confident = short_circuits(&vector_results, options.short_circuit_threshold);
            let lexical_confident =
                short_circuits(&lexical_results, options.short_circuit_threshold);

            match (vector_confident, lexical_confident) {
                (true, false) => {
                    short_circuit = Some("vector");
                    single_branch(&vector_results, true, self.config.rrf_k, self.config.vector_weight)
                }
                (false, true) => {
                    short_circuit = Some("lexical");
                    single_branch(&lexical_results, false, self.config.rrf_k, self.config.text_weight)
                }
                (true, true) => {
                    // Both confident: take the stronger top hit
                    let v_top = vector_results.first().map(|(_, s)| *s).unwrap_or(0.0);
                    let l_top = lexical_results.first().map(|(_, s)| *s).unwrap_or(0.0);
                    if v_top >= l_top {
                        short_circuit = Some("vector");
                        single_branch(&vector_results, true, self.config.rrf_k, self.config.vector_weight)
                    } else {
                        short_circuit = Some("lexical");
                        single_branch(&lexical_results, false, self.config.rrf_k, self.config.text_weight)
                    }
                }
                (false, false) => rrf_fuse(
                    &vector_results,
                    &lexical_results,
                    self.config.rrf_k,
                    self.config.vector_weight,
                    self.config.text_weight,
                ),
            }
        } else if options.mode == SearchMode::Vector {
            single_branch(&vector_results, true, self.config.rrf_k, self.config.vector_weight)
        } else {
            single_branch(&lexical_results, false, self.config.rrf_k, self.config.text_weight)
        };

        if fused.is_empty() {
            return Ok(vec![]);
        }

        // Hydrate and apply post-filters the indexes cannot express
        let candidate_ids: Vec<i64> = fused.iter().take(candidates).map(|h| h.id).collect();
        let observations = self.store.batch_get(&candidate_ids)?;
        let by_id: std::collections::HashMap<i64, Observation> =
            observations.into_iter().map(|o| (o.id, o)).collect();

        let mut ranked: Vec<(FusedHit, Observation)> = fused
            .into_iter()
            .filter_map(|hit| {
                let obs = by_id.get(&hit.id)?;
                filter.matches(obs).then(|| (hit, obs.clone()))
            })
            .collect();

        // Ties: higher importance, newer creation, lower id
        ranked.sort_by(|(a, ao), (b, bo)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    bo.importance
                        .partial_cmp(&ao.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| bo.created_at.cmp(&ao.created_at))
                .then_with(|| ao.id.cmp(&bo.id))
        });

        // Rerank the shortlist, keeping the fused order on budget overrun
        let mut rerank_scores: Vec<Option<f32>> = vec![None; ranked.len()];
        if options.rerank && self.rerank_config.enabled && ranked.len() > 1 {
            let shortlist = ranked.len().min(self.rerank_config.candidates);
            let documents: Vec<String> = ranked[..shortlist]
                .iter()
                .map(|(_, obs)| rerank_document(obs))
                .collect();

            let outcome = self
                .reranker
                .lock()
                .map_err(|_| SearchError::InvalidQuery("reranker lock poisoned".into()))?
                .rerank(query, &documents);

            match outcome {
                Ok(RerankOutcome::Reranked(rescored)) => {
                    let mut reordered = Vec::with_capacity(ranked.len());
                    let mut scores = Vec::with_capacity(ranked.len());
                    let mut taken = vec![false; shortlist];
                    // Only the configured number of results keep their
                    // cross-encoder placement; the rest fall back to the
                    // fused order
                    for hit in rescored.iter().take(self.rerank_config.results) {
                        if hit.index < shortlist && !taken[hit.index] {
                            taken[hit.index] = true;
                            reordered.push(ranked[hit.index].clone());
                            scores.push(Some(hit.score));
                        }
                    }
                    // Anything the model skipped, then the tail beyond the
                    // shortlist, keeps the fused order
                    for (i, hit) in ranked.iter().enumerate() {
                        if i >= shortlist || !taken.get(i).copied().unwrap_or(true) {
                            reordered.push(hit.clone());
                            scores.push(None);
                        }
                    }
                    ranked = reordered;
                    rerank_scores = scores;
                }
                Ok(RerankOutcome::KeptInputOrder { reason }) => {
                    tracing::debug!("rerank skipped: {reason}");
                }
                Err(e) => {
                    tracing::warn!("rerank failed, keeping fused order: {e}");
                }
            }
        }

        ranked.truncate(top_k);
        rerank_scores.truncate(top_k);

        let ids: Vec<i64> = ranked.iter().map(|(_, obs)| obs.id).collect();
        if let Err(e) = self.store.touch_access(&ids) {
            tracing::warn!("failed to bump access counters: {e}");
        }

        Ok(ranked
            .into_iter()
            .zip(rerank_scores)
            .map(|((fused_hit, observation), rerank_score)| SearchHit {
                score: rerank_score.map(|s| s as f64).unwrap_or(fused_hit.score),
                explanation: options.explain.then(|| RankingExplanation {
                    vector_rank: fused_hit.vector_rank,
                    lexical_rank: fused_hit.lexical_rank,
                    fused_score: fused_hit.score,
                    rerank_score,
                    short_circuit: short_circuit.map(str::to_string),
                }),
                rerank_score,
                observation,
            })
            .collect())
    }

    /// Nearest observations to an existing one, by its stored embedding.
    pub fn find_similar(&self, id: i64, top_k: usize) -> Result<Vec<SearchHit>> {
        let observation = self
            .store
            .get_by_id(id)?
            .ok_or(StoreError::NotFound(id))?;
        let embeddings = self.store.embeddings_for(&[id])?;
        let Some(vector) = embeddings.get(&id) else {
            return Ok(vec![]);
        };

        #[cfg(feature = "vector-search")]
        {
            let neighbors = self
                .store
                .vector_query(vector, top_k + 1, Some(&observation.project))?;
            let ids: Vec<i64> = neighbors
                .iter()
                .filter(|(nid, _)| *nid != id)
                .take(top_k)
                .map(|(nid, _)| *nid)
                .collect();
            let scores: std::collections::HashMap<i64, f32> = neighbors.into_iter().collect();
            let observations = self.store.batch_get(&ids)?;
            Ok(observations
                .into_iter()
                .map(|obs| SearchHit {
                    score: scores.get(&obs.id).copied().unwrap_or(0.0) as f64,
                    rerank_score: None,
                    explanation: None,
                    observation: obs,
                })
                .collect())
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let _ = (vector, observation, top_k);
            Ok(vec![])
        }
    }

    fn vector_branch(
        &self,
        query: &str,
        filter: &ObservationFilter,
        candidates: usize,
    ) -> Result<Vec<(i64, f32)>> {
        #[cfg(feature = "vector-search")]
        {
            let embedding = self.query_embedding(query)?;
            let hits = self
                .store
                .vector_query(&embedding, candidates, Some(&filter.project))?;
            Ok(hits
                .into_iter()
                .filter(|(_, similarity)| *similarity >= MIN_VECTOR_SIMILARITY)
                .collect())
        }
        #[cfg(not(feature = "vector-search"))]
        {
            let _ = (query, filter, candidates);
            Ok(vec![])
        }
    }

    fn lexical_branch(
        &self,
        query: &str,
        filter: &ObservationFilter,
        candidates: usize,
    ) -> Result<Vec<(i64, f32)>> {
        Ok(self.store.keyword_search(query, filter, candidates)?)
    }
}

/// Rank a single branch without fusion, preserving its order.
fn single_branch(results: &[(i64, f32)], is_vector: bool, k: f64, weight: f64) -> Vec<FusedHit> {
    results
        .iter()
        .enumerate()
        .map(|(rank0, (id, _))| {
            let rank = rank0 + 1;
            FusedHit {
                id: *id,
                score: weight / (k + rank as f64),
                vector_rank: is_vector.then_some(rank),
                lexical_rank: (!is_vector).then_some(rank),
            }
        })
        .collect()
}

/// Text handed to the cross-encoder for one candidate.
fn rerank_document(obs: &Observation) -> String {
    let mut doc = obs.title.clone();
    if !obs.subtitle.is_empty() {
        doc.push_str(". ");
        doc.push_str(&obs.subtitle);
    }
    if !obs.narrative.is_empty() {
        doc.push('\n');
        doc.push_str(&obs.narrative);
    }
    // Cross-encoders degrade on very long pairs
    if doc.len() > 2000 {
        let mut end = 2000;
        while end > 0 && !doc.is_char_boundary(end) {
            end -= 1;
        }
        doc.truncate(end);
    }
    doc
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservationDraft, ObservationType};
    use tempfile::TempDir;

    const DIMS: usize = 16;

    /// Deterministic token-hash embedder: cosine similarity tracks token
    /// overlap, which is all the pipeline tests need.
    struct StubEmbedder;

    impl EmbeddingProvider for StubEmbedder {
        fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, EmbeddingError> {
            if text.trim().is_empty() {
                return Err(EmbeddingError::InvalidInput("empty".into()));
            }
            let mut vector = vec![0.0_f32; DIMS];
            for token in text.to_lowercase().split_whitespace() {
                let mut hash = 5381_u64;
                for b in token.bytes() {
                    hash = hash.wrapping_mul(33).wrapping_add(b as u64);
                }
                vector[(hash % DIMS as u64) as usize] += 1.0;
            }
            Ok(crate::embeddings::truncate_normalize(vector, DIMS))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            "stub-token-hash"
        }
    }

    fn manager() -> (TempDir, SearchManager) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engram.db"), 2, DIMS).unwrap());
        let manager = SearchManager::new(
            store,
            Arc::new(StubEmbedder),
            SearchConfig::default(),
            RerankConfig {
                enabled: false,
                ..RerankConfig::default()
            },
        );
        (dir, manager)
    }

    fn insert(
        manager: &SearchManager,
        project: &str,
        kind: ObservationType,
        title: &str,
        vector: &[f32],
    ) -> i64 {
        let mut draft = ObservationDraft::new(project, kind, title);
        draft.narrative = format!("{title} details");
        manager
            .store()
            .insert_observation(&draft, Some(vector), "stub")
            .unwrap()
            .id
    }

    /// A unit vector orthogonal to `v` (token-hash vectors always leave
    /// empty buckets at this dimension).
    fn orthogonal_to(v: &[f32]) -> Vec<f32> {
        let mut out = vec![0.0_f32; v.len()];
        let zero = v.iter().position(|x| *x == 0.0).expect("a zero bucket exists");
        out[zero] = 1.0;
        out
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn hybrid_interleaves_lexical_and_semantic_matches() {
        let (_dir, manager) = manager();
        let query_vector = StubEmbedder.embed("index timeout").unwrap();
        // A matches only lexically: the title carries the query words but
        // its embedding is orthogonal to the query's
        let a = insert(
            &manager,
            "proj_a",
            ObservationType::Error,
            "index timeout during bulk load",
            &orthogonal_to(&query_vector),
        );
        // B matches only semantically: embedding equals the query's, text
        // shares no terms
        let b = insert(
            &manager,
            "proj_a",
            ObservationType::Discovery,
            "slow lookups under write pressure",
            &query_vector,
        );

        let filter = ObservationFilter::project("proj_a");
        let options = SearchOptions {
            rerank: false,
            ..Default::default()
        };
        let hits = manager.search("index timeout", &filter, &options).unwrap();

        let ids: Vec<i64> = hits.iter().map(|h| h.observation.id).collect();
        assert!(ids.contains(&a), "lexical-only match must surface");
        assert!(ids.contains(&b), "semantic-only match must surface");

        // Vector mode drops the lexical-only match
        let options = SearchOptions {
            mode: SearchMode::Vector,
            rerank: false,
            ..Default::default()
        };
        let hits = manager.search("index timeout", &filter, &options).unwrap();
        let ids: Vec<i64> = hits.iter().map(|h| h.observation.id).collect();
        assert!(ids.contains(&b));
        assert!(!ids.contains(&a));
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn short_circuit_takes_the_vector_ranking() {
        let (_dir, manager) = manager();
        let query_vector = StubEmbedder.embed("connection pool exhaustion").unwrap();
        // Near-perfect semantic hit: same embedding as the query
        let semantic = insert(
            &manager,
            "proj_a",
            ObservationType::Decision,
            "replication lag watch unrelated words here",
            &query_vector,
        );
        // Strong lexical hit that fusion would have promoted
        insert(
            &manager,
            "proj_a",
            ObservationType::Note,
            "connection pool exhaustion connection pool exhaustion",
            &orthogonal_to(&query_vector),
        );

        let filter = ObservationFilter::project("proj_a");
        let options = SearchOptions {
            rerank: false,
            explain: true,
            ..Default::default()
        };
        let hits = manager
            .search("connection pool exhaustion", &filter, &options)
            .unwrap();

        // The vector branch's cosine ~1.0 clears 0.85, so its ranking wins
        assert_eq!(hits[0].observation.id, semantic);
        let explanation = hits[0].explanation.as_ref().unwrap();
        assert_eq!(explanation.short_circuit.as_deref(), Some("vector"));
        assert_eq!(explanation.vector_rank, Some(1));
    }

    #[test]
    fn post_filters_are_respected() {
        let (_dir, manager) = manager();
        let vector = StubEmbedder.embed("retry with backoff").unwrap();
        insert(&manager, "proj_a", ObservationType::Note, "retry with backoff", &vector);

        let mut filter = ObservationFilter::project("proj_a");
        filter.min_importance = Some(0.99);
        let options = SearchOptions {
            rerank: false,
            ..Default::default()
        };
        let hits = manager.search("retry backoff", &filter, &options).unwrap();
        assert!(hits.is_empty(), "min-importance post-filter must drop the hit");

        // Project isolation holds on every path
        let foreign = ObservationFilter::project("proj_b");
        assert!(manager.search("retry backoff", &foreign, &options).unwrap().is_empty());
    }

    #[test]
    fn empty_store_returns_empty_list() {
        let (_dir, manager) = manager();
        let filter = ObservationFilter::project("proj_a");
        let hits = manager
            .search("anything at all", &filter, &SearchOptions::default())
            .unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn empty_query_is_an_error() {
        let (_dir, manager) = manager();
        let filter = ObservationFilter::project("proj_a");
        assert!(matches!(
            manager.search("  ", &filter, &SearchOptions::default()),
            Err(SearchError::InvalidQuery(_))
        ));
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn search_bumps_access_counters() {
        let (_dir, manager) = manager();
        let vector = StubEmbedder.embed("cache warming strategy").unwrap();
        let id = insert(&manager, "proj_a", ObservationType::Note, "cache warming strategy", &vector);

        let filter = ObservationFilter::project("proj_a");
        let options = SearchOptions {
            rerank: false,
            ..Default::default()
        };
        manager.search("cache warming", &filter, &options).unwrap();

        let obs = manager.store().get_by_id(id).unwrap().unwrap();
        assert_eq!(obs.access_count, 1);
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn find_similar_excludes_self_and_other_projects() {
        let (_dir, manager) = manager();
        let vector = StubEmbedder.embed("shared embedding text").unwrap();
        let a = insert(&manager, "proj_a", ObservationType::Note, "first", &vector);
        let b = insert(&manager, "proj_a", ObservationType::Note, "second", &vector);
        insert(&manager, "proj_b", ObservationType::Note, "foreign", &vector);

        let similar = manager.find_similar(a, 5).unwrap();
        let ids: Vec<i64> = similar.iter().map(|h| h.observation.id).collect();
        assert!(ids.contains(&b));
        assert!(!ids.contains(&a));
        assert!(similar.iter().all(|h| h.observation.project == "proj_a"));
    }
}
