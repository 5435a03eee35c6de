//! Cross-encoder reranking
//!
//! Second retrieval stage: the fused shortlist is re-scored against the
//! query by a cross-encoder. A hard latency budget applies; when the model
//! runs over budget (or is unavailable and the fallback is disabled) the
//! input order is returned unchanged.
//!
//! Falls back to BM25-like term overlap scoring when the cross-encoder
//! model is not loaded.

use std::time::{Duration, Instant};

#[cfg(feature = "embeddings")]
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};

/// Reranker error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum RerankerError {
    #[error("reranker initialization failed: {0}")]
    ModelInit(String),
    #[error("reranking failed: {0}")]
    Failed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// A reranked candidate
#[derive(Debug, Clone)]
pub struct RerankedHit {
    /// Index into the input shortlist
    pub index: usize,
    /// Cross-encoder (or fallback) relevance score
    pub score: f32,
}

/// Configuration for reranking
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    /// Hard latency budget; on overrun the input order is kept
    pub budget: Duration,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(300),
        }
    }
}

/// Outcome of a rerank call
#[derive(Debug, Clone)]
pub enum RerankOutcome {
    /// Candidates re-scored and re-ordered
    Reranked(Vec<RerankedHit>),
    /// Budget overrun or model failure; caller keeps the fused order
    KeptInputOrder { reason: String },
}

/// Cross-encoder reranker with term-overlap fallback
pub struct Reranker {
    config: RerankerConfig,
    #[cfg(feature = "embeddings")]
    cross_encoder: Option<TextRerank>,
}

impl Default for Reranker {
    fn default() -> Self {
        Self::new(RerankerConfig::default())
    }
}

impl Reranker {
    /// Create a reranker. The cross-encoder model is NOT loaded here; call
    /// `init_cross_encoder()` during startup, never in tests or hot paths.
    pub fn new(config: RerankerConfig) -> Self {
        Self {
            config,
            #[cfg(feature = "embeddings")]
            cross_encoder: None,
        }
    }

    /// Load the cross-encoder model (downloads on first run).
    #[cfg(feature = "embeddings")]
    pub fn init_cross_encoder(&mut self) {
        if self.cross_encoder.is_some() {
            return;
        }

        let options = RerankInitOptions::new(RerankerModel::JINARerankerV1TurboEn)
            .with_show_download_progress(true);

        match TextRerank::try_new(options) {
            Ok(model) => {
                tracing::info!("cross-encoder reranker loaded");
                self.cross_encoder = Some(model);
            }
            Err(e) => {
                tracing::warn!("cross-encoder unavailable, using term-overlap fallback: {e}");
            }
        }
    }

    pub fn has_cross_encoder(&self) -> bool {
        #[cfg(feature = "embeddings")]
        {
            self.cross_encoder.is_some()
        }
        #[cfg(not(feature = "embeddings"))]
        {
            false
        }
    }

    /// Re-score `documents` against `query` within the latency budget.
    ///
    /// Returns `KeptInputOrder` instead of an error on overrun so the
    /// caller's fused ranking always survives.
    pub fn rerank(&mut self, query: &str, documents: &[String]) -> Result<RerankOutcome, RerankerError> {
        if query.is_empty() {
            return Err(RerankerError::InvalidInput("query cannot be empty".to_string()));
        }
        if documents.is_empty() {
            return Ok(RerankOutcome::Reranked(vec![]));
        }

        let started = Instant::now();

        #[cfg(feature = "embeddings")]
        if let Some(ref mut model) = self.cross_encoder {
            let refs: Vec<&str> = documents.iter().map(|d| d.as_str()).collect();
            match model.rerank(query, &refs, false, None) {
                Ok(results) => {
                    if started.elapsed() > self.config.budget {
                        return Ok(RerankOutcome::KeptInputOrder {
                            reason: format!(
                                "rerank took {:?}, budget {:?}",
                                started.elapsed(),
                                self.config.budget
                            ),
                        });
                    }
                    let mut hits: Vec<RerankedHit> = results
                        .into_iter()
                        .map(|r| RerankedHit {
                            index: r.index,
                            score: r.score,
                        })
                        .collect();
                    hits.sort_by(|a, b| {
                        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                    });
                    return Ok(RerankOutcome::Reranked(hits));
                }
                Err(e) => {
                    tracing::warn!("cross-encoder rerank failed, falling back: {e}");
                }
            }
        }

        // Term-overlap fallback
        let mut hits: Vec<RerankedHit> = documents
            .iter()
            .enumerate()
            .map(|(index, doc)| RerankedHit {
                index,
                score: term_overlap_score(query, doc),
            })
            .collect();

        if started.elapsed() > self.config.budget {
            return Ok(RerankOutcome::KeptInputOrder {
                reason: format!(
                    "rerank took {:?}, budget {:?}",
                    started.elapsed(),
                    self.config.budget
                ),
            });
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(RerankOutcome::Reranked(hits))
    }
}

/// BM25-inspired term overlap score, used when no cross-encoder is loaded.
fn term_overlap_score(query: &str, document: &str) -> f32 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f32;

    if doc_len == 0.0 || query_terms.is_empty() {
        return 0.0;
    }

    let k1 = 1.2_f32;
    let b = 0.75_f32;
    let avg_doc_len = 500.0_f32;

    let mut score = 0.0;
    for term in &query_terms {
        let tf = doc_lower.matches(term).count() as f32;
        if tf > 0.0 {
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
            score += numerator / denominator;
        }
    }

    score / query_terms.len() as f32
}
