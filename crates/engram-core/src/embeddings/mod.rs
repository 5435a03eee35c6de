//! Semantic embeddings
//!
//! The embedder is a pure function `embed(text) -> vec[D]` behind the
//! [`EmbeddingProvider`] trait. Two backends exist: a local quantized
//! transformer (fastembed, `embeddings` feature) and a remote HTTP API.
//! Everything else depends only on the trait contract and the configured
//! dimension.

#[cfg(feature = "embeddings")]
pub mod local;
pub mod remote;

use crate::config::{EmbeddingConfig, EmbeddingProviderKind};
use std::sync::Arc;

/// Embedding error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EmbeddingError {
    /// The backing model or endpoint is unavailable
    #[error("embedding unavailable: {0}")]
    Unavailable(String),
    /// Generation failed for this input
    #[error("embedding failed: {0}")]
    Failed(String),
    /// Empty or otherwise unusable input
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for embedding operations
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Deterministic text → fixed-dimensional vector
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text. Deterministic for a given (model, text).
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Vector dimension D
    fn dimensions(&self) -> usize;

    /// Model identifier, for stats and embedding provenance
    fn model_name(&self) -> &str;

    /// Embed several texts. Backends with batch inference override this.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Build the provider selected by configuration.
pub fn provider_from_config(cfg: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match cfg.provider {
        EmbeddingProviderKind::Local => {
            #[cfg(feature = "embeddings")]
            {
                Ok(Arc::new(local::LocalEmbedder::new(cfg.dimensions)))
            }
            #[cfg(not(feature = "embeddings"))]
            {
                Err(EmbeddingError::Unavailable(
                    "local embeddings require the `embeddings` feature".to_string(),
                ))
            }
        }
        EmbeddingProviderKind::Remote => {
            let base_url = cfg.base_url.clone().ok_or_else(|| {
                EmbeddingError::Unavailable(
                    "EMBEDDING_BASE_URL is required for the remote provider".to_string(),
                )
            })?;
            Ok(Arc::new(remote::RemoteEmbedder::new(
                base_url,
                cfg.api_key.clone(),
                cfg.model_name
                    .clone()
                    .unwrap_or_else(|| remote::DEFAULT_REMOTE_MODEL.to_string()),
                cfg.dimensions,
            )?))
        }
    }
}

// ============================================================================
// VECTOR HELPERS
// ============================================================================

/// Truncate to `dims` and L2-normalize.
///
/// Models with Matryoshka representation learning make the first N
/// dimensions a valid N-dim embedding; for other models this is a plain
/// normalized truncation and stays internally consistent.
pub fn truncate_normalize(mut vector: Vec<f32>, dims: usize) -> Vec<f32> {
    if vector.len() > dims {
        vector.truncate(dims);
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

/// Cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Serialize a vector for blob storage
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a vector from blob storage
pub fn vector_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect(),
    )
}
