//! HNSW vector index
//!
//! Cosine-similarity nearest-neighbor over the observation embeddings,
//! keyed by observation row id. USearch requires `reserve()` before `add()`.
//!
//! Project filtering is applied as a post-filter with over-fetch: the index
//! pulls `OVER_FETCH`× the requested k and drops entries from other
//! projects, bounding the recall loss. Archived observations have no vector
//! entry at all, so the archived filter is structural.

use std::collections::HashMap;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

/// HNSW connectivity parameter (higher = better recall, more memory)
pub const DEFAULT_CONNECTIVITY: usize = 16;

/// HNSW expansion factor for index building
pub const DEFAULT_EXPANSION_ADD: usize = 128;

/// HNSW expansion factor for search
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

/// Over-fetch multiplier when post-filtering by project
pub const OVER_FETCH: usize = 4;

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum VectorIndexError {
    #[error("index creation failed: {0}")]
    Creation(String),
    #[error("failed to add vector: {0}")]
    Add(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

/// Result type for vector index operations
pub type Result<T> = std::result::Result<T, VectorIndexError>;

/// Configuration for the vector index
#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
}

impl VectorIndexConfig {
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self {
            dimensions,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
        }
    }
}

/// HNSW vector index over observation embeddings
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    /// Observation id → owning project, for post-filtered queries
    projects: HashMap<i64, String>,
}

impl VectorIndex {
    pub fn new(config: VectorIndexConfig) -> Result<Self> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: MetricKind::Cos,
            quantization: ScalarKind::I8,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };

        let index = Index::new(&options).map_err(|e| VectorIndexError::Creation(e.to_string()))?;

        Ok(Self {
            index,
            config,
            projects: HashMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    pub fn contains(&self, id: i64) -> bool {
        self.projects.contains_key(&id)
    }

    /// Insert or replace the vector for an observation.
    pub fn upsert(&mut self, id: i64, project: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != self.config.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }

        let key = id as u64;
        if self.projects.contains_key(&id) {
            self.index
                .remove(key)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
        }

        // usearch segfaults on add() past capacity; grow ahead of need
        let capacity = self.index.capacity();
        if self.index.size() >= capacity {
            let new_capacity = std::cmp::max(capacity * 2, 64);
            self.index
                .reserve(new_capacity)
                .map_err(|e| VectorIndexError::Creation(format!("reserve failed: {}", e)))?;
        }

        self.index
            .add(key, vector)
            .map_err(|e| VectorIndexError::Add(e.to_string()))?;
        self.projects.insert(id, project.to_string());
        Ok(())
    }

    /// Remove the vector for an observation. Returns whether it existed.
    pub fn delete(&mut self, id: i64) -> Result<bool> {
        if self.projects.remove(&id).is_some() {
            self.index
                .remove(id as u64)
                .map_err(|e| VectorIndexError::Add(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Top-k nearest neighbors by cosine similarity, optionally restricted
    /// to one project. Returns `(id, similarity)` pairs, best first.
    pub fn query(&self, vector: &[f32], k: usize, project: Option<&str>) -> Result<Vec<(i64, f32)>> {
        if vector.len() != self.config.dimensions {
            return Err(VectorIndexError::InvalidDimensions {
                expected: self.config.dimensions,
                got: vector.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(vec![]);
        }

        let fetch = if project.is_some() { k * OVER_FETCH } else { k };
        let results = self
            .index
            .search(vector, fetch)
            .map_err(|e| VectorIndexError::Search(e.to_string()))?;

        let mut hits = Vec::with_capacity(k);
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            let id = *key as i64;
            let Some(owner) = self.projects.get(&id) else {
                continue;
            };
            if let Some(wanted) = project {
                if owner != wanted {
                    continue;
                }
            }
            // Cosine distance → similarity
            hits.push((id, 1.0 - distance));
            if hits.len() >= k {
                break;
            }
        }

        Ok(hits)
    }

}
