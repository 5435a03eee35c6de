//! E2E test harness
//!
//! A temp-directory store plus a deterministic embedder so full retrieval
//! flows run without model downloads.

use std::sync::Arc;
use tempfile::TempDir;

use engram_core::{
    Config, EmbeddingError, EmbeddingProvider, Observation, ObservationDraft, ObservationType,
    RerankConfig, SearchConfig, SearchManager, Store,
};

/// Embedding dimension used across the harness
pub const DIMS: usize = 16;

/// Deterministic token-hash embedder: cosine similarity tracks token
/// overlap, which is enough to exercise every retrieval path.
pub struct TokenHashEmbedder;

impl EmbeddingProvider for TokenHashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }
        let mut vector = vec![0.0_f32; DIMS];
        for token in text.to_lowercase().split_whitespace() {
            let mut hash = 5381_u64;
            for byte in token.bytes() {
                hash = hash.wrapping_mul(33).wrapping_add(byte as u64);
            }
            vector[(hash % DIMS as u64) as usize] += 1.0;
        }
        Ok(engram_core::embeddings::truncate_normalize(vector, DIMS))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn model_name(&self) -> &str {
        "token-hash-test"
    }
}

/// One self-contained memory stack on a temp directory
pub struct TestMemory {
    pub dir: TempDir,
    pub store: Arc<Store>,
    pub search: Arc<SearchManager>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl TestMemory {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let store =
            Arc::new(Store::open(&dir.path().join("engram.db"), 4, DIMS).expect("store opens"));
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(TokenHashEmbedder);
        let search = Arc::new(SearchManager::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            SearchConfig::default(),
            RerankConfig {
                enabled: false,
                ..RerankConfig::default()
            },
        ));
        Self {
            dir,
            store,
            search,
            embedder,
        }
    }

    /// Config pointing at this harness database
    pub fn config(&self) -> Config {
        let mut config = Config::for_database(self.dir.path().join("engram.db"));
        config.embedding.dimensions = DIMS;
        config
    }

    /// Insert an observation whose embedding is derived from its own text.
    pub fn insert(
        &self,
        project: &str,
        kind: ObservationType,
        title: &str,
        narrative: &str,
    ) -> Observation {
        let mut draft = ObservationDraft::new(project, kind, title);
        draft.narrative = narrative.to_string();
        let vector = self.embedder.embed(&draft.index_text()).expect("embed");
        self.store
            .insert_observation(&draft, Some(&vector), self.embedder.model_name())
            .expect("insert")
    }
}

impl Default for TestMemory {
    fn default() -> Self {
        Self::new()
    }
}
