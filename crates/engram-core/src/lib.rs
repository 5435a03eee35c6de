//! # Engram Core
//!
//! Project-scoped long-term memory engine for interactive coding
//! assistants:
//!
//! - **Observations**: distilled memory records with typed relations
//! - **Hybrid Search**: HNSW vector search + FTS5 keyword search fused
//!   with weighted reciprocal ranks, with an optional cross-encoder
//!   rerank stage
//! - **Consolidation**: scheduled decay, association discovery, and
//!   opt-in forgetting
//! - **Session Indexing**: incremental parsing of the host assistant's
//!   conversation logs
//! - **Privacy**: secret-shaped text is redacted before anything is
//!   stored or embedded
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use engram_core::{ObservationDraft, ObservationType, Store};
//!
//! let store = Store::open(std::path::Path::new("engram.db"), 10, 256)?;
//! let draft = ObservationDraft::new(
//!     "api_1a2b3c",
//!     ObservationType::Decision,
//!     "adopt Postgres for the event store",
//! );
//! let observation = store.insert_observation(&draft, Some(&embedding), "model")?;
//! ```
//!
//! ## Feature Flags
//!
//! - `embeddings` (default): local embedding + reranker models via fastembed
//! - `vector-search` (default): HNSW vector index via USearch
//! - `bundled-sqlite` (default): compile SQLite into the binary

#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod config;
pub mod consolidation;
pub mod distill;
pub mod identity;
pub mod model;
pub mod privacy;
pub mod scoring;
pub mod search;
pub mod sessions;
pub mod storage;

pub mod embeddings;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

pub use config::{
    Config, ConfigError, ConsolidationConfig, EmbeddingConfig, EmbeddingProviderKind,
    RerankConfig, SearchConfig,
};

pub use model::{
    MemoryPattern, MemoryStats, Observation, ObservationDraft, ObservationFilter,
    ObservationPatch, ObservationSource, ObservationType, Provenance, Relation, RelationType,
    Session, SessionKey, SessionMessage,
};

pub use storage::{CycleRecord, Store, StoreError, TraversalHit};

pub use search::{
    sanitize_fts5_query, RankingExplanation, Reranker, RerankerConfig, SearchError, SearchHit,
    SearchManager, SearchMode, SearchOptions,
};

pub use embeddings::{
    cosine_similarity, provider_from_config, EmbeddingError, EmbeddingProvider,
};

pub use consolidation::{Consolidator, CycleKind, CycleOutcome, Scheduler};

pub use sessions::{ScanReport, SessionIndexer};

pub use distill::{distill, HookEvent};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        Config, Consolidator, CycleKind, EmbeddingProvider, MemoryStats, Observation,
        ObservationDraft, ObservationFilter, ObservationType, Relation, RelationType,
        SearchManager, SearchOptions, Store, StoreError,
    };
}
