//! SQLite store
//!
//! One serialized writer connection, a round-robin pool of readers
//! (`DATABASE_MAX_CONNS`), FTS5 kept in sync by triggers inside the row
//! transaction, and the in-process vector index updated under the writer
//! lock so a committed write is visible in all three places or none.
//! The vector index is rebuilt from the embedding blobs at startup, which
//! doubles as the repair path for any detected divergence.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::Config;
use crate::embeddings::{vector_from_bytes, vector_to_bytes, truncate_normalize};
use crate::model::{
    MemoryPattern, MemoryStats, Observation, ObservationDraft, ObservationFilter,
    ObservationPatch, ObservationType, Provenance, Relation, RelationType, Session, SessionKey,
    SessionMessage,
};
use crate::scoring;
use crate::search::sanitize_fts5_query;

#[cfg(feature = "vector-search")]
use crate::search::{VectorIndex, VectorIndexConfig};

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Store error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Observation not found
    #[error("observation not found: {0}")]
    NotFound(i64),
    /// Rejected input
    #[error("validation: {0}")]
    Validation(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Startup / initialization error
    #[error("initialization error: {0}")]
    Init(String),
    /// Vector index error
    #[error("vector index error: {0}")]
    Vector(String),
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;

// ============================================================================
// RECORD TYPES
// ============================================================================

/// One consolidation cycle run, as recorded in the maintenance log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleRecord {
    #[serde(default)]
    pub id: i64,
    pub cycle: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub scanned: i64,
    pub updated: i64,
    pub emitted: i64,
    pub archived: i64,
    pub errors: Vec<String>,
}

/// A relation reached by graph traversal, with its BFS depth
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraversalHit {
    pub relation: Relation,
    pub depth: u32,
}

// ============================================================================
// READER POOL
// ============================================================================

/// Round-robin pool of read-only connections
struct ReaderPool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReaderPool {
    fn get(&self) -> Result<MutexGuard<'_, Connection>> {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        self.conns[i]
            .lock()
            .map_err(|_| StoreError::Init("reader lock poisoned".into()))
    }
}

// ============================================================================
// STORE
// ============================================================================

const OBS_COLUMNS: &str = "id, project, session_id, workstation, kind, title, subtitle, \
     narrative, facts, tags, files, concepts, importance, confidence, relevance, \
     access_count, archived, superseded_by, embedding_pending, created_at, last_accessed";

/// SQLite-backed store with integrated full-text and vector indexes
///
/// All methods take `&self`; interior mutability makes the store
/// `Send + Sync` so callers share it behind a plain `Arc`.
pub struct Store {
    writer: Mutex<Connection>,
    readers: ReaderPool,
    #[cfg(feature = "vector-search")]
    vectors: Mutex<VectorIndex>,
    dimensions: usize,
    path: PathBuf,
}

impl Store {
    /// Apply PRAGMAs shared by every connection
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;
             PRAGMA mmap_size = 268435456;",
        )?;
        Ok(())
    }

    /// Open (or create) the store at the configured database path.
    pub fn open_with_config(cfg: &Config) -> Result<Self> {
        Self::open(&cfg.database_path, cfg.database_max_conns, cfg.embedding.dimensions)
    }

    /// Open (or create) the store.
    pub fn open(path: &Path, max_conns: usize, dimensions: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let writer_conn = Connection::open(path)?;
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_count = max_conns.max(1);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let conn = Connection::open(path)?;
            Self::configure_connection(&conn)?;
            readers.push(Mutex::new(conn));
        }

        #[cfg(feature = "vector-search")]
        let vectors = VectorIndex::new(VectorIndexConfig::with_dimensions(dimensions))
            .map_err(|e| StoreError::Init(format!("vector index: {}", e)))?;

        let store = Self {
            writer: Mutex::new(writer_conn),
            readers: ReaderPool {
                conns: readers,
                next: AtomicUsize::new(0),
            },
            #[cfg(feature = "vector-search")]
            vectors: Mutex::new(vectors),
            dimensions,
            path: path.to_path_buf(),
        };

        #[cfg(feature = "vector-search")]
        store.rebuild_vector_index()?;

        Ok(store)
    }

    /// Database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured embedding dimension
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn write_lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| StoreError::Init("writer lock poisoned".into()))
    }

    #[cfg(feature = "vector-search")]
    fn vector_lock(&self) -> Result<MutexGuard<'_, VectorIndex>> {
        self.vectors
            .lock()
            .map_err(|_| StoreError::Init("vector index lock poisoned".into()))
    }

    // ========================================================================
    // VECTOR INDEX LIFECYCLE
    // ========================================================================

    /// Load every stored embedding of a non-archived observation into the
    /// vector index. Also the repair path for index divergence.
    #[cfg(feature = "vector-search")]
    pub fn rebuild_vector_index(&self) -> Result<usize> {
        let rows: Vec<(i64, String, Vec<u8>)> = {
            let reader = self.readers.get()?;
            let mut stmt = reader.prepare(
                "SELECT e.observation_id, o.project, e.embedding
                 FROM observation_embeddings e
                 JOIN observations o ON o.id = e.observation_id
                 WHERE o.archived = 0",
            )?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.filter_map(|r| r.ok()).collect()
        };

        let mut index = VectorIndex::new(VectorIndexConfig::with_dimensions(self.dimensions))
            .map_err(|e| StoreError::Vector(e.to_string()))?;

        let mut loaded = 0usize;
        for (id, project, bytes) in rows {
            let Some(vector) = vector_from_bytes(&bytes) else {
                tracing::warn!(observation = id, "corrupt embedding blob, skipping");
                continue;
            };
            // Dimension drift after a model change: truncate-normalize keeps
            // old vectors queryable until the pending sweep refreshes them
            let vector = if vector.len() != self.dimensions {
                truncate_normalize(vector, self.dimensions)
            } else {
                vector
            };
            if vector.len() != self.dimensions {
                continue;
            }
            if let Err(e) = index.upsert(id, &project, &vector) {
                tracing::warn!(observation = id, "failed to index embedding: {}", e);
                continue;
            }
            loaded += 1;
        }

        *self.vector_lock()? = index;
        Ok(loaded)
    }

    /// Verify row-store / vector-index parity and repair by re-indexing
    /// from rows when they diverge. Returns whether a repair ran.
    #[cfg(feature = "vector-search")]
    pub fn audit_vector_index(&self) -> Result<bool> {
        let expected: usize = {
            let reader = self.readers.get()?;
            reader.query_row(
                "SELECT COUNT(*) FROM observation_embeddings e
                 JOIN observations o ON o.id = e.observation_id
                 WHERE o.archived = 0",
                [],
                |row| row.get::<_, i64>(0),
            )? as usize
        };

        let actual = self.vector_lock()?.len();
        if expected == actual {
            return Ok(false);
        }

        tracing::warn!(
            expected,
            actual,
            "vector index divergence detected, re-indexing from rows"
        );
        self.rebuild_vector_index()?;
        Ok(true)
    }

    /// Nearest neighbors over the project's embeddings.
    #[cfg(feature = "vector-search")]
    pub fn vector_query(
        &self,
        vector: &[f32],
        k: usize,
        project: Option<&str>,
    ) -> Result<Vec<(i64, f32)>> {
        self.vector_lock()?
            .query(vector, k, project)
            .map_err(|e| StoreError::Vector(e.to_string()))
    }

    // ========================================================================
    // OBSERVATION CRUD
    // ========================================================================

    /// Insert a new observation.
    ///
    /// `embedding` is `None` when the embedder was unavailable; the row is
    /// stored with `embedding_pending` set and picked up by the retry sweep.
    pub fn insert_observation(
        &self,
        draft: &ObservationDraft,
        embedding: Option<&[f32]>,
        model: &str,
    ) -> Result<Observation> {
        if draft.title.trim().is_empty() {
            return Err(StoreError::Validation("title cannot be empty".into()));
        }
        if draft.project.trim().is_empty() {
            return Err(StoreError::Validation("project cannot be empty".into()));
        }
        if let Some(vec) = embedding {
            if vec.len() != self.dimensions {
                return Err(StoreError::Validation(format!(
                    "embedding dimension {} != {}",
                    vec.len(),
                    self.dimensions
                )));
            }
        }

        let now = Utc::now();
        let importance = scoring::importance(
            draft.kind,
            draft.narrative.len(),
            draft.facts.len(),
            draft.boost,
        );
        let confidence = scoring::initial_confidence(draft.source);
        let relevance = scoring::relevance(importance, confidence, 0.0, 0.0, 0, 0);
        let pending = embedding.is_none();

        let id = {
            let mut writer = self.write_lock()?;
            let tx = writer.transaction()?;

            tx.execute(
                "INSERT INTO observations (
                    project, session_id, workstation, kind, title, subtitle, narrative,
                    facts, tags, files, concepts, importance, confidence, relevance,
                    access_count, archived, superseded_by, embedding_pending,
                    created_at, last_accessed
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                           0, 0, NULL, ?15, ?16, ?17)",
                params![
                    draft.project,
                    draft.session_id,
                    draft.workstation,
                    draft.kind.as_str(),
                    draft.title,
                    draft.subtitle,
                    draft.narrative,
                    json(&draft.facts),
                    json(&draft.tags),
                    json(&draft.files),
                    json(&draft.concepts),
                    importance,
                    confidence,
                    relevance,
                    pending as i64,
                    now,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();

            if let Some(vec) = embedding {
                tx.execute(
                    "INSERT INTO observation_embeddings
                        (observation_id, embedding, dimensions, model, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![id, vector_to_bytes(vec), vec.len() as i64, model, now],
                )?;
            }

            tx.commit()?;

            #[cfg(feature = "vector-search")]
            if let Some(vec) = embedding {
                self.vector_lock()?
                    .upsert(id, &draft.project, vec)
                    .map_err(|e| StoreError::Vector(e.to_string()))?;
            }

            id
        };

        self.get_by_id(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Restore a full observation record, preserving its timestamps and
    /// derived scores. Used by backup restore and data import; a new row id
    /// is assigned.
    pub fn restore_observation(
        &self,
        obs: &Observation,
        embedding: Option<&[f32]>,
        model: &str,
    ) -> Result<i64> {
        if let Some(vec) = embedding {
            if vec.len() != self.dimensions {
                return Err(StoreError::Validation(format!(
                    "embedding dimension {} != {}",
                    vec.len(),
                    self.dimensions
                )));
            }
        }

        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        tx.execute(
            "INSERT INTO observations (
                project, session_id, workstation, kind, title, subtitle, narrative,
                facts, tags, files, concepts, importance, confidence, relevance,
                access_count, archived, superseded_by, embedding_pending,
                created_at, last_accessed
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                       ?15, ?16, ?17, ?18, ?19, ?20)",
            params![
                obs.project,
                obs.session_id,
                obs.workstation,
                obs.kind.as_str(),
                obs.title,
                obs.subtitle,
                obs.narrative,
                json(&obs.facts),
                json(&obs.tags),
                json(&obs.files),
                json(&obs.concepts),
                obs.importance,
                obs.confidence,
                obs.relevance,
                obs.access_count,
                obs.archived as i64,
                obs.superseded_by,
                (embedding.is_none() && !obs.archived) as i64,
                obs.created_at,
                obs.last_accessed,
            ],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(vec) = embedding {
            tx.execute(
                "INSERT INTO observation_embeddings
                    (observation_id, embedding, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, vector_to_bytes(vec), vec.len() as i64, model, obs.created_at],
            )?;
        }
        tx.commit()?;

        #[cfg(feature = "vector-search")]
        if let Some(vec) = embedding {
            if !obs.archived {
                self.vector_lock()?
                    .upsert(id, &obs.project, vec)
                    .map_err(|e| StoreError::Vector(e.to_string()))?;
            }
        }

        Ok(id)
    }

    /// Fetch one observation by id. Archived rows stay readable here.
    pub fn get_by_id(&self, id: i64) -> Result<Option<Observation>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {OBS_COLUMNS} FROM observations WHERE id = ?1"
        ))?;
        let obs = stmt.query_row(params![id], observation_from_row).optional()?;
        Ok(obs)
    }

    /// Fetch several observations, preserving the input order.
    pub fn batch_get(&self, ids: &[i64]) -> Result<Vec<Observation>> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            "SELECT {OBS_COLUMNS} FROM observations WHERE id IN ({placeholders})"
        );

        let mut by_id: HashMap<i64, Observation> = HashMap::with_capacity(ids.len());
        {
            let reader = self.readers.get()?;
            let mut stmt = reader.prepare(&sql)?;
            let sql_params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(sql_params.as_slice(), observation_from_row)?;
            for row in rows.flatten() {
                by_id.insert(row.id, row);
            }
        }

        Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
    }

    /// Apply a typed patch to one observation.
    ///
    /// When the patch changes indexed text and no fresh embedding is
    /// supplied, the row is flagged `embedding_pending` and the stale vector
    /// stays queryable until the sweep refreshes it.
    pub fn update_observation(
        &self,
        id: i64,
        patch: &ObservationPatch,
        new_embedding: Option<&[f32]>,
    ) -> Result<Observation> {
        let current = self.get_by_id(id)?.ok_or(StoreError::NotFound(id))?;

        let title = patch.title.clone().unwrap_or(current.title);
        let subtitle = patch.subtitle.clone().unwrap_or(current.subtitle);
        let narrative = patch.narrative.clone().unwrap_or(current.narrative);
        let facts = patch.facts.clone().unwrap_or(current.facts);
        let tags = patch.tags.clone().unwrap_or(current.tags);
        let files = patch.files.clone().unwrap_or(current.files);
        let concepts = patch.concepts.clone().unwrap_or(current.concepts);
        let importance = patch
            .importance
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(current.importance);
        let confidence = patch
            .confidence
            .map(|v| v.clamp(0.0, 1.0))
            .unwrap_or(current.confidence);

        let pending = if new_embedding.is_some() {
            false
        } else {
            current.embedding_pending || patch.changes_text()
        };

        {
            let mut writer = self.write_lock()?;
            let tx = writer.transaction()?;
            let now = Utc::now();

            tx.execute(
                "UPDATE observations SET
                    title = ?1, subtitle = ?2, narrative = ?3, facts = ?4, tags = ?5,
                    files = ?6, concepts = ?7, importance = ?8, confidence = ?9,
                    embedding_pending = ?10
                 WHERE id = ?11",
                params![
                    title,
                    subtitle,
                    narrative,
                    json(&facts),
                    json(&tags),
                    json(&files),
                    json(&concepts),
                    importance,
                    confidence,
                    pending as i64,
                    id,
                ],
            )?;

            if let Some(vec) = new_embedding {
                tx.execute(
                    "INSERT INTO observation_embeddings
                        (observation_id, embedding, dimensions, model, created_at)
                     VALUES (?1, ?2, ?3, '', ?4)
                     ON CONFLICT(observation_id) DO UPDATE SET
                        embedding = excluded.embedding,
                        dimensions = excluded.dimensions,
                        created_at = excluded.created_at",
                    params![id, vector_to_bytes(vec), vec.len() as i64, now],
                )?;
            }

            tx.commit()?;

            #[cfg(feature = "vector-search")]
            if let Some(vec) = new_embedding {
                if !current.archived {
                    self.vector_lock()?
                        .upsert(id, &current.project, vec)
                        .map_err(|e| StoreError::Vector(e.to_string()))?;
                }
            }
        }

        self.get_by_id(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Apply the non-text parts of a patch to many observations at once.
    pub fn bulk_update(&self, ids: &[i64], patch: &ObservationPatch) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        if patch.changes_text() {
            return Err(StoreError::Validation(
                "bulk updates cannot change indexed text".into(),
            ));
        }

        let mut updated = 0;
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        for id in ids {
            let mut sets: Vec<String> = vec![];
            let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![];
            if let Some(tags) = &patch.tags {
                sets.push(format!("tags = ?{}", sql_params.len() + 1));
                sql_params.push(Box::new(json(tags)));
            }
            if let Some(files) = &patch.files {
                sets.push(format!("files = ?{}", sql_params.len() + 1));
                sql_params.push(Box::new(json(files)));
            }
            if let Some(concepts) = &patch.concepts {
                sets.push(format!("concepts = ?{}", sql_params.len() + 1));
                sql_params.push(Box::new(json(concepts)));
            }
            if let Some(importance) = patch.importance {
                sets.push(format!("importance = ?{}", sql_params.len() + 1));
                sql_params.push(Box::new(importance.clamp(0.0, 1.0)));
            }
            if let Some(confidence) = patch.confidence {
                sets.push(format!("confidence = ?{}", sql_params.len() + 1));
                sql_params.push(Box::new(confidence.clamp(0.0, 1.0)));
            }
            if sets.is_empty() {
                continue;
            }
            let sql = format!(
                "UPDATE observations SET {} WHERE id = ?{}",
                sets.join(", "),
                sql_params.len() + 1
            );
            sql_params.push(Box::new(*id));
            let refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|p| p.as_ref()).collect();
            updated += tx.execute(&sql, refs.as_slice())?;
        }
        tx.commit()?;
        Ok(updated)
    }

    /// Archive an observation: excluded from default search, vector entry
    /// removed, row and embedding blob kept.
    pub fn archive(&self, id: i64) -> Result<Observation> {
        {
            let writer = self.write_lock()?;
            let changed = writer.execute(
                "UPDATE observations SET archived = 1 WHERE id = ?1",
                params![id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(id));
            }

            #[cfg(feature = "vector-search")]
            self.vector_lock()?
                .delete(id)
                .map_err(|e| StoreError::Vector(e.to_string()))?;
        }
        self.get_by_id(id)?.ok_or(StoreError::NotFound(id))
    }

    /// Bulk delete: removes the rows plus every index entry.
    pub fn delete(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let deleted = {
            let mut writer = self.write_lock()?;
            let tx = writer.transaction()?;
            let sql_params: Vec<&dyn rusqlite::ToSql> =
                ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
            let deleted = tx.execute(
                &format!("DELETE FROM observations WHERE id IN ({placeholders})"),
                sql_params.as_slice(),
            )?;
            tx.commit()?;

            #[cfg(feature = "vector-search")]
            {
                let mut index = self.vector_lock()?;
                for id in ids {
                    index.delete(*id).map_err(|e| StoreError::Vector(e.to_string()))?;
                }
            }

            deleted
        };
        Ok(deleted)
    }

    /// Mark `old_id` superseded by `new_id`.
    ///
    /// Rejects cross-project pairs, double supersession, and anything that
    /// would close a cycle in the supersession chain.
    pub fn supersede(&self, old_id: i64, new_id: i64) -> Result<()> {
        if old_id == new_id {
            return Err(StoreError::Validation("observation cannot supersede itself".into()));
        }
        let old = self.get_by_id(old_id)?.ok_or(StoreError::NotFound(old_id))?;
        let new = self.get_by_id(new_id)?.ok_or(StoreError::NotFound(new_id))?;
        if old.project != new.project {
            return Err(StoreError::Validation("cross-project supersede rejected".into()));
        }
        if old.superseded_by.is_some() {
            return Err(StoreError::Validation(format!(
                "observation {} is already superseded",
                old_id
            )));
        }

        // Walk the chain upward from the new head; reaching old_id would
        // close a cycle
        let mut cursor = new.superseded_by;
        let mut hops = 0;
        while let Some(next) = cursor {
            if next == old_id {
                return Err(StoreError::Validation("supersede would create a cycle".into()));
            }
            hops += 1;
            if hops > 1000 {
                return Err(StoreError::Validation("supersession chain too deep".into()));
            }
            cursor = self.get_by_id(next)?.and_then(|o| o.superseded_by);
        }

        {
            let writer = self.write_lock()?;
            writer.execute(
                "UPDATE observations SET superseded_by = ?1 WHERE id = ?2",
                params![new_id, old_id],
            )?;
        }

        self.insert_relation(&Relation::new(new_id, old_id, RelationType::Supersedes, 1.0))?;
        Ok(())
    }

    /// Merge observations into a target: facts, tags, files, and concepts
    /// fold into the target, sources are archived and superseded.
    pub fn merge(&self, source_ids: &[i64], target_id: i64) -> Result<Observation> {
        let target = self.get_by_id(target_id)?.ok_or(StoreError::NotFound(target_id))?;

        let mut facts = target.facts.clone();
        let mut tags = target.tags.clone();
        let mut files = target.files.clone();
        let mut concepts = target.concepts.clone();

        for source_id in source_ids {
            if *source_id == target_id {
                continue;
            }
            let source = self.get_by_id(*source_id)?.ok_or(StoreError::NotFound(*source_id))?;
            if source.project != target.project {
                return Err(StoreError::Validation("cross-project merge rejected".into()));
            }
            for fact in source.facts {
                if !facts.contains(&fact) {
                    facts.push(fact);
                }
            }
            for tag in source.tags {
                if !tags.contains(&tag) {
                    tags.push(tag);
                }
            }
            for file in source.files {
                if !files.contains(&file) {
                    files.push(file);
                }
            }
            for concept in source.concepts {
                if !concepts.contains(&concept) {
                    concepts.push(concept);
                }
            }
        }

        let patch = ObservationPatch {
            facts: Some(facts),
            tags: Some(tags),
            files: Some(files),
            concepts: Some(concepts),
            ..Default::default()
        };
        let merged = self.update_observation(target_id, &patch, None)?;

        for source_id in source_ids {
            if *source_id == target_id {
                continue;
            }
            self.insert_relation(&Relation::new(
                target_id,
                *source_id,
                RelationType::Summarizes,
                1.0,
            ))?;
            {
                let writer = self.write_lock()?;
                writer.execute(
                    "UPDATE observations SET superseded_by = ?1 WHERE id = ?2 AND superseded_by IS NULL",
                    params![target_id, source_id],
                )?;
            }
            self.archive(*source_id)?;
        }

        Ok(merged)
    }

    /// List observations matching a structured filter, ordered by
    /// relevance, then type weight, then recency.
    pub fn list_by_filter(
        &self,
        filter: &ObservationFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Observation>> {
        let mut sql = format!(
            "SELECT {OBS_COLUMNS} FROM observations WHERE project = ?1"
        );
        if !filter.include_archived {
            sql.push_str(" AND archived = 0");
        }
        sql.push_str(
            " ORDER BY relevance DESC, \
              CASE kind \
                WHEN 'decision' THEN 8 WHEN 'discovery' THEN 7 WHEN 'pattern' THEN 6 \
                WHEN 'insight' THEN 5 WHEN 'error' THEN 4 WHEN 'change' THEN 3 \
                WHEN 'todo' THEN 2 ELSE 1 END DESC, \
              created_at DESC, id ASC",
        );

        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![filter.project], observation_from_row)?;

        let mut out = Vec::with_capacity(limit.min(256));
        let mut skipped = 0usize;
        for row in rows.flatten() {
            if !filter.matches(&row) {
                continue;
            }
            if skipped < offset {
                skipped += 1;
                continue;
            }
            out.push(row);
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Bump access counters for retrieved observations.
    pub fn touch_access(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let writer = self.write_lock()?;
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(Utc::now())];
        for id in ids {
            sql_params.push(Box::new(*id));
        }
        let refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|p| p.as_ref()).collect();
        writer.execute(
            &format!(
                "UPDATE observations
                 SET access_count = access_count + 1, last_accessed = ?1
                 WHERE id IN ({placeholders})"
            ),
            refs.as_slice(),
        )?;
        Ok(())
    }

    // ========================================================================
    // KEYWORD SEARCH
    // ========================================================================

    /// Lexical search over title + subtitle + narrative + facts.
    ///
    /// Accepts a web-style query (phrases, `-negation`, OR). Scores are
    /// BM25-derived, squashed into [0,1) with a saturating transform so
    /// they are comparable against cosine similarities without the top hit
    /// pinning to 1.0. Filters that the index cannot express (tags,
    /// concepts, file prefix) are left to the caller's hydration
    /// post-filter.
    pub fn keyword_search(
        &self,
        query: &str,
        filter: &ObservationFilter,
        limit: usize,
    ) -> Result<Vec<(i64, f32)>> {
        let sanitized = sanitize_fts5_query(query);
        if sanitized.is_empty() {
            return Ok(vec![]);
        }

        let mut sql = String::from(
            "SELECT o.id, rank FROM observations o
             JOIN observations_fts ON observations_fts.rowid = o.id
             WHERE observations_fts MATCH ?1 AND o.project = ?2",
        );
        let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(sanitized), Box::new(filter.project.clone())];

        if !filter.include_archived {
            sql.push_str(" AND o.archived = 0");
        }
        if !filter.kinds.is_empty() {
            let placeholders: Vec<String> = filter
                .kinds
                .iter()
                .map(|k| {
                    sql_params.push(Box::new(k.as_str().to_string()));
                    format!("?{}", sql_params.len())
                })
                .collect();
            sql.push_str(&format!(" AND o.kind IN ({})", placeholders.join(",")));
        }
        if let Some(after) = filter.created_after {
            sql_params.push(Box::new(after));
            sql.push_str(&format!(" AND o.created_at >= ?{}", sql_params.len()));
        }
        if let Some(before) = filter.created_before {
            sql_params.push(Box::new(before));
            sql.push_str(&format!(" AND o.created_at <= ?{}", sql_params.len()));
        }
        if let Some(min) = filter.min_importance {
            sql_params.push(Box::new(min));
            sql.push_str(&format!(" AND o.importance >= ?{}", sql_params.len()));
        }

        sql_params.push(Box::new(limit as i64));
        sql.push_str(&format!(" ORDER BY rank LIMIT ?{}", sql_params.len()));

        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|p| p.as_ref()).collect();
        let results: Vec<(i64, f32)> = stmt
            .query_map(refs.as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)? as f32))
            })?
            .filter_map(|r| r.ok())
            // bm25 rank is negative, lower is better
            .map(|(id, rank)| (id, (-rank).max(0.0)))
            .collect();

        // rank/(rank + K): monotone in BM25, bounded below 1.0
        const BM25_NORM_K: f32 = 4.0;
        Ok(results
            .into_iter()
            .map(|(id, s)| (id, s / (s + BM25_NORM_K)))
            .collect())
    }

    // ========================================================================
    // EMBEDDING MAINTENANCE
    // ========================================================================

    /// Rows whose embedding is pending, with the text to embed.
    pub fn pending_embeddings(&self, limit: usize) -> Result<Vec<(i64, String)>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {OBS_COLUMNS} FROM observations
             WHERE embedding_pending = 1 AND archived = 0
             ORDER BY id ASC LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit as i64], observation_from_row)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|obs| (obs.id, obs.index_text()))
            .collect())
    }

    /// Store a freshly produced embedding and clear the pending flag.
    pub fn attach_embedding(&self, id: i64, vector: &[f32], model: &str) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(StoreError::Validation(format!(
                "embedding dimension {} != {}",
                vector.len(),
                self.dimensions
            )));
        }
        let obs = self.get_by_id(id)?.ok_or(StoreError::NotFound(id))?;

        {
            let mut writer = self.write_lock()?;
            let tx = writer.transaction()?;
            tx.execute(
                "INSERT INTO observation_embeddings
                    (observation_id, embedding, dimensions, model, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(observation_id) DO UPDATE SET
                    embedding = excluded.embedding,
                    dimensions = excluded.dimensions,
                    model = excluded.model,
                    created_at = excluded.created_at",
                params![id, vector_to_bytes(vector), vector.len() as i64, model, Utc::now()],
            )?;
            tx.execute(
                "UPDATE observations SET embedding_pending = 0 WHERE id = ?1",
                params![id],
            )?;
            tx.commit()?;

            #[cfg(feature = "vector-search")]
            if !obs.archived {
                self.vector_lock()?
                    .upsert(id, &obs.project, vector)
                    .map_err(|e| StoreError::Vector(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Cached embeddings for a set of observations.
    pub fn embeddings_for(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<f32>>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT observation_id, embedding FROM observation_embeddings
             WHERE observation_id IN ({placeholders})"
        ))?;
        let sql_params: Vec<&dyn rusqlite::ToSql> =
            ids.iter().map(|i| i as &dyn rusqlite::ToSql).collect();
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;

        let mut out = HashMap::with_capacity(ids.len());
        for (id, bytes) in rows.flatten() {
            if let Some(vector) = vector_from_bytes(&bytes) {
                out.insert(id, vector);
            }
        }
        Ok(out)
    }

    // ========================================================================
    // RELATIONS
    // ========================================================================

    /// Insert or update a relation. Duplicate (from, to, kind) tuples are
    /// updated in place. Cross-project relations are rejected.
    ///
    /// Returns whether the relation was newly created. A new `contradicts`
    /// edge decays both endpoints' confidence once.
    pub fn insert_relation(&self, relation: &Relation) -> Result<bool> {
        if relation.from == relation.to {
            return Err(StoreError::Validation("self-relation rejected".into()));
        }
        let from = self
            .get_by_id(relation.from)?
            .ok_or(StoreError::NotFound(relation.from))?;
        let to = self
            .get_by_id(relation.to)?
            .ok_or(StoreError::NotFound(relation.to))?;
        if from.project != to.project {
            return Err(StoreError::Validation("cross-project relation rejected".into()));
        }

        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM relations WHERE from_id = ?1 AND to_id = ?2 AND kind = ?3",
                params![relation.from, relation.to, relation.kind.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        let is_new = existing.is_none();

        tx.execute(
            "INSERT INTO relations (from_id, to_id, kind, weight, provenance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(from_id, to_id, kind) DO UPDATE SET
                weight = excluded.weight,
                provenance = excluded.provenance",
            params![
                relation.from,
                relation.to,
                relation.kind.as_str(),
                relation.weight.clamp(0.0, 1.0),
                relation.provenance.as_str(),
                relation.created_at,
            ],
        )?;

        if is_new && relation.kind == RelationType::Contradicts {
            tx.execute(
                "UPDATE observations SET confidence = MAX(confidence * 0.9, 0.1)
                 WHERE id IN (?1, ?2)",
                params![relation.from, relation.to],
            )?;
        }

        tx.commit()?;
        Ok(is_new)
    }

    /// Relations touching an observation, both directions.
    pub fn relations_for(&self, id: i64) -> Result<Vec<Relation>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT from_id, to_id, kind, weight, provenance, created_at
             FROM relations WHERE from_id = ?1 OR to_id = ?1",
        )?;
        let rows = stmt.query_map(params![id], relation_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Relation degree per observation, for the relevance boost.
    pub fn relation_degrees(&self, ids: &[i64]) -> Result<HashMap<i64, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let reader = self.readers.get()?;
        let sql = format!(
            "SELECT id, COUNT(*) FROM (
                SELECT from_id AS id FROM relations WHERE from_id IN ({placeholders})
                UNION ALL
                SELECT to_id AS id FROM relations WHERE to_id IN ({placeholders})
             ) GROUP BY id"
        );
        let mut stmt = reader.prepare(&sql)?;
        let mut sql_params: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(ids.len() * 2);
        for id in ids {
            sql_params.push(id as &dyn rusqlite::ToSql);
        }
        for id in ids {
            sql_params.push(id as &dyn rusqlite::ToSql);
        }
        let rows = stmt.query_map(sql_params.as_slice(), |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        Ok(rows.flatten().collect())
    }

    /// Breadth-first traversal from `start` up to `depth` hops, restricted
    /// to `kinds` when non-empty, with visited-set cycle prevention.
    pub fn traverse_relations(
        &self,
        start: i64,
        depth: u32,
        kinds: &[RelationType],
    ) -> Result<Vec<TraversalHit>> {
        let depth = depth.clamp(1, 6);
        let mut visited: HashSet<i64> = HashSet::from([start]);
        let mut seen_edges: HashSet<(i64, i64, RelationType)> = HashSet::new();
        let mut frontier: VecDeque<(i64, u32)> = VecDeque::from([(start, 0)]);
        let mut hits = Vec::new();

        while let Some((node, dist)) = frontier.pop_front() {
            if dist >= depth {
                continue;
            }
            for relation in self.relations_for(node)? {
                if !kinds.is_empty() && !kinds.contains(&relation.kind) {
                    continue;
                }
                let edge = (relation.from, relation.to, relation.kind);
                if !seen_edges.insert(edge) {
                    continue;
                }
                let neighbor = if relation.from == node {
                    relation.to
                } else {
                    relation.from
                };
                hits.push(TraversalHit {
                    relation,
                    depth: dist + 1,
                });
                if visited.insert(neighbor) {
                    frontier.push_back((neighbor, dist + 1));
                }
            }
        }

        Ok(hits)
    }

    // ========================================================================
    // CONSOLIDATION SUPPORT
    // ========================================================================

    /// Stable-ordered page of non-archived observations after `after_id`.
    pub fn page_observations(&self, after_id: i64, limit: usize) -> Result<Vec<Observation>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {OBS_COLUMNS} FROM observations
             WHERE archived = 0 AND id > ?1
             ORDER BY id ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![after_id, limit as i64], observation_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Batched relevance write-back for the decay cycle.
    pub fn write_relevance(&self, updates: &[(i64, f64)]) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;
        {
            let mut stmt = tx.prepare("UPDATE observations SET relevance = ?1 WHERE id = ?2")?;
            for (id, relevance) in updates {
                stmt.execute(params![relevance, id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Sample up to `limit` observations of a project for the association
    /// cycle, biased toward recent and high-importance rows. Only rows with
    /// a cached embedding participate.
    pub fn sample_for_association(&self, project: &str, limit: usize) -> Result<Vec<Observation>> {
        let half = limit.div_ceil(2);
        let reader = self.readers.get()?;

        let mut sampled: Vec<Observation> = Vec::with_capacity(limit);
        let mut seen: HashSet<i64> = HashSet::new();

        for order in [
            "ORDER BY created_at DESC",
            "ORDER BY importance DESC, created_at DESC",
        ] {
            let sql = format!(
                "SELECT {OBS_COLUMNS} FROM observations
                 WHERE project = ?1 AND archived = 0 AND embedding_pending = 0
                   AND EXISTS (SELECT 1 FROM observation_embeddings e
                               WHERE e.observation_id = observations.id)
                 {order} LIMIT ?2"
            );
            let mut stmt = reader.prepare(&sql)?;
            let rows = stmt.query_map(params![project, half as i64], observation_from_row)?;
            for row in rows.flatten() {
                if seen.insert(row.id) {
                    sampled.push(row);
                }
            }
        }

        sampled.truncate(limit);
        Ok(sampled)
    }

    /// Non-archived observations below the forgetting threshold.
    pub fn forgetting_candidates(&self, threshold: f64) -> Result<Vec<Observation>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(&format!(
            "SELECT {OBS_COLUMNS} FROM observations
             WHERE archived = 0 AND relevance < ?1
             ORDER BY id ASC"
        ))?;
        let rows = stmt.query_map(params![threshold], observation_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Ids protected from forgetting by a `supersedes` / `part_of` relation
    /// whose other endpoint is still active.
    pub fn relation_protected_ids(&self) -> Result<HashSet<i64>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT r.from_id, r.to_id FROM relations r
             JOIN observations f ON f.id = r.from_id
             JOIN observations t ON t.id = r.to_id
             WHERE r.kind IN ('supersedes', 'part_of')
               AND (f.archived = 0 OR t.archived = 0)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut protected = HashSet::new();
        for (from, to) in rows.flatten() {
            protected.insert(from);
            protected.insert(to);
        }
        Ok(protected)
    }

    /// All distinct project ids with at least one observation.
    pub fn list_projects(&self) -> Result<Vec<String>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare("SELECT DISTINCT project FROM observations ORDER BY project")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ========================================================================
    // CYCLE LOCKS AND MAINTENANCE LOG
    // ========================================================================

    /// Take the named cycle lock. At most one holder per cycle; stale locks
    /// expire after `ttl`.
    pub fn try_acquire_cycle_lock(
        &self,
        name: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<bool> {
        let now = Utc::now();
        let expires = now + Duration::seconds(ttl.as_secs() as i64);
        let writer = self.write_lock()?;
        writer.execute(
            "DELETE FROM cycle_locks WHERE name = ?1 AND expires_at < ?2",
            params![name, now],
        )?;
        let inserted = writer.execute(
            "INSERT OR IGNORE INTO cycle_locks (name, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, holder, now, expires],
        )?;
        Ok(inserted == 1)
    }

    /// Release a cycle lock held by `holder`.
    pub fn release_cycle_lock(&self, name: &str, holder: &str) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "DELETE FROM cycle_locks WHERE name = ?1 AND holder = ?2",
            params![name, holder],
        )?;
        Ok(())
    }

    /// Append a cycle run to the maintenance log.
    pub fn record_cycle(&self, record: &CycleRecord) -> Result<i64> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO maintenance_log
                (cycle, started_at, duration_ms, scanned, updated, emitted, archived, errors)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                record.cycle,
                record.started_at,
                record.duration_ms,
                record.scanned,
                record.updated,
                record.emitted,
                record.archived,
                json(&record.errors),
            ],
        )?;
        Ok(writer.last_insert_rowid())
    }

    /// Recent maintenance log entries, newest first.
    pub fn list_cycles(&self, limit: usize) -> Result<Vec<CycleRecord>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT id, cycle, started_at, duration_ms, scanned, updated, emitted, archived, errors
             FROM maintenance_log ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(CycleRecord {
                id: row.get(0)?,
                cycle: row.get(1)?,
                started_at: row.get(2)?,
                duration_ms: row.get(3)?,
                scanned: row.get(4)?,
                updated: row.get(5)?,
                emitted: row.get(6)?,
                archived: row.get(7)?,
                errors: parse_json_vec(row.get::<_, String>(8)?),
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Most recent run of a named cycle.
    pub fn last_cycle(&self, cycle: &str) -> Result<Option<DateTime<Utc>>> {
        let reader = self.readers.get()?;
        let last = reader
            .query_row(
                "SELECT started_at FROM maintenance_log WHERE cycle = ?1
                 ORDER BY id DESC LIMIT 1",
                params![cycle],
                |row| row.get(0),
            )
            .optional()?;
        Ok(last)
    }

    // ========================================================================
    // SESSIONS
    // ========================================================================

    /// Insert or update a session row, preserving the summary and seal time
    /// unless the caller provides them.
    pub fn upsert_session(&self, session: &Session) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO sessions (
                workstation, project, session_uuid, started_at, ended_at, source_mtime,
                summary, input_tokens, output_tokens, message_count
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(workstation, project, session_uuid) DO UPDATE SET
                started_at = excluded.started_at,
                ended_at = COALESCE(excluded.ended_at, sessions.ended_at),
                source_mtime = excluded.source_mtime,
                summary = COALESCE(excluded.summary, sessions.summary),
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                message_count = excluded.message_count",
            params![
                session.key.workstation,
                session.key.project,
                session.key.session_uuid,
                session.started_at,
                session.ended_at,
                session.source_mtime,
                session.summary,
                session.input_tokens,
                session.output_tokens,
                session.message_count,
            ],
        )?;
        Ok(())
    }

    pub fn get_session(&self, key: &SessionKey) -> Result<Option<Session>> {
        let reader = self.readers.get()?;
        let session = reader
            .query_row(
                "SELECT workstation, project, session_uuid, started_at, ended_at, source_mtime,
                        summary, input_tokens, output_tokens, message_count
                 FROM sessions
                 WHERE workstation = ?1 AND project = ?2 AND session_uuid = ?3",
                params![key.workstation, key.project, key.session_uuid],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    /// Find a session by its host uuid, any workstation. Project is an
    /// optional narrowing filter.
    pub fn find_session_by_uuid(
        &self,
        session_uuid: &str,
        project: Option<&str>,
    ) -> Result<Option<Session>> {
        let reader = self.readers.get()?;
        let session = match project {
            Some(p) => reader
                .query_row(
                    "SELECT workstation, project, session_uuid, started_at, ended_at, source_mtime,
                            summary, input_tokens, output_tokens, message_count
                     FROM sessions WHERE session_uuid = ?1 AND project = ?2
                     ORDER BY started_at DESC LIMIT 1",
                    params![session_uuid, p],
                    session_from_row,
                )
                .optional()?,
            None => reader
                .query_row(
                    "SELECT workstation, project, session_uuid, started_at, ended_at, source_mtime,
                            summary, input_tokens, output_tokens, message_count
                     FROM sessions WHERE session_uuid = ?1
                     ORDER BY started_at DESC LIMIT 1",
                    params![session_uuid],
                    session_from_row,
                )
                .optional()?,
        };
        Ok(session)
    }

    /// Seal a session when the stop event arrives.
    pub fn seal_session(&self, key: &SessionKey, ended_at: DateTime<Utc>) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "UPDATE sessions SET ended_at = ?1
             WHERE workstation = ?2 AND project = ?3 AND session_uuid = ?4",
            params![ended_at, key.workstation, key.project, key.session_uuid],
        )?;
        Ok(())
    }

    pub fn set_session_summary(&self, key: &SessionKey, summary: &str) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "UPDATE sessions SET summary = ?1
             WHERE workstation = ?2 AND project = ?3 AND session_uuid = ?4",
            params![summary, key.workstation, key.project, key.session_uuid],
        )?;
        Ok(())
    }

    /// Replace a session's message sequence and refresh its full-text body.
    pub fn replace_session_messages(
        &self,
        key: &SessionKey,
        messages: &[SessionMessage],
    ) -> Result<()> {
        let key_str = key.to_string();
        let mut writer = self.write_lock()?;
        let tx = writer.transaction()?;

        tx.execute(
            "DELETE FROM session_messages
             WHERE workstation = ?1 AND project = ?2 AND session_uuid = ?3",
            params![key.workstation, key.project, key.session_uuid],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_messages
                    (workstation, project, session_uuid, seq, role, timestamp, text)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (seq, message) in messages.iter().enumerate() {
                stmt.execute(params![
                    key.workstation,
                    key.project,
                    key.session_uuid,
                    seq as i64,
                    message.role,
                    message.timestamp,
                    message.text,
                ])?;
            }
        }

        let body: String = messages
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        tx.execute("DELETE FROM sessions_fts WHERE session_key = ?1", params![key_str])?;
        tx.execute(
            "INSERT INTO sessions_fts (session_key, body) VALUES (?1, ?2)",
            params![key_str, body],
        )?;

        tx.commit()?;
        Ok(())
    }

    pub fn session_messages(&self, key: &SessionKey) -> Result<Vec<SessionMessage>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT role, timestamp, text FROM session_messages
             WHERE workstation = ?1 AND project = ?2 AND session_uuid = ?3
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(
            params![key.workstation, key.project, key.session_uuid],
            |row| {
                Ok(SessionMessage {
                    role: row.get(0)?,
                    timestamp: row.get(1)?,
                    text: row.get(2)?,
                })
            },
        )?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn list_sessions(&self, project: &str, limit: usize) -> Result<Vec<Session>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT workstation, project, session_uuid, started_at, ended_at, source_mtime,
                    summary, input_tokens, output_tokens, message_count
             FROM sessions WHERE project = ?1
             ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![project, limit as i64], session_from_row)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ========================================================================
    // PATTERNS
    // ========================================================================

    pub fn upsert_pattern(&self, pattern: &MemoryPattern) -> Result<()> {
        let writer = self.write_lock()?;
        writer.execute(
            "INSERT INTO patterns (project, name, observation_ids, confidence, first_seen, last_seen)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(project, name) DO UPDATE SET
                observation_ids = excluded.observation_ids,
                confidence = excluded.confidence,
                last_seen = excluded.last_seen",
            params![
                pattern.project,
                pattern.name,
                json(&pattern.observation_ids),
                pattern.confidence,
                pattern.first_seen,
                pattern.last_seen,
            ],
        )?;
        Ok(())
    }

    pub fn list_patterns(&self, project: &str) -> Result<Vec<MemoryPattern>> {
        let reader = self.readers.get()?;
        let mut stmt = reader.prepare(
            "SELECT project, name, observation_ids, confidence, first_seen, last_seen
             FROM patterns WHERE project = ?1 ORDER BY last_seen DESC",
        )?;
        let rows = stmt.query_map(params![project], |row| {
            Ok(MemoryPattern {
                project: row.get(0)?,
                name: row.get(1)?,
                observation_ids: serde_json::from_str(&row.get::<_, String>(2)?)
                    .unwrap_or_default(),
                confidence: row.get(3)?,
                first_seen: row.get(4)?,
                last_seen: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ========================================================================
    // STATS AND BACKUP
    // ========================================================================

    /// Counters for the status surface, optionally scoped to one project.
    pub fn stats(&self, project: Option<&str>) -> Result<MemoryStats> {
        let reader = self.readers.get()?;
        let (clause, clause_sessions) = match project {
            Some(_) => (" WHERE project = ?1", " WHERE project = ?1"),
            None => ("", ""),
        };

        let run_row = |sql: &str| -> Result<(i64, i64, i64, f64, f64)> {
            let row = match project {
                Some(p) => reader.query_row(sql, params![p], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    ))
                })?,
                None => reader.query_row(sql, [], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                        row.get::<_, Option<f64>>(4)?.unwrap_or(0.0),
                    ))
                })?,
            };
            Ok(row)
        };

        let (total, archived, pending, avg_relevance, avg_importance) = run_row(&format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(archived), 0),
                    COALESCE(SUM(embedding_pending), 0),
                    AVG(CASE WHEN archived = 0 THEN relevance END),
                    AVG(CASE WHEN archived = 0 THEN importance END)
             FROM observations{clause}"
        ))?;

        let (oldest, newest): (Option<DateTime<Utc>>, Option<DateTime<Utc>>) = match project {
            Some(p) => reader.query_row(
                "SELECT MIN(created_at), MAX(created_at) FROM observations WHERE project = ?1",
                params![p],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
            None => reader.query_row(
                "SELECT MIN(created_at), MAX(created_at) FROM observations",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?,
        };

        let count = |sql: &str| -> Result<i64> {
            let n = match project {
                Some(p) => reader.query_row(sql, params![p], |row| row.get(0))?,
                None => reader.query_row(sql, [], |row| row.get(0))?,
            };
            Ok(n)
        };

        let relations = match project {
            Some(_) => count(
                "SELECT COUNT(*) FROM relations r
                 JOIN observations o ON o.id = r.from_id WHERE o.project = ?1",
            )?,
            None => count("SELECT COUNT(*) FROM relations")?,
        };
        let sessions = count(&format!("SELECT COUNT(*) FROM sessions{clause_sessions}"))?;
        let patterns = count(&format!("SELECT COUNT(*) FROM patterns{clause_sessions}"))?;

        Ok(MemoryStats {
            total_observations: total,
            archived_observations: archived,
            pending_embeddings: pending,
            total_relations: relations,
            total_sessions: sessions,
            total_patterns: patterns,
            average_relevance: avg_relevance,
            average_importance: avg_importance,
            oldest_observation: oldest,
            newest_observation: newest,
        })
    }

    /// Online backup to another file.
    pub fn backup_to(&self, path: &Path) -> Result<()> {
        let reader = self.readers.get()?;
        let mut target = Connection::open(path)?;
        let backup = rusqlite::backup::Backup::new(&reader, &mut target)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        Ok(())
    }
}

// ============================================================================
// ROW MAPPING
// ============================================================================

fn observation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        project: row.get(1)?,
        session_id: row.get(2)?,
        workstation: row.get(3)?,
        kind: ObservationType::parse_name(&row.get::<_, String>(4)?),
        title: row.get(5)?,
        subtitle: row.get(6)?,
        narrative: row.get(7)?,
        facts: parse_json_vec(row.get::<_, String>(8)?),
        tags: parse_json_vec(row.get::<_, String>(9)?),
        files: parse_json_vec(row.get::<_, String>(10)?),
        concepts: parse_json_vec(row.get::<_, String>(11)?),
        importance: row.get(12)?,
        confidence: row.get(13)?,
        relevance: row.get(14)?,
        access_count: row.get(15)?,
        archived: row.get::<_, i64>(16)? != 0,
        superseded_by: row.get(17)?,
        embedding_pending: row.get::<_, i64>(18)? != 0,
        created_at: row.get(19)?,
        last_accessed: row.get(20)?,
    })
}

fn relation_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relation> {
    let kind: String = row.get(2)?;
    let provenance: String = row.get(4)?;
    Ok(Relation {
        from: row.get(0)?,
        to: row.get(1)?,
        kind: kind.parse().unwrap_or(RelationType::RelatesTo),
        weight: row.get(3)?,
        provenance: Provenance::parse_name(&provenance),
        created_at: row.get(5)?,
    })
}

fn session_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        key: SessionKey {
            workstation: row.get(0)?,
            project: row.get(1)?,
            session_uuid: row.get(2)?,
        },
        started_at: row.get(3)?,
        ended_at: row.get(4)?,
        source_mtime: row.get(5)?,
        summary: row.get(6)?,
        input_tokens: row.get(7)?,
        output_tokens: row.get(8)?,
        message_count: row.get(9)?,
    })
}

fn json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_vec<T: for<'de> Deserialize<'de>>(raw: String) -> Vec<T> {
    serde_json::from_str(&raw).unwrap_or_default()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ObservationSource;
    use tempfile::TempDir;

    const DIMS: usize = 8;

    fn store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("engram.db"), 2, DIMS).unwrap();
        (dir, store)
    }

    fn vec_for(seed: f32) -> Vec<f32> {
        let raw: Vec<f32> = (0..DIMS).map(|i| ((i as f32 + seed) * 0.7).sin()).collect();
        truncate_normalize(raw, DIMS)
    }

    fn draft(project: &str, kind: ObservationType, title: &str) -> ObservationDraft {
        let mut d = ObservationDraft::new(project, kind, title);
        d.narrative = format!("{title} narrative text");
        d.source = ObservationSource::Hook;
        d
    }

    #[test]
    fn insert_get_roundtrip() {
        let (_dir, store) = store();
        let d = draft("proj_a", ObservationType::Decision, "adopt Postgres");
        let obs = store.insert_observation(&d, Some(&vec_for(1.0)), "test-model").unwrap();

        assert!(obs.id > 0);
        assert_eq!(obs.kind, ObservationType::Decision);
        assert!(!obs.embedding_pending);
        assert!(obs.importance > 0.5);
        assert_eq!(obs.confidence, 0.7);

        let fetched = store.get_by_id(obs.id).unwrap().unwrap();
        let a = serde_json::to_value(&obs).unwrap();
        let b = serde_json::to_value(&fetched).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn keyword_search_finds_inserted_rows() {
        let (_dir, store) = store();
        let d = draft("proj_a", ObservationType::Discovery, "use GIN index for jsonb");
        let obs = store.insert_observation(&d, Some(&vec_for(2.0)), "m").unwrap();

        let filter = ObservationFilter::project("proj_a");
        let hits = store.keyword_search("gin index", &filter, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, obs.id);
        assert!(hits[0].1 > 0.0 && hits[0].1 < 1.0);

        // Other projects never see it
        let other = ObservationFilter::project("proj_b");
        assert!(store.keyword_search("gin index", &other, 10).unwrap().is_empty());
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn triad_consistency_on_insert_and_delete() {
        let (_dir, store) = store();
        let d = draft("proj_a", ObservationType::Note, "triad check");
        let obs = store.insert_observation(&d, Some(&vec_for(3.0)), "m").unwrap();

        // Row, FTS, and vector all present
        assert!(store.get_by_id(obs.id).unwrap().is_some());
        let filter = ObservationFilter::project("proj_a");
        assert!(!store.keyword_search("triad", &filter, 10).unwrap().is_empty());
        assert_eq!(store.vector_query(&vec_for(3.0), 5, Some("proj_a")).unwrap()[0].0, obs.id);

        store.delete(&[obs.id]).unwrap();

        // All gone
        assert!(store.get_by_id(obs.id).unwrap().is_none());
        assert!(store.keyword_search("triad", &filter, 10).unwrap().is_empty());
        assert!(store.vector_query(&vec_for(3.0), 5, Some("proj_a")).unwrap().is_empty());
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn archive_clears_vector_keeps_row() {
        let (_dir, store) = store();
        let d = draft("proj_a", ObservationType::Note, "archive me");
        let obs = store.insert_observation(&d, Some(&vec_for(4.0)), "m").unwrap();

        let archived = store.archive(obs.id).unwrap();
        assert!(archived.archived);

        // Readable by id, absent from vector and default keyword search
        assert!(store.get_by_id(obs.id).unwrap().is_some());
        assert!(store.vector_query(&vec_for(4.0), 5, Some("proj_a")).unwrap().is_empty());
        let filter = ObservationFilter::project("proj_a");
        assert!(store.keyword_search("archive", &filter, 10).unwrap().is_empty());

        let mut with_archived = ObservationFilter::project("proj_a");
        with_archived.include_archived = true;
        assert!(!store.keyword_search("archive", &with_archived, 10).unwrap().is_empty());
    }

    #[cfg(feature = "vector-search")]
    #[test]
    fn rebuild_restores_index_from_rows() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engram.db");
        let obs_id;
        {
            let store = Store::open(&path, 2, DIMS).unwrap();
            let d = draft("proj_a", ObservationType::Note, "persistent vector");
            obs_id = store.insert_observation(&d, Some(&vec_for(5.0)), "m").unwrap().id;
        }
        // Fresh open rebuilds the in-process index from blobs
        let store = Store::open(&path, 2, DIMS).unwrap();
        let hits = store.vector_query(&vec_for(5.0), 5, Some("proj_a")).unwrap();
        assert_eq!(hits[0].0, obs_id);
        assert!(!store.audit_vector_index().unwrap());
    }

    #[test]
    fn pending_embedding_flow() {
        let (_dir, store) = store();
        let d = draft("proj_a", ObservationType::Note, "embedder was down");
        let obs = store.insert_observation(&d, None, "m").unwrap();
        assert!(obs.embedding_pending);

        let pending = store.pending_embeddings(10).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].0, obs.id);
        assert!(pending[0].1.contains("embedder was down"));

        store.attach_embedding(obs.id, &vec_for(6.0), "m").unwrap();
        assert!(!store.get_by_id(obs.id).unwrap().unwrap().embedding_pending);
        assert!(store.pending_embeddings(10).unwrap().is_empty());

        #[cfg(feature = "vector-search")]
        {
            let hits = store.vector_query(&vec_for(6.0), 5, Some("proj_a")).unwrap();
            assert_eq!(hits[0].0, obs.id);
        }
    }

    #[test]
    fn relations_validate_and_upsert() {
        let (_dir, store) = store();
        let a = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "a"), None, "m")
            .unwrap();
        let b = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "b"), None, "m")
            .unwrap();
        let foreign = store
            .insert_observation(&draft("proj_b", ObservationType::Note, "c"), None, "m")
            .unwrap();

        // Cross-project rejected
        let err = store
            .insert_relation(&Relation::new(a.id, foreign.id, RelationType::RelatesTo, 0.5))
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // Self-relation rejected
        assert!(store
            .insert_relation(&Relation::new(a.id, a.id, RelationType::RelatesTo, 0.5))
            .is_err());

        // Duplicate tuple updated, not duplicated
        assert!(store
            .insert_relation(&Relation::new(a.id, b.id, RelationType::SharesTheme, 0.6))
            .unwrap());
        assert!(!store
            .insert_relation(&Relation::new(a.id, b.id, RelationType::SharesTheme, 0.9))
            .unwrap());
        let relations = store.relations_for(a.id).unwrap();
        assert_eq!(relations.len(), 1);
        assert!((relations[0].weight - 0.9).abs() < 1e-9);
    }

    #[test]
    fn contradicts_decays_confidence_once() {
        let (_dir, store) = store();
        let a = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "a"), None, "m")
            .unwrap();
        let b = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "b"), None, "m")
            .unwrap();

        store
            .insert_relation(&Relation::new(a.id, b.id, RelationType::Contradicts, 0.8))
            .unwrap();
        let decayed = store.get_by_id(a.id).unwrap().unwrap().confidence;
        assert!((decayed - 0.7 * 0.9).abs() < 1e-9);

        // Re-upserting the same tuple does not decay again
        store
            .insert_relation(&Relation::new(a.id, b.id, RelationType::Contradicts, 0.8))
            .unwrap();
        assert!((store.get_by_id(a.id).unwrap().unwrap().confidence - 0.7 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn traversal_is_bounded_and_cycle_safe() {
        let (_dir, store) = store();
        let ids: Vec<i64> = (0..4)
            .map(|i| {
                store
                    .insert_observation(
                        &draft("proj_a", ObservationType::Note, &format!("n{i}")),
                        None,
                        "m",
                    )
                    .unwrap()
                    .id
            })
            .collect();

        // 0 -> 1 -> 2 -> 0 cycle, plus 2 -> 3
        store.insert_relation(&Relation::new(ids[0], ids[1], RelationType::LeadsTo, 1.0)).unwrap();
        store.insert_relation(&Relation::new(ids[1], ids[2], RelationType::LeadsTo, 1.0)).unwrap();
        store.insert_relation(&Relation::new(ids[2], ids[0], RelationType::LeadsTo, 1.0)).unwrap();
        store.insert_relation(&Relation::new(ids[2], ids[3], RelationType::Causes, 1.0)).unwrap();

        let hits = store.traverse_relations(ids[0], 2, &[]).unwrap();
        // Depth 2 from n0 reaches every edge except none twice
        assert!(hits.len() >= 3);
        assert!(hits.iter().all(|h| h.depth <= 2));

        // Type allow-list respected
        let causes_only = store.traverse_relations(ids[0], 3, &[RelationType::Causes]).unwrap();
        assert!(causes_only.iter().all(|h| h.relation.kind == RelationType::Causes));
    }

    #[test]
    fn supersede_rejects_cycles() {
        let (_dir, store) = store();
        let a = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "v1"), None, "m")
            .unwrap();
        let b = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "v2"), None, "m")
            .unwrap();
        let c = store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "v3"), None, "m")
            .unwrap();

        store.supersede(a.id, b.id).unwrap();
        store.supersede(b.id, c.id).unwrap();

        // Closing the chain back onto itself is rejected
        let err = store.supersede(c.id, a.id).unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));

        // Double supersession is rejected
        assert!(store.supersede(a.id, c.id).is_err());

        let a_row = store.get_by_id(a.id).unwrap().unwrap();
        assert_eq!(a_row.superseded_by, Some(b.id));
    }

    #[test]
    fn list_by_filter_orders_decisions_first() {
        let (_dir, store) = store();
        let mut d1 = draft("proj_a", ObservationType::Discovery, "use GIN index");
        d1.narrative = "equal narrative".into();
        let mut d2 = draft("proj_a", ObservationType::Decision, "adopt Postgres");
        d2.narrative = "equal narrative".into();
        let discovery = store.insert_observation(&d1, None, "m").unwrap();
        let decision = store.insert_observation(&d2, None, "m").unwrap();

        // Force equal derived scores so ordering falls to the type weight
        store
            .write_relevance(&[(discovery.id, 0.5), (decision.id, 0.5)])
            .unwrap();

        let rows = store
            .list_by_filter(&ObservationFilter::project("proj_a"), 10, 0)
            .unwrap();
        assert_eq!(rows[0].kind, ObservationType::Decision);
        assert_eq!(rows[1].kind, ObservationType::Discovery);
    }

    #[test]
    fn cycle_locks_are_exclusive_and_expire() {
        let (_dir, store) = store();
        let ttl = std::time::Duration::from_secs(60);
        assert!(store.try_acquire_cycle_lock("decay", "holder-1", ttl).unwrap());
        assert!(!store.try_acquire_cycle_lock("decay", "holder-2", ttl).unwrap());
        // A different cycle name is independent
        assert!(store.try_acquire_cycle_lock("associate", "holder-2", ttl).unwrap());

        store.release_cycle_lock("decay", "holder-1").unwrap();
        assert!(store.try_acquire_cycle_lock("decay", "holder-2", ttl).unwrap());

        // Expired locks are reclaimed
        store.release_cycle_lock("decay", "holder-2").unwrap();
        assert!(store
            .try_acquire_cycle_lock("decay", "stale", std::time::Duration::ZERO)
            .unwrap());
        assert!(store.try_acquire_cycle_lock("decay", "fresh", ttl).unwrap());
    }

    #[test]
    fn sessions_upsert_and_seal() {
        let (_dir, store) = store();
        let key = SessionKey::new("ws1", "proj_a", "uuid-1");
        let now = Utc::now();
        let session = Session {
            key: key.clone(),
            started_at: now,
            ended_at: None,
            source_mtime: 100,
            summary: None,
            input_tokens: 10,
            output_tokens: 20,
            message_count: 2,
        };
        store.upsert_session(&session).unwrap();

        let mut updated = session.clone();
        updated.source_mtime = 200;
        updated.message_count = 5;
        store.upsert_session(&updated).unwrap();

        let fetched = store.get_session(&key).unwrap().unwrap();
        assert_eq!(fetched.source_mtime, 200);
        assert_eq!(fetched.message_count, 5);
        assert!(fetched.ended_at.is_none());

        store.seal_session(&key, now).unwrap();
        assert!(store.get_session(&key).unwrap().unwrap().ended_at.is_some());

        let by_uuid = store.find_session_by_uuid("uuid-1", Some("proj_a")).unwrap();
        assert!(by_uuid.is_some());
        assert!(store.find_session_by_uuid("uuid-1", Some("proj_b")).unwrap().is_none());
    }

    #[test]
    fn session_messages_roundtrip() {
        let (_dir, store) = store();
        let key = SessionKey::new("ws1", "proj_a", "uuid-2");
        let now = Utc::now();
        store
            .upsert_session(&Session {
                key: key.clone(),
                started_at: now,
                ended_at: None,
                source_mtime: 1,
                summary: None,
                input_tokens: 0,
                output_tokens: 0,
                message_count: 2,
            })
            .unwrap();

        let messages = vec![
            SessionMessage {
                role: "user".into(),
                timestamp: now,
                text: "please add retry logic".into(),
            },
            SessionMessage {
                role: "assistant".into(),
                timestamp: now,
                text: "added exponential backoff".into(),
            },
        ];
        store.replace_session_messages(&key, &messages).unwrap();

        let fetched = store.session_messages(&key).unwrap();
        assert_eq!(fetched.len(), 2);
        assert_eq!(fetched[0].role, "user");
        assert_eq!(fetched[1].text, "added exponential backoff");
    }

    #[test]
    fn maintenance_log_roundtrip() {
        let (_dir, store) = store();
        let record = CycleRecord {
            id: 0,
            cycle: "decay".into(),
            started_at: Utc::now(),
            duration_ms: 42,
            scanned: 100,
            updated: 90,
            emitted: 0,
            archived: 0,
            errors: vec!["one page failed".into()],
        };
        store.record_cycle(&record).unwrap();

        let cycles = store.list_cycles(10).unwrap();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].cycle, "decay");
        assert_eq!(cycles[0].errors, vec!["one page failed".to_string()]);
        assert!(store.last_cycle("decay").unwrap().is_some());
        assert!(store.last_cycle("associate").unwrap().is_none());
    }

    #[test]
    fn stats_count_per_project() {
        let (_dir, store) = store();
        store
            .insert_observation(&draft("proj_a", ObservationType::Decision, "a"), None, "m")
            .unwrap();
        store
            .insert_observation(&draft("proj_b", ObservationType::Note, "b"), None, "m")
            .unwrap();

        let all = store.stats(None).unwrap();
        assert_eq!(all.total_observations, 2);
        assert_eq!(all.pending_embeddings, 2);

        let scoped = store.stats(Some("proj_a")).unwrap();
        assert_eq!(scoped.total_observations, 1);

        assert_eq!(store.list_projects().unwrap(), vec!["proj_a", "proj_b"]);
    }
}
