//! Database migrations
//!
//! Idempotent, versioned, applied on the writer connection at startup.

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema: observations, relations, sessions, patterns, maintenance log",
        up: MIGRATION_V1_UP,
    },
    Migration {
        version: 2,
        description: "Pending-embedding flag and supersession index",
        up: MIGRATION_V2_UP,
    },
    Migration {
        version: 3,
        description: "FTS5 porter tokenizer, page_size 8192",
        up: MIGRATION_V3_UP,
    },
];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    project TEXT NOT NULL,
    session_id TEXT,
    workstation TEXT NOT NULL DEFAULT '',
    kind TEXT NOT NULL DEFAULT 'note',
    title TEXT NOT NULL,
    subtitle TEXT NOT NULL DEFAULT '',
    narrative TEXT NOT NULL DEFAULT '',
    facts TEXT NOT NULL DEFAULT '[]',
    tags TEXT NOT NULL DEFAULT '[]',
    files TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',

    importance REAL NOT NULL DEFAULT 0.5,
    confidence REAL NOT NULL DEFAULT 0.7,
    relevance REAL NOT NULL DEFAULT 1.0,
    access_count INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    superseded_by INTEGER REFERENCES observations(id),

    created_at TEXT NOT NULL,
    last_accessed TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_obs_project ON observations(project);
CREATE INDEX IF NOT EXISTS idx_obs_project_archived ON observations(project, archived);
CREATE INDEX IF NOT EXISTS idx_obs_kind ON observations(kind);
CREATE INDEX IF NOT EXISTS idx_obs_created ON observations(created_at);
CREATE INDEX IF NOT EXISTS idx_obs_relevance ON observations(relevance);

-- Embedding blobs, one per observation
CREATE TABLE IF NOT EXISTS observation_embeddings (
    observation_id INTEGER PRIMARY KEY REFERENCES observations(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    model TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

-- Typed relation graph; duplicate (from, to, kind) tuples are upserted
CREATE TABLE IF NOT EXISTS relations (
    from_id INTEGER NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
    to_id INTEGER NOT NULL REFERENCES observations(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    provenance TEXT NOT NULL DEFAULT 'manual',
    created_at TEXT NOT NULL,
    PRIMARY KEY (from_id, to_id, kind)
);

CREATE INDEX IF NOT EXISTS idx_relations_from ON relations(from_id);
CREATE INDEX IF NOT EXISTS idx_relations_to ON relations(to_id);
CREATE INDEX IF NOT EXISTS idx_relations_kind ON relations(kind);

-- Sessions keyed by workstation : project : session uuid
CREATE TABLE IF NOT EXISTS sessions (
    workstation TEXT NOT NULL,
    project TEXT NOT NULL,
    session_uuid TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    source_mtime INTEGER NOT NULL DEFAULT 0,
    summary TEXT,
    input_tokens INTEGER NOT NULL DEFAULT 0,
    output_tokens INTEGER NOT NULL DEFAULT 0,
    message_count INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (workstation, project, session_uuid)
);

CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
CREATE INDEX IF NOT EXISTS idx_sessions_uuid ON sessions(session_uuid);

CREATE TABLE IF NOT EXISTS session_messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workstation TEXT NOT NULL,
    project TEXT NOT NULL,
    session_uuid TEXT NOT NULL,
    seq INTEGER NOT NULL,
    role TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    text TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_session_messages_key
    ON session_messages(workstation, project, session_uuid, seq);

-- Named recurring clusters
CREATE TABLE IF NOT EXISTS patterns (
    project TEXT NOT NULL,
    name TEXT NOT NULL,
    observation_ids TEXT NOT NULL DEFAULT '[]',
    confidence REAL NOT NULL DEFAULT 0.5,
    first_seen TEXT NOT NULL,
    last_seen TEXT NOT NULL,
    PRIMARY KEY (project, name)
);

-- One row per consolidation cycle run
CREATE TABLE IF NOT EXISTS maintenance_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle TEXT NOT NULL,
    started_at TEXT NOT NULL,
    duration_ms INTEGER NOT NULL DEFAULT 0,
    scanned INTEGER NOT NULL DEFAULT 0,
    updated INTEGER NOT NULL DEFAULT 0,
    emitted INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0,
    errors TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_maintenance_started ON maintenance_log(started_at);

-- Named mutual-exclusion locks for scheduled cycles
CREATE TABLE IF NOT EXISTS cycle_locks (
    name TEXT PRIMARY KEY,
    holder TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- FTS5 over the searchable observation text
CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    title, subtitle, narrative, facts,
    content='observations',
    content_rowid='id'
);

CREATE TRIGGER IF NOT EXISTS observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative, NEW.facts);
END;

CREATE TRIGGER IF NOT EXISTS observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative, OLD.facts);
END;

CREATE TRIGGER IF NOT EXISTS observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative, OLD.facts);
    INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative, NEW.facts);
END;

-- Session transcript search (maintained by the session indexer)
CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(session_key, body);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// V2: pending-embedding flag for the embedding-unavailable write path
const MIGRATION_V2_UP: &str = r#"
ALTER TABLE observations ADD COLUMN embedding_pending INTEGER NOT NULL DEFAULT 0;

CREATE INDEX IF NOT EXISTS idx_obs_embedding_pending ON observations(embedding_pending);
CREATE INDEX IF NOT EXISTS idx_obs_superseded_by ON observations(superseded_by);

UPDATE schema_version SET version = 2, applied_at = datetime('now');
"#;

/// V3: porter tokenizer for stemmed keyword recall
/// page_size upgrade handled in apply_migrations() since VACUUM can't run
/// inside execute_batch
const MIGRATION_V3_UP: &str = r#"
DROP TRIGGER IF EXISTS observations_ai;
DROP TRIGGER IF EXISTS observations_ad;
DROP TRIGGER IF EXISTS observations_au;
DROP TABLE IF EXISTS observations_fts;

CREATE VIRTUAL TABLE observations_fts USING fts5(
    title, subtitle, narrative, facts,
    content='observations',
    content_rowid='id',
    tokenize='porter ascii'
);

INSERT INTO observations_fts(observations_fts) VALUES('rebuild');

CREATE TRIGGER observations_ai AFTER INSERT ON observations BEGIN
    INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative, NEW.facts);
END;

CREATE TRIGGER observations_ad AFTER DELETE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative, OLD.facts);
END;

CREATE TRIGGER observations_au AFTER UPDATE ON observations BEGIN
    INSERT INTO observations_fts(observations_fts, rowid, title, subtitle, narrative, facts)
    VALUES ('delete', OLD.id, OLD.title, OLD.subtitle, OLD.narrative, OLD.facts);
    INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts)
    VALUES (NEW.id, NEW.title, NEW.subtitle, NEW.narrative, NEW.facts);
END;

DROP TABLE IF EXISTS sessions_fts;
CREATE VIRTUAL TABLE sessions_fts USING fts5(session_key, body, tokenize='porter ascii');

UPDATE schema_version SET version = 3, applied_at = datetime('now');
"#;

/// Get current schema version from database
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .or(Ok(0))
}

/// Apply pending migrations, returning how many ran
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "applying migration v{}: {}",
                migration.version,
                migration.description
            );

            conn.execute_batch(migration.up)?;

            // V3: larger pages help the blob-heavy embedding table; VACUUM
            // rewrites the file with the new page size
            if migration.version == 3 {
                conn.pragma_update(None, "page_size", 8192)?;
                conn.execute_batch("VACUUM;")?;
            }

            applied += 1;
        }
    }

    Ok(applied)
}
