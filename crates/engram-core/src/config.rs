//! Runtime configuration
//!
//! A single immutable record built at startup from the environment. Every
//! tunable is optional except the database DSN.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_DSN is required (a SQLite database path)")]
    MissingDsn,
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

/// Which embedding backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingProviderKind {
    /// Local quantized transformer via fastembed
    #[default]
    Local,
    /// Remote OpenAI-shaped HTTP embedding API
    Remote,
}

/// Embedding backend settings
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProviderKind,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model_name: Option<String>,
    /// Vector dimension D; every stored embedding has exactly this length
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingProviderKind::Local,
            base_url: None,
            api_key: None,
            model_name: None,
            dimensions: 256,
        }
    }
}

/// Reranker settings
#[derive(Debug, Clone)]
pub struct RerankConfig {
    pub enabled: bool,
    /// Shortlist size handed to the cross-encoder
    pub candidates: usize,
    /// Results kept after reranking
    pub results: usize,
    /// Hard latency budget; overrun keeps the fused order
    pub budget: Duration,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            candidates: 100,
            results: 10,
            budget: Duration::from_millis(300),
        }
    }
}

/// Retrieval fusion settings
#[derive(Debug, Clone)]
pub struct SearchConfig {
    pub rrf_k: f64,
    pub vector_weight: f64,
    pub text_weight: f64,
    pub short_circuit_threshold: f64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            vector_weight: 1.0,
            text_weight: 1.0,
            short_circuit_threshold: 0.85,
        }
    }
}

/// Consolidation cadences and thresholds
#[derive(Debug, Clone)]
pub struct ConsolidationConfig {
    pub decay_interval: Duration,
    pub association_interval: Duration,
    pub forgetting_interval: Duration,
    /// Forgetting is opt-in
    pub forgetting_enabled: bool,
    /// Sample size for the association cycle
    pub association_sample: usize,
    /// Relevance below this is a forgetting candidate
    pub forgetting_threshold: f64,
    /// Decay page size
    pub page_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            decay_interval: Duration::from_secs(24 * 3600),
            association_interval: Duration::from_secs(7 * 24 * 3600),
            forgetting_interval: Duration::from_secs(90 * 24 * 3600),
            forgetting_enabled: false,
            association_sample: 500,
            forgetting_threshold: 0.1,
            page_size: 500,
        }
    }
}

/// Immutable process configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path (from DATABASE_DSN, `sqlite://` prefix accepted)
    pub database_path: PathBuf,
    /// Reader connection pool size
    pub database_max_conns: usize,
    pub worker_host: String,
    pub worker_port: u16,
    /// Bearer token; when set, API calls must carry it
    pub worker_token: Option<String>,
    /// Observations returned by context injection
    pub context_observations: usize,
    /// How many of those deserve full narrative rendering
    pub context_full_count: usize,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub search: SearchConfig,
    pub consolidation: ConsolidationConfig,
    /// Host conversation-log directory scanned by the session indexer
    pub sessions_dir: Option<PathBuf>,
    /// Session-indexer scan interval
    pub sessions_scan_interval: Duration,
    /// Explicit workstation id override
    pub workstation_id: Option<String>,
    /// Per-session ingest queue depth; full queue fails fast with `busy`
    pub ingest_queue_depth: usize,
    /// Bounded worker pool for embedding/rerank inference
    pub embed_workers: usize,
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dsn = std::env::var("DATABASE_DSN").map_err(|_| ConfigError::MissingDsn)?;
        let database_path = parse_dsn(&dsn)?;

        let embedding = EmbeddingConfig {
            provider: match env_str("EMBEDDING_PROVIDER").as_deref() {
                None | Some("local") => EmbeddingProviderKind::Local,
                Some("remote") => EmbeddingProviderKind::Remote,
                Some(other) => {
                    return Err(ConfigError::Invalid("EMBEDDING_PROVIDER", other.to_string()));
                }
            },
            base_url: env_str("EMBEDDING_BASE_URL"),
            api_key: env_str("EMBEDDING_API_KEY"),
            model_name: env_str("EMBEDDING_MODEL_NAME"),
            dimensions: env_parse("EMBEDDING_DIMENSIONS", 256)?,
        };

        let rerank = RerankConfig {
            enabled: env_parse("RERANKING_ENABLED", true)?,
            candidates: env_parse("RERANKING_CANDIDATES", 100)?,
            results: env_parse("RERANKING_RESULTS", 10)?,
            budget: Duration::from_millis(env_parse("RERANKING_BUDGET_MS", 300u64)?),
        };

        let consolidation = ConsolidationConfig {
            forgetting_enabled: env_parse("FORGETTING_ENABLED", false)?,
            ..ConsolidationConfig::default()
        };

        Ok(Self {
            database_path,
            database_max_conns: env_parse("DATABASE_MAX_CONNS", 10)?,
            worker_host: env_str("WORKER_HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            worker_port: env_parse("WORKER_PORT", 37777)?,
            worker_token: env_str("WORKER_TOKEN"),
            context_observations: env_parse("CONTEXT_OBSERVATIONS", 100)?,
            context_full_count: env_parse("CONTEXT_FULL_COUNT", 25)?,
            rerank,
            search: SearchConfig::default(),
            consolidation,
            sessions_dir: env_str("SESSIONS_DIR").map(PathBuf::from),
            sessions_scan_interval: Duration::from_secs(env_parse("SESSIONS_SCAN_SECS", 30u64)?),
            workstation_id: env_str("WORKSTATION_ID"),
            ingest_queue_depth: env_parse("INGEST_QUEUE_DEPTH", 1024)?,
            // Local inference is CPU-bound; remote calls overlap on the wire
            embed_workers: env_parse(
                "EMBED_WORKERS",
                match embedding.provider {
                    EmbeddingProviderKind::Local => default_workers(),
                    EmbeddingProviderKind::Remote => 8,
                },
            )?,
            embedding,
        })
    }

    /// A configuration suitable for tests and the CLI: explicit database
    /// path, everything else defaulted.
    pub fn for_database(path: impl Into<PathBuf>) -> Self {
        Self {
            database_path: path.into(),
            database_max_conns: 10,
            worker_host: "127.0.0.1".to_string(),
            worker_port: 37777,
            worker_token: None,
            context_observations: 100,
            context_full_count: 25,
            embedding: EmbeddingConfig::default(),
            rerank: RerankConfig::default(),
            search: SearchConfig::default(),
            consolidation: ConsolidationConfig::default(),
            sessions_dir: None,
            sessions_scan_interval: Duration::from_secs(30),
            workstation_id: None,
            ingest_queue_depth: 1024,
            embed_workers: default_workers(),
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn parse_dsn(dsn: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = dsn.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingDsn);
    }
    let path = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed);
    if path.is_empty() {
        return Err(ConfigError::MissingDsn);
    }
    Ok(PathBuf::from(path))
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_parse<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    match env_str(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(key, raw)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dsn_prefixes_are_stripped() {
        assert_eq!(parse_dsn("/tmp/mem.db").unwrap(), PathBuf::from("/tmp/mem.db"));
        assert_eq!(parse_dsn("sqlite:///tmp/mem.db").unwrap(), PathBuf::from("/tmp/mem.db"));
        assert_eq!(parse_dsn("sqlite:mem.db").unwrap(), PathBuf::from("mem.db"));
        assert!(parse_dsn("   ").is_err());
    }

    #[test]
    fn defaults_match_contract() {
        let cfg = Config::for_database("/tmp/x.db");
        assert_eq!(cfg.worker_port, 37777);
        assert_eq!(cfg.database_max_conns, 10);
        assert_eq!(cfg.context_observations, 100);
        assert_eq!(cfg.context_full_count, 25);
        assert_eq!(cfg.embedding.dimensions, 256);
        assert!(cfg.rerank.enabled);
        assert_eq!(cfg.rerank.budget, Duration::from_millis(300));
        assert_eq!(cfg.search.rrf_k, 60.0);
        assert_eq!(cfg.search.short_circuit_threshold, 0.85);
        assert!(!cfg.consolidation.forgetting_enabled);
        assert_eq!(cfg.consolidation.association_sample, 500);
        assert_eq!(cfg.ingest_queue_depth, 1024);
    }
}
