//! Tool surface
//!
//! A curated vocabulary of operations the assistant can call, each with a
//! typed argument schema. Both transports (line-delimited stdio and HTTP
//! streaming) route through [`dispatch`].

pub mod context;
pub mod lookup;
pub mod search;
pub mod stats;
pub mod timeline;

use serde::Serialize;
use serde_json::Value;

use crate::state::AppState;

/// Tool dispatch error
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown operation: {0}")]
    UnknownOp(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("{0}")]
    Failed(String),
}

impl From<engram_core::StoreError> for ToolError {
    fn from(e: engram_core::StoreError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

impl From<engram_core::SearchError> for ToolError {
    fn from(e: engram_core::SearchError) -> Self {
        ToolError::Failed(e.to_string())
    }
}

/// Result type for tool operations
pub type Result<T> = std::result::Result<T, ToolError>;

/// One operation in the vocabulary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescription {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The full operation list, as shown to the assistant.
pub fn descriptions() -> Vec<ToolDescription> {
    vec![
        ToolDescription {
            name: "search",
            description: "Hybrid memory search (vector + keyword + rank fusion, reranked). \
                          Returns ranked observations for a project.",
            input_schema: search::schema(),
        },
        ToolDescription {
            name: "timeline",
            description: "Browse a project's observations chronologically, grouped by day.",
            input_schema: timeline::timeline_schema(),
        },
        ToolDescription {
            name: "decisions",
            description: "List the project's recorded decisions, most relevant first.",
            input_schema: timeline::decisions_schema(),
        },
        ToolDescription {
            name: "changes",
            description: "List recent changes applied to the project.",
            input_schema: timeline::changes_schema(),
        },
        ToolDescription {
            name: "how_it_works",
            description: "Explain how something works from remembered patterns, insights, \
                          discoveries, and decisions.",
            input_schema: lookup::how_it_works_schema(),
        },
        ToolDescription {
            name: "find_by_file",
            description: "Observations referencing files under a path prefix.",
            input_schema: lookup::find_by_file_schema(),
        },
        ToolDescription {
            name: "find_by_tag",
            description: "Observations carrying a tag.",
            input_schema: lookup::find_by_tag_schema(),
        },
        ToolDescription {
            name: "find_by_concept",
            description: "Observations touching a concept.",
            input_schema: lookup::find_by_concept_schema(),
        },
        ToolDescription {
            name: "find_by_type",
            description: "Observations of one type (decision, discovery, change, ...).",
            input_schema: lookup::find_by_type_schema(),
        },
        ToolDescription {
            name: "find_similar",
            description: "Observations semantically nearest to a given one.",
            input_schema: lookup::find_similar_schema(),
        },
        ToolDescription {
            name: "find_related",
            description: "Observations connected through the relation graph (bounded traversal).",
            input_schema: lookup::find_related_schema(),
        },
        ToolDescription {
            name: "get_recent_context",
            description: "Top-ranked project memory rendered for injection at session start.",
            input_schema: context::schema(),
        },
        ToolDescription {
            name: "get_memory_stats",
            description: "Counters: observations, relations, sessions, averages.",
            input_schema: stats::stats_schema(),
        },
        ToolDescription {
            name: "run_consolidation",
            description: "Run consolidation now (decay, associations, and forgetting when enabled).",
            input_schema: stats::consolidation_schema(),
        },
    ]
}

/// Route one operation call.
pub async fn dispatch(state: &AppState, op: &str, args: Value) -> Result<Value> {
    match op {
        "search" => search::execute(state, args).await,
        "timeline" => timeline::timeline(state, args).await,
        "decisions" => timeline::decisions(state, args).await,
        "changes" => timeline::changes(state, args).await,
        "how_it_works" => lookup::how_it_works(state, args).await,
        "find_by_file" => lookup::find_by_file(state, args).await,
        "find_by_tag" => lookup::find_by_tag(state, args).await,
        "find_by_concept" => lookup::find_by_concept(state, args).await,
        "find_by_type" => lookup::find_by_type(state, args).await,
        "find_similar" => lookup::find_similar(state, args).await,
        "find_related" => lookup::find_related(state, args).await,
        "get_recent_context" => context::get_recent_context(state, args).await,
        "get_memory_stats" => stats::get_memory_stats(state, args).await,
        "run_consolidation" => stats::run_consolidation(state, args).await,
        other => Err(ToolError::UnknownOp(other.to_string())),
    }
}

/// Parse tool arguments against their declared shape.
pub(crate) fn parse_args<T: serde::de::DeserializeOwned>(args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| ToolError::InvalidArgs(e.to_string()))
}

/// Hop blocking store work off the async executor.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ToolError::Failed(format!("task join: {e}")))?
}
