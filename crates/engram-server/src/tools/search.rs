//! `search` operation

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use engram_core::{ObservationFilter, ObservationType, SearchMode, SearchOptions};

use super::{blocking, parse_args, Result};
use crate::state::AppState;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "Project id" },
            "query": { "type": "string", "description": "Search query (phrases, -negation, OR)" },
            "topK": { "type": "integer", "default": 10, "minimum": 1, "maximum": 100 },
            "mode": { "type": "string", "enum": ["hybrid", "vector", "lexical"], "default": "hybrid" },
            "type": { "type": "string", "description": "Comma-separated observation types" },
            "rerank": { "type": "boolean", "default": true },
            "explain": { "type": "boolean", "default": false }
        },
        "required": ["project", "query"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    project: String,
    query: String,
    top_k: Option<usize>,
    mode: Option<SearchMode>,
    r#type: Option<String>,
    rerank: Option<bool>,
    explain: Option<bool>,
}

pub async fn execute(state: &AppState, args: Value) -> Result<Value> {
    let args: SearchArgs = parse_args(args)?;

    let mut filter = ObservationFilter::project(&args.project);
    if let Some(kinds) = &args.r#type {
        filter.kinds = kinds
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| ObservationType::parse_name(s.trim()))
            .collect();
    }

    let options = SearchOptions {
        top_k: args.top_k.unwrap_or(10).clamp(1, 100),
        mode: args.mode.unwrap_or_default(),
        rerank: args.rerank.unwrap_or(true),
        explain: args.explain.unwrap_or(false),
        ..SearchOptions::default()
    };

    let search = Arc::clone(&state.search);
    let query = args.query.clone();
    let hits = blocking(move || Ok(search.search(&query, &filter, &options)?)).await?;

    Ok(json!({
        "query": args.query,
        "total": hits.len(),
        "results": hits,
    }))
}
