//! Structured lookups: `find_by_*`, `find_similar`, `find_related`,
//! `how_it_works`

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use engram_core::{
    ObservationFilter, ObservationType, RelationType, SearchOptions,
};

use super::{blocking, parse_args, Result, ToolError};
use crate::state::AppState;

fn project_and<'a>(extra: &[(&'a str, Value)]) -> Value {
    let mut properties = serde_json::Map::new();
    properties.insert("project".into(), json!({ "type": "string" }));
    for (key, schema) in extra {
        properties.insert((*key).into(), schema.clone());
    }
    properties.insert(
        "limit".into(),
        json!({ "type": "integer", "default": 20, "minimum": 1, "maximum": 100 }),
    );
    json!({ "type": "object", "properties": properties, "required": ["project"] })
}

pub fn find_by_file_schema() -> Value {
    project_and(&[("prefix", json!({ "type": "string", "description": "Path prefix" }))])
}

pub fn find_by_tag_schema() -> Value {
    project_and(&[("tag", json!({ "type": "string" }))])
}

pub fn find_by_concept_schema() -> Value {
    project_and(&[("concept", json!({ "type": "string" }))])
}

pub fn find_by_type_schema() -> Value {
    project_and(&[(
        "type",
        json!({
            "type": "string",
            "enum": ["decision", "discovery", "change", "pattern", "insight", "error", "todo", "note"]
        }),
    )])
}

pub fn find_similar_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Anchor observation id" },
            "topK": { "type": "integer", "default": 10, "minimum": 1, "maximum": 50 }
        },
        "required": ["id"]
    })
}

pub fn find_related_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "integer", "description": "Start observation id" },
            "depth": { "type": "integer", "default": 2, "minimum": 1, "maximum": 6 },
            "types": { "type": "string", "description": "Comma-separated relation type allow-list" }
        },
        "required": ["id"]
    })
}

pub fn how_it_works_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string" },
            "query": { "type": "string", "description": "What to explain" },
            "topK": { "type": "integer", "default": 10, "minimum": 1, "maximum": 50 }
        },
        "required": ["project", "query"]
    })
}

// ============================================================================
// FILTERED LISTS
// ============================================================================

#[derive(Debug, Deserialize)]
struct FilteredArgs {
    project: String,
    prefix: Option<String>,
    tag: Option<String>,
    concept: Option<String>,
    r#type: Option<String>,
    limit: Option<usize>,
}

async fn filtered(state: &AppState, args: Value, required: &'static str) -> Result<Value> {
    let args: FilteredArgs = parse_args(args)?;
    let limit = args.limit.unwrap_or(20).clamp(1, 100);

    let mut filter = ObservationFilter::project(&args.project);
    match required {
        "prefix" => {
            filter.file_prefix = Some(
                args.prefix
                    .ok_or_else(|| ToolError::InvalidArgs("prefix is required".into()))?,
            );
        }
        "tag" => {
            filter.tags = vec![args
                .tag
                .ok_or_else(|| ToolError::InvalidArgs("tag is required".into()))?];
        }
        "concept" => {
            filter.concepts = vec![args
                .concept
                .ok_or_else(|| ToolError::InvalidArgs("concept is required".into()))?];
        }
        _ => {
            let kind = args
                .r#type
                .ok_or_else(|| ToolError::InvalidArgs("type is required".into()))?;
            filter.kinds = vec![ObservationType::parse_name(&kind)];
        }
    }

    let store = Arc::clone(&state.store);
    let rows = blocking(move || Ok(store.list_by_filter(&filter, limit, 0)?)).await?;
    Ok(json!({ "total": rows.len(), "observations": rows }))
}

pub async fn find_by_file(state: &AppState, args: Value) -> Result<Value> {
    filtered(state, args, "prefix").await
}

pub async fn find_by_tag(state: &AppState, args: Value) -> Result<Value> {
    filtered(state, args, "tag").await
}

pub async fn find_by_concept(state: &AppState, args: Value) -> Result<Value> {
    filtered(state, args, "concept").await
}

pub async fn find_by_type(state: &AppState, args: Value) -> Result<Value> {
    filtered(state, args, "type").await
}

// ============================================================================
// GRAPH AND SIMILARITY
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SimilarArgs {
    id: i64,
    top_k: Option<usize>,
}

pub async fn find_similar(state: &AppState, args: Value) -> Result<Value> {
    let args: SimilarArgs = parse_args(args)?;
    let top_k = args.top_k.unwrap_or(10).clamp(1, 50);

    let search = Arc::clone(&state.search);
    let hits = blocking(move || Ok(search.find_similar(args.id, top_k)?)).await?;
    Ok(json!({ "total": hits.len(), "results": hits }))
}

#[derive(Debug, Deserialize)]
struct RelatedArgs {
    id: i64,
    depth: Option<u32>,
    types: Option<String>,
}

pub async fn find_related(state: &AppState, args: Value) -> Result<Value> {
    let args: RelatedArgs = parse_args(args)?;
    let depth = args.depth.unwrap_or(2);
    let kinds: Vec<RelationType> = args
        .types
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let store = Arc::clone(&state.store);
    let (relations, observations) = blocking(move || {
        let relations = store.traverse_relations(args.id, depth, &kinds)?;
        let mut ids: Vec<i64> = relations
            .iter()
            .flat_map(|hit| [hit.relation.from, hit.relation.to])
            .filter(|other| *other != args.id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let observations = store.batch_get(&ids)?;
        Ok((relations, observations))
    })
    .await?;

    Ok(json!({ "relations": relations, "observations": observations }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HowItWorksArgs {
    project: String,
    query: String,
    top_k: Option<usize>,
}

/// Explanation-shaped retrieval: the same hybrid pipeline, restricted to
/// the observation types that carry understanding.
pub async fn how_it_works(state: &AppState, args: Value) -> Result<Value> {
    let args: HowItWorksArgs = parse_args(args)?;

    let mut filter = ObservationFilter::project(&args.project);
    filter.kinds = vec![
        ObservationType::Pattern,
        ObservationType::Insight,
        ObservationType::Discovery,
        ObservationType::Decision,
    ];

    let options = SearchOptions {
        top_k: args.top_k.unwrap_or(10).clamp(1, 50),
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
