//! Chronological operations: `timeline`, `decisions`, `changes`

use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use engram_core::{Observation, ObservationFilter, ObservationType};

use super::{blocking, parse_args, Result};
use crate::state::AppState;

pub fn timeline_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string" },
            "days": { "type": "integer", "default": 7, "minimum": 1, "maximum": 90 },
            "limit": { "type": "integer", "default": 200, "minimum": 1, "maximum": 500 }
        },
        "required": ["project"]
    })
}

pub fn decisions_schema() -> Value {
    by_kind_schema()
}

pub fn changes_schema() -> Value {
    by_kind_schema()
}

fn by_kind_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string" },
            "limit": { "type": "integer", "default": 20, "minimum": 1, "maximum": 100 }
        },
        "required": ["project"]
    })
}

#[derive(Debug, Deserialize)]
struct TimelineArgs {
    project: String,
    days: Option<i64>,
    limit: Option<usize>,
}

pub async fn timeline(state: &AppState, args: Value) -> Result<Value> {
    let args: TimelineArgs = parse_args(args)?;
    let days = args.days.unwrap_or(7).clamp(1, 90);
    let limit = args.limit.unwrap_or(200).clamp(1, 500);

    let mut filter = ObservationFilter::project(&args.project);
    filter.created_after = Some(Utc::now() - Duration::days(days));

    let store = Arc::clone(&state.store);
    let rows = blocking(move || Ok(store.list_by_filter(&filter, limit, 0)?)).await?;

    // Group by calendar day, newest day first
    let mut by_day: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for obs in &rows {
        by_day
            .entry(obs.created_at.format("%Y-%m-%d").to_string())
            .or_default()
            .push(brief(obs));
    }
    let timeline: Vec<Value> = by_day
        .into_iter()
        .rev()
        .map(|(date, observations)| {
            json!({ "date": date, "count": observations.len(), "observations": observations })
        })
        .collect();

    Ok(json!({ "days": days, "total": rows.len(), "timeline": timeline }))
}

#[derive(Debug, Deserialize)]
struct ByKindArgs {
    project: String,
    limit: Option<usize>,
}

pub async fn decisions(state: &AppState, args: Value) -> Result<Value> {
    by_kind(state, args, ObservationType::Decision).await
}

pub async fn changes(state: &AppState, args: Value) -> Result<Value> {
    by_kind(state, args, ObservationType::Change).await
}

async fn by_kind(state: &AppState, args: Value, kind: ObservationType) -> Result<Value> {
    let args: ByKindArgs = parse_args(args)?;
    let limit = args.limit.unwrap_or(20).clamp(1, 100);

    let mut filter = ObservationFilter::project(&args.project);
    filter.kinds = vec![kind];

    let store = Arc::clone(&state.store);
    let rows = blocking(move || Ok(store.list_by_filter(&filter, limit, 0)?)).await?;

    Ok(json!({
        "total": rows.len(),
        "observations": rows.iter().map(detailed).collect::<Vec<Value>>(),
    }))
}

fn brief(obs: &Observation) -> Value {
    json!({
        "id": obs.id,
        "type": obs.kind.as_str(),
        "title": obs.title,
        "createdAt": obs.created_at.to_rfc3339(),
        "relevance": obs.relevance,
    })
}

fn detailed(obs: &Observation) -> Value {
    json!({
        "id": obs.id,
        "type": obs.kind.as_str(),
        "title": obs.title,
        "subtitle": obs.subtitle,
        "narrative": obs.narrative,
        "facts": obs.facts,
        "files": obs.files,
        "createdAt": obs.created_at.to_rfc3339(),
        "importance": obs.importance,
        "relevance": obs.relevance,
    })
}
