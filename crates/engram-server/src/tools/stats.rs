//! Admin operations: `get_memory_stats`, `run_consolidation`

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use engram_core::CycleKind;

use super::{blocking, parse_args, Result, ToolError};
use crate::state::AppState;

pub fn stats_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "Scope to one project; omit for global totals" }
        }
    })
}

pub fn consolidation_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "cycle": {
                "type": "string",
                "enum": ["decay", "associate", "forget", "all"],
                "default": "all"
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct StatsArgs {
    project: Option<String>,
}

pub async fn get_memory_stats(state: &AppState, args: Value) -> Result<Value> {
    let args: StatsArgs = parse_args(args)?;
    let store = Arc::clone(&state.store);
    let stats = blocking(move || Ok(store.stats(args.project.as_deref())?)).await?;
    Ok(serde_json::to_value(stats).unwrap_or_default())
}

#[derive(Debug, Deserialize)]
struct ConsolidationArgs {
    cycle: Option<String>,
}

pub async fn run_consolidation(state: &AppState, args: Value) -> Result<Value> {
    let args: ConsolidationArgs = parse_args(args)?;
    let consolidator = Arc::clone(&state.consolidator);

    let outcomes = blocking(move || {
        let outcomes = match args.cycle.as_deref().unwrap_or("all") {
            "decay" => vec![consolidator.run_cycle(CycleKind::Decay)?],
            "associate" => vec![consolidator.run_cycle(CycleKind::Associate)?],
            "forget" => vec![consolidator.run_cycle(CycleKind::Forget)?],
            "all" => consolidator.run_all()?,
            other => return Err(ToolError::InvalidArgs(format!("unknown cycle: {other}"))),
        };
        Ok(outcomes)
    })
    .await?;

    Ok(json!({
        "cycles": outcomes
            .iter()
            .map(|o| json!({
                "scanned": o.scanned,
                "updated": o.updated,
                "emitted": o.emitted,
                "archived": o.archived,
                "errors": o.errors,
            }))
            .collect::<Vec<Value>>(),
    }))
}
