//! `get_recent_context` operation

use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use engram_core::{identity, ObservationFilter};

use super::{blocking, parse_args, Result, ToolError};
use crate::inject;
use crate::state::AppState;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "project": { "type": "string", "description": "Project id" },
            "cwd": { "type": "string", "description": "Working directory, used when project is absent" },
            "limit": { "type": "integer", "description": "Observation cap; defaults to the configured injection size" }
        }
    })
}

#[derive(Debug, Deserialize)]
struct ContextArgs {
    project: Option<String>,
    cwd: Option<String>,
    limit: Option<usize>,
}

pub async fn get_recent_context(state: &AppState, args: Value) -> Result<Value> {
    let args: ContextArgs = parse_args(args)?;
    let project = args
        .project
        .filter(|p| !p.trim().is_empty())
        .or_else(|| {
            args.cwd
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .map(|c| identity::project_id(std::path::Path::new(c)))
        })
        .ok_or_else(|| ToolError::InvalidArgs("project or cwd is required".into()))?;

    let limit = args
        .limit
        .unwrap_or(state.config.context_observations)
        .clamp(1, 500);
    let full_count = state.config.context_full_count;

    let store = Arc::clone(&state.store);
    let project_clone = project.clone();
    let observations = blocking(move || {
        Ok(store.list_by_filter(&ObservationFilter::project(&project_clone), limit, 0)?)
    })
    .await?;

    Ok(json!({
        "project": project,
        "payload": inject::context_payload(&observations, full_count),
        "rendered": inject::render_memory_context(&observations, full_count),
    }))
}
