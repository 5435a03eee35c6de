//! API endpoint handlers

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use futures::Stream;
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast;

use engram_core::{
    distill::HookEvent, identity, privacy, ObservationDraft, ObservationFilter,
    ObservationPatch, ObservationSource, ObservationType, RelationType, SearchMode,
    SearchOptions, Session, SessionKey,
};

use super::{blocking, with_deadline, ApiError, INGEST_DEADLINE, SEARCH_DEADLINE, STATS_DEADLINE};
use crate::events::MemoryEvent;
use crate::inject;
use crate::state::AppState;

// ============================================================================
// LIVENESS AND STATS
// ============================================================================

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": engram_core::VERSION,
        "uptimeSecs": state.started_at.elapsed().as_secs(),
    }))
}

pub async fn version() -> Json<Value> {
    Json(json!({ "version": engram_core::VERSION }))
}

#[derive(Debug, Deserialize)]
pub struct StatsParams {
    pub project: Option<String>,
}

pub async fn stats(
    State(state): State<AppState>,
    Query(params): Query<StatsParams>,
) -> Result<Json<Value>, ApiError> {
    with_deadline(STATS_DEADLINE, async {
        let store = Arc::clone(&state.store);
        let stats =
            blocking(move || Ok(store.stats(params.project.as_deref())?)).await?;
        Ok(Json(serde_json::to_value(stats).unwrap_or_default()))
    })
    .await
}

#[derive(Debug, Deserialize)]
pub struct MaintenanceParams {
    pub limit: Option<usize>,
}

pub async fn maintenance_log(
    State(state): State<AppState>,
    Query(params): Query<MaintenanceParams>,
) -> Result<Json<Value>, ApiError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let store = Arc::clone(&state.store);
    let cycles = blocking(move || Ok(store.list_cycles(limit)?)).await?;
    Ok(Json(json!({ "cycles": cycles })))
}

// ============================================================================
// SESSIONS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionLookupParams {
    pub claude_session_id: String,
    pub project: Option<String>,
    pub cwd: Option<String>,
}

/// Look up a session by its host uuid, creating the row on first contact.
pub async fn get_or_create_session(
    State(state): State<AppState>,
    Query(params): Query<SessionLookupParams>,
) -> Result<Json<Value>, ApiError> {
    let store = Arc::clone(&state.store);
    let workstation = state.workstation.clone();

    let session = blocking(move || {
        if let Some(existing) =
            store.find_session_by_uuid(&params.claude_session_id, params.project.as_deref())?
        {
            return Ok(existing);
        }

        let project = resolve_project(params.project.as_deref(), params.cwd.as_deref())
            .ok_or_else(|| {
                ApiError::Validation("project or cwd is required to create a session".into())
            })?;
        let session = Session {
            key: SessionKey::new(workstation, project, params.claude_session_id.clone()),
            started_at: Utc::now(),
            ended_at: None,
            source_mtime: 0,
            summary: None,
            input_tokens: 0,
            output_tokens: 0,
            message_count: 0,
        };
        store.upsert_session(&session)?;
        Ok(session)
    })
    .await?;

    Ok(Json(serde_json::to_value(session).unwrap_or_default()))
}

/// Hook ingest: distill, redact, embed, and store, asynchronously behind
/// a bounded per-session queue. Answers fast; a degraded embedder is
/// signalled with a warning header, never a failure.
pub async fn ingest_observation(
    State(state): State<AppState>,
    Json(event): Json<HookEvent>,
) -> Result<Response, ApiError> {
    with_deadline(INGEST_DEADLINE, async {
        state.ingest.enqueue(event).await?;

        let mut response = (StatusCode::ACCEPTED, Json(json!({ "queued": true }))).into_response();
        if state.ingest.embedder_degraded() {
            response.headers_mut().insert(
                "x-engram-warning",
                axum::http::HeaderValue::from_static("embedding_unavailable"),
            );
        }
        Ok(response)
    })
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentCompleteBody {
    pub claude_session_id: String,
}

/// Flush a session's buffered subagent observations into the pipeline.
pub async fn subagent_complete(
    State(state): State<AppState>,
    Json(body): Json<SubagentCompleteBody>,
) -> Result<Json<Value>, ApiError> {
    let flushed = state.ingest.flush_deferred(&body.claude_session_id).await?;
    Ok(Json(json!({ "flushed": flushed })))
}

/// Build and store an extractive session summary.
pub async fn summarize_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let store = Arc::clone(&state.store);
    let events = state.events.clone();

    let summary = blocking(move || {
        let session = store
            .find_session_by_uuid(&id, None)?
            .ok_or(ApiError::NotFound)?;
        let messages = store.session_messages(&session.key)?;

        let first_prompt = messages
            .iter()
            .find(|m| m.role == "user")
            .map(|m| clip(&m.text, 240))
            .unwrap_or_else(|| "(no user prompt recorded)".to_string());
        let summary = format!(
            "{} - {} messages, {} in / {} out tokens",
            first_prompt, session.message_count, session.input_tokens, session.output_tokens
        );

        store.set_session_summary(&session.key, &summary)?;
        store.seal_session(&session.key, Utc::now())?;
        let _ = events.send(MemoryEvent::SessionSealed {
            project: session.key.project.clone(),
            session_uuid: session.key.session_uuid.clone(),
            timestamp: Utc::now(),
        });
        Ok(summary)
    })
    .await?;

    Ok(Json(json!({ "summary": summary })))
}

// ============================================================================
// CONTEXT INJECTION
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InjectParams {
    pub project: Option<String>,
    pub cwd: Option<String>,
}

pub async fn context_inject(
    State(state): State<AppState>,
    Query(params): Query<InjectParams>,
) -> Result<Json<Value>, ApiError> {
    let project = resolve_project(params.project.as_deref(), params.cwd.as_deref())
        .ok_or_else(|| ApiError::Validation("project or cwd is required".into()))?;

    let store = Arc::clone(&state.store);
    let limit = state.config.context_observations;
    let observations = blocking(move || {
        Ok(store.list_by_filter(&ObservationFilter::project(&project), limit, 0)?)
    })
    .await?;

    Ok(Json(inject::context_payload(
        &observations,
        state.config.context_full_count,
    )))
}

// ============================================================================
// OBSERVATION CRUD
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationListParams {
    pub project: String,
    /// Comma-separated type names
    pub r#type: Option<String>,
    pub tag: Option<String>,
    pub concept: Option<String>,
    pub file_prefix: Option<String>,
    pub min_importance: Option<f64>,
    pub archived: Option<bool>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ObservationListParams {
    fn filter(&self) -> ObservationFilter {
        let mut filter = ObservationFilter::project(&self.project);
        if let Some(kinds) = &self.r#type {
            filter.kinds = kinds
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| ObservationType::parse_name(s.trim()))
                .collect();
        }
        if let Some(tag) = &self.tag {
            filter.tags = vec![tag.clone()];
        }
        if let Some(concept) = &self.concept {
            filter.concepts = vec![concept.clone()];
        }
        filter.file_prefix = self.file_prefix.clone();
        filter.min_importance = self.min_importance;
        filter.include_archived = self.archived.unwrap_or(false);
        filter
    }
}

pub async fn list_observations(
    State(state): State<AppState>,
    Query(params): Query<ObservationListParams>,
) -> Result<Json<Value>, ApiError> {
    let filter = params.filter();
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let offset = params.offset.unwrap_or(0);

    let store = Arc::clone(&state.store);
    let rows = blocking(move || Ok(store.list_by_filter(&filter, limit, offset)?)).await?;
    Ok(Json(json!({ "total": rows.len(), "observations": rows })))
}

/// Create an observation directly through the API (tool-curated source).
pub async fn create_observation(
    State(state): State<AppState>,
    Json(mut draft): Json<ObservationDraft>,
) -> Result<Json<Value>, ApiError> {
    draft.source = ObservationSource::Tool;
    if draft.workstation.is_empty() {
        draft.workstation = state.workstation.clone();
    }
    draft.title = privacy::redact(&draft.title);
    draft.subtitle = privacy::redact(&draft.subtitle);
    draft.narrative = privacy::redact(&draft.narrative);
    draft.facts = draft.facts.iter().map(|f| privacy::redact(f)).collect();

    let search = Arc::clone(&state.search);
    let observation = blocking(move || {
        let embedding = match search.embedder().embed(&draft.index_text()) {
            Ok(vector) => Some(vector),
            Err(e) => {
                tracing::warn!("embedding unavailable on create, deferring: {e}");
                None
            }
        };
        let model = search.embedder().model_name().to_string();
        Ok(search
            .store()
            .insert_observation(&draft, embedding.as_deref(), &model)?)
    })
    .await?;

    state.emit(MemoryEvent::ObservationCreated {
        id: observation.id,
        project: observation.project.clone(),
        kind: observation.kind.as_str().to_string(),
        title: observation.title.clone(),
        timestamp: observation.created_at,
    });
    Ok(Json(serde_json::to_value(observation).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct GetObservationParams {
    pub project: Option<String>,
}

pub async fn get_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<GetObservationParams>,
) -> Result<Json<Value>, ApiError> {
    let store = Arc::clone(&state.store);
    let observation = blocking(move || {
        let observation = store.get_by_id(id)?.ok_or(ApiError::NotFound)?;
        if let Some(project) = &params.project {
            if observation.project != *project {
                return Err(ApiError::NotFound);
            }
        }
        Ok(observation)
    })
    .await?;
    Ok(Json(serde_json::to_value(observation).unwrap_or_default()))
}

/// Typed edit. Text changes are re-embedded in place; when the embedder is
/// down the row is left embedding-pending for the sweep.
pub async fn update_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut patch): Json<ObservationPatch>,
) -> Result<Json<Value>, ApiError> {
    patch.title = patch.title.map(|t| privacy::redact(&t));
    patch.subtitle = patch.subtitle.map(|t| privacy::redact(&t));
    patch.narrative = patch.narrative.map(|t| privacy::redact(&t));
    patch.facts = patch
        .facts
        .map(|facts| facts.iter().map(|f| privacy::redact(f)).collect());

    let search = Arc::clone(&state.search);
    let observation = blocking(move || {
        let embedding = if patch.changes_text() {
            let current = search
                .store()
                .get_by_id(id)?
                .ok_or(ApiError::NotFound)?;
            let text = patched_text(&current, &patch);
            match search.embedder().embed(&text) {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::warn!("embedding unavailable on edit, deferring: {e}");
                    None
                }
            }
        } else {
            None
        };
        Ok(search
            .store()
            .update_observation(id, &patch, embedding.as_deref())?)
    })
    .await?;

    state.emit(MemoryEvent::ObservationUpdated {
        id: observation.id,
        project: observation.project.clone(),
        timestamp: Utc::now(),
    });
    Ok(Json(serde_json::to_value(observation).unwrap_or_default()))
}

pub async fn archive_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let store = Arc::clone(&state.store);
    let observation = blocking(move || Ok(store.archive(id)?)).await?;

    state.emit(MemoryEvent::ObservationArchived {
        id: observation.id,
        project: observation.project.clone(),
        timestamp: Utc::now(),
    });
    Ok(Json(serde_json::to_value(observation).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct SupersedeBody {
    /// The newer observation that replaces this one
    pub by: i64,
}

pub async fn supersede_observation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<SupersedeBody>,
) -> Result<Json<Value>, ApiError> {
    let store = Arc::clone(&state.store);
    blocking(move || Ok(store.supersede(id, body.by)?)).await?;
    Ok(Json(json!({ "superseded": id, "by": body.by })))
}

#[derive(Debug, Deserialize)]
pub struct RelatedParams {
    pub depth: Option<u32>,
    /// Comma-separated relation type allow-list
    pub types: Option<String>,
}

pub async fn related_observations(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(params): Query<RelatedParams>,
) -> Result<Json<Value>, ApiError> {
    let depth = params.depth.unwrap_or(2);
    let kinds: Vec<RelationType> = params
        .types
        .as_deref()
        .unwrap_or("")
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect();

    let store = Arc::clone(&state.store);
    let (hits, observations) = blocking(move || {
        let hits = store.traverse_relations(id, depth, &kinds)?;
        let mut ids: Vec<i64> = hits
            .iter()
            .flat_map(|h| [h.relation.from, h.relation.to])
            .filter(|other| *other != id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        let observations = store.batch_get(&ids)?;
        Ok((hits, observations))
    })
    .await?;

    Ok(Json(json!({ "relations": hits, "observations": observations })))
}

#[derive(Debug, Deserialize)]
pub struct BulkDeleteBody {
    pub ids: Vec<i64>,
}

pub async fn bulk_delete(
    State(state): State<AppState>,
    Json(body): Json<BulkDeleteBody>,
) -> Result<Json<Value>, ApiError> {
    if body.ids.is_empty() {
        return Err(ApiError::Validation("ids cannot be empty".into()));
    }
    let store = Arc::clone(&state.store);
    let deleted = blocking(move || Ok(store.delete(&body.ids)?)).await?;
    Ok(Json(json!({ "deleted": deleted })))
}

#[derive(Debug, Deserialize)]
pub struct BulkUpdateBody {
    pub ids: Vec<i64>,
    pub patch: ObservationPatch,
}

pub async fn bulk_update(
    State(state): State<AppState>,
    Json(body): Json<BulkUpdateBody>,
) -> Result<Json<Value>, ApiError> {
    if body.ids.is_empty() {
        return Err(ApiError::Validation("ids cannot be empty".into()));
    }
    let store = Arc::clone(&state.store);
    let updated = blocking(move || Ok(store.bulk_update(&body.ids, &body.patch)?)).await?;
    Ok(Json(json!({ "updated": updated })))
}

// ============================================================================
// SEARCH
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub project: String,
    pub q: String,
    pub mode: Option<SearchMode>,
    pub top_k: Option<usize>,
    pub candidates: Option<usize>,
    pub rerank: Option<bool>,
    pub explain: Option<bool>,
    pub r#type: Option<String>,
    pub tag: Option<String>,
    pub min_importance: Option<f64>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Value>, ApiError> {
    with_deadline(SEARCH_DEADLINE, async {
        let mut filter = ObservationFilter::project(&params.project);
        if let Some(kinds) = &params.r#type {
            filter.kinds = kinds
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| ObservationType::parse_name(s.trim()))
                .collect();
        }
        if let Some(tag) = &params.tag {
            filter.tags = vec![tag.clone()];
        }
        filter.min_importance = params.min_importance;

        let options = SearchOptions {
            top_k: params.top_k.unwrap_or(10).clamp(1, 100),
            candidates: params.candidates.unwrap_or(100).clamp(10, 1000),
            rerank: params.rerank.unwrap_or(true),
            mode: params.mode.unwrap_or_default(),
            explain: params.explain.unwrap_or(false),
            ..SearchOptions::default()
        };

        let search_manager = Arc::clone(&state.search);
        let query = params.q.clone();
        let started = std::time::Instant::now();
        let hits =
            blocking(move || Ok(search_manager.search(&query, &filter, &options)?)).await?;

        state.emit(MemoryEvent::SearchPerformed {
            project: params.project.clone(),
            query: params.q.clone(),
            result_count: hits.len(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        Ok(Json(json!({ "total": hits.len(), "results": hits })))
    })
    .await
}

// ============================================================================
// EVENTS (SSE)
// ============================================================================

pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let sse = Event::default().event(event.name()).data(event.to_json());
                    return Some((Ok(sse), rx));
                }
                // Slow consumer: drop what was missed, keep streaming
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

// ============================================================================
// HELPERS
// ============================================================================

fn resolve_project(project: Option<&str>, cwd: Option<&str>) -> Option<String> {
    if let Some(project) = project {
        if !project.trim().is_empty() {
            return Some(project.trim().to_string());
        }
    }
    cwd.filter(|c| !c.trim().is_empty())
        .map(|c| identity::project_id(std::path::Path::new(c)))
}

/// The post-patch indexed text, for re-embedding edited observations.
fn patched_text(current: &engram_core::Observation, patch: &ObservationPatch) -> String {
    let title = patch.title.as_deref().unwrap_or(&current.title);
    let subtitle = patch.subtitle.as_deref().unwrap_or(&current.subtitle);
    let narrative = patch.narrative.as_deref().unwrap_or(&current.narrative);
    let facts = patch.facts.as_deref().unwrap_or(&current.facts);

    let mut text = title.to_string();
    if !subtitle.is_empty() {
        text.push('\n');
        text.push_str(subtitle);
    }
    if !narrative.is_empty() {
        text.push('\n');
        text.push_str(narrative);
    }
    for fact in facts {
        text.push('\n');
        text.push_str(fact);
    }
    text
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
