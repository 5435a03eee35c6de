//! HTTP streaming transport
//!
//! The same envelope as the stdio transport, over HTTP:
//! - `GET  /tools` lists the operation vocabulary with schemas
//! - `POST /tools` takes one envelope in, one reply out; when the caller
//!   accepts `text/event-stream` the reply is framed as a single SSE event
//!
//! Replies carry an `engram-request-id` header so proxies (the stdio-to-SSE
//! bridge included) can correlate concurrent calls.

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::Event;
use axum::response::{IntoResponse, Response, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use uuid::Uuid;

use super::types::{ToolRequest, ToolResponse};
use crate::state::AppState;
use crate::tools;

/// Mountable router for the HTTP tool transport.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/tools", get(list_tools))
        .route("/tools", post(call_tool))
        .with_state(state)
}

async fn list_tools() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "tools": tools::descriptions() }))
}

async fn call_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let request: ToolRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => {
            let response = ToolResponse::failure(None, format!("parse error: {e}"));
            return (StatusCode::BAD_REQUEST, Json(response)).into_response();
        }
    };

    let request_id = Uuid::new_v4().to_string();
    let id = request.id.clone();
    let response = match tools::dispatch(&state, &request.op, request.args).await {
        Ok(result) => ToolResponse::success(id, result),
        Err(e) => ToolResponse::failure(id, e.to_string()),
    };

    let wants_sse = headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("text/event-stream"))
        .unwrap_or(false);

    if wants_sse {
        let payload = serde_json::to_string(&response).unwrap_or_default();
        let events = stream::once(async move {
            Ok::<_, std::convert::Infallible>(Event::default().event("result").data(payload))
        });
        (
            [("engram-request-id", request_id.as_str())],
            Sse::new(events),
        )
            .into_response()
    } else {
        (
            [("engram-request-id", request_id.as_str())],
            Json(response),
        )
            .into_response()
    }
}
