//! HTTP API
//!
//! JSON surface for hook ingest, retrieval, and administration, plus the
//! SSE stream of live updates. Bearer-token auth applies to everything
//! except liveness when a token is configured.

pub mod handlers;

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::ingest::IngestError;
use crate::state::AppState;
use engram_core::{SearchError, StoreError};

/// Request deadlines per endpoint class
pub const STATS_DEADLINE: Duration = Duration::from_millis(100);
pub const SEARCH_DEADLINE: Duration = Duration::from_secs(5);
pub const INGEST_DEADLINE: Duration = Duration::from_secs(10);

/// API error mapped onto HTTP status codes
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
    #[error("busy")]
    Busy,
    #[error("deadline exceeded")]
    Timeout,
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Busy => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::Validation(message) => ApiError::Validation(message),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<SearchError> for ApiError {
    fn from(e: SearchError) -> Self {
        match e {
            SearchError::InvalidQuery(message) => ApiError::Validation(message),
            SearchError::Store(inner) => inner.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::Busy => ApiError::Busy,
            IngestError::Invalid(message) => ApiError::Validation(message),
        }
    }
}

/// Run a handler future under its endpoint deadline.
pub async fn with_deadline<T, F>(deadline: Duration, future: F) -> Result<T, ApiError>
where
    F: std::future::Future<Output = Result<T, ApiError>>,
{
    match tokio::time::timeout(deadline, future).await {
        Ok(result) => result,
        Err(_) => Err(ApiError::Timeout),
    }
}

/// Hop store work onto a blocking thread.
pub async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(format!("task join: {e}")))?
}

/// Bearer-token check; `/api/health` stays open for probes.
async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.worker_token.as_deref() else {
        return next.run(request).await;
    };
    if request.uri().path() == "/api/health" {
        return next.run(request).await;
    }

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token == expected)
        .unwrap_or(false);

    if authorized {
        next.run(request).await
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "error": "missing or invalid bearer token" })),
        )
            .into_response()
    }
}

/// Build the full API router.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::DELETE,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let no_sniff = SetResponseHeaderLayer::overriding(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );

    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/version", get(handlers::version))
        .route("/api/stats", get(handlers::stats))
        .route("/api/maintenance", get(handlers::maintenance_log))
        .route("/api/sessions", get(handlers::get_or_create_session))
        .route("/api/sessions/observations", post(handlers::ingest_observation))
        .route(
            "/api/sessions/subagent-complete",
            post(handlers::subagent_complete),
        )
        .route("/sessions/{id}/summarize", post(handlers::summarize_session))
        .route("/api/context/inject", get(handlers::context_inject))
        .route(
            "/api/observations",
            get(handlers::list_observations).post(handlers::create_observation),
        )
        .route(
            "/api/observations/{id}",
            get(handlers::get_observation).post(handlers::update_observation),
        )
        .route("/api/observations/{id}/archive", post(handlers::archive_observation))
        .route("/api/observations/{id}/supersede", post(handlers::supersede_observation))
        .route("/api/observations/{id}/related", get(handlers::related_observations))
        .route("/api/observations/bulk-delete", post(handlers::bulk_delete))
        .route("/api/observations/bulk-update", post(handlers::bulk_update))
        .route("/api/search", get(handlers::search))
        .route("/api/events", get(handlers::event_stream))
        .layer(middleware::from_fn_with_state(state.clone(), require_token))
        .layer(ServiceBuilder::new().concurrency_limit(64).layer(cors).layer(no_sniff))
        .with_state(state)
}
