//! Live update events
//!
//! Every write-side operation emits one of these onto a broadcast channel;
//! `/api/events` relays them to SSE subscribers.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One live update
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum MemoryEvent {
    #[serde(rename_all = "camelCase")]
    ObservationCreated {
        id: i64,
        project: String,
        kind: String,
        title: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ObservationUpdated {
        id: i64,
        project: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    ObservationArchived {
        id: i64,
        project: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SearchPerformed {
        project: String,
        query: String,
        result_count: usize,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    SessionSealed {
        project: String,
        session_uuid: String,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    CycleCompleted {
        cycle: String,
        updated: i64,
        emitted: i64,
        archived: i64,
        duration_ms: i64,
        timestamp: DateTime<Utc>,
    },
}

impl MemoryEvent {
    /// SSE event name
    pub fn name(&self) -> &'static str {
        match self {
            MemoryEvent::ObservationCreated { .. } => "observation.created",
            MemoryEvent::ObservationUpdated { .. } => "observation.updated",
            MemoryEvent::ObservationArchived { .. } => "observation.archived",
            MemoryEvent::SearchPerformed { .. } => "search.performed",
            MemoryEvent::SessionSealed { .. } => "session.sealed",
            MemoryEvent::CycleCompleted { .. } => "cycle.completed",
        }
    }

    /// Serialize for the wire
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
