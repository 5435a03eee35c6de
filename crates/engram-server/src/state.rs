//! Shared application state

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use engram_core::{Config, Consolidator, SearchManager, Store};

use crate::events::MemoryEvent;
use crate::ingest::IngestHub;

/// State shared by every handler, transport, and background task
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub search: Arc<SearchManager>,
    pub consolidator: Arc<Consolidator>,
    pub ingest: Arc<IngestHub>,
    pub events: broadcast::Sender<MemoryEvent>,
    pub workstation: String,
    pub started_at: Instant,
}

impl AppState {
    /// Emit an event to SSE subscribers (no-op when nobody listens).
    pub fn emit(&self, event: MemoryEvent) {
        let _ = self.events.send(event);
    }
}
