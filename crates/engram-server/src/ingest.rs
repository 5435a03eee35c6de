//! Ingest pipeline
//!
//! Hook events flow through a bounded per-session queue into a worker that
//! distills, redacts, embeds, and stores them. A full queue fails fast with
//! `busy` so hooks can back off. Embedding failures never lose the write:
//! the row lands with `embedding_pending` and a background sweep retries.
//!
//! Subagent tool events are buffered aside and only enter the pipeline
//! when the subagent-complete event flushes them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex, Semaphore};

use engram_core::{
    distill, privacy, EmbeddingProvider, HookEvent, ObservationDraft, Store,
};

use crate::events::MemoryEvent;

/// Ingest rejection
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The session's queue is full; the caller should back off and retry
    #[error("ingest queue full")]
    Busy,
    /// Malformed hook payload
    #[error("invalid hook payload: {0}")]
    Invalid(String),
}

/// Per-session bounded queues feeding the ingest workers
pub struct IngestHub {
    store: Arc<Store>,
    embedder: Arc<dyn EmbeddingProvider>,
    events: broadcast::Sender<MemoryEvent>,
    workstation: String,
    queue_depth: usize,
    /// Bounded worker pool for embedding inference
    embed_slots: Arc<Semaphore>,
    queues: Mutex<HashMap<String, mpsc::Sender<HookEvent>>>,
    deferred: Mutex<HashMap<String, Vec<HookEvent>>>,
    /// Set while the embedder is failing; drives the ingest warning header
    embedder_degraded: AtomicBool,
}

impl IngestHub {
    pub fn new(
        store: Arc<Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        events: broadcast::Sender<MemoryEvent>,
        workstation: String,
        queue_depth: usize,
        embed_workers: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            embedder,
            events,
            workstation,
            queue_depth: queue_depth.max(1),
            embed_slots: Arc::new(Semaphore::new(embed_workers.max(1))),
            queues: Mutex::new(HashMap::new()),
            deferred: Mutex::new(HashMap::new()),
            embedder_degraded: AtomicBool::new(false),
        })
    }

    /// Whether recent embedding attempts failed.
    pub fn embedder_degraded(&self) -> bool {
        self.embedder_degraded.load(Ordering::Relaxed)
    }

    /// Queue a hook event for ingestion. Subagent (`Task`) events are
    /// buffered until their subagent completes.
    pub async fn enqueue(self: &Arc<Self>, event: HookEvent) -> Result<(), IngestError> {
        if event.resolve_project().is_none() {
            return Err(IngestError::Invalid("neither project nor cwd present".into()));
        }
        let session = event
            .claude_session_id
            .clone()
            .ok_or_else(|| IngestError::Invalid("claudeSessionId is required".into()))?;

        if event.tool_name.as_deref() == Some("Task") {
            self.deferred.lock().await.entry(session).or_default().push(event);
            return Ok(());
        }

        self.push(&session, event).await
    }

    /// Flush a session's buffered subagent events into its queue. Returns
    /// how many were flushed.
    pub async fn flush_deferred(self: &Arc<Self>, session: &str) -> Result<usize, IngestError> {
        let buffered = self
            .deferred
            .lock()
            .await
            .remove(session)
            .unwrap_or_default();
        let count = buffered.len();
        for event in buffered {
            self.push(session, event).await?;
        }
        Ok(count)
    }

    async fn push(self: &Arc<Self>, session: &str, event: HookEvent) -> Result<(), IngestError> {
        let sender = {
            let mut queues = self.queues.lock().await;
            match queues.get(session) {
                Some(sender) if !sender.is_closed() => sender.clone(),
                _ => {
                    let (tx, rx) = mpsc::channel(self.queue_depth);
                    queues.insert(session.to_string(), tx.clone());
                    let hub = Arc::clone(self);
                    tokio::spawn(hub.worker(rx));
                    tx
                }
            }
        };

        sender.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => IngestError::Busy,
            mpsc::error::TrySendError::Closed(_) => IngestError::Busy,
        })
    }

    async fn worker(self: Arc<Self>, mut rx: mpsc::Receiver<HookEvent>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.process(event).await {
                tracing::warn!("ingest event dropped: {e}");
            }
        }
    }

    async fn process(&self, event: HookEvent) -> anyhow::Result<()> {
        let Some(draft) = distill::distill(&event, &self.workstation) else {
            return Ok(());
        };
        let draft = redact_draft(draft);

        let embedding = self.embed(&draft.index_text()).await;
        let observation = {
            let store = Arc::clone(&self.store);
            let model = self.embedder.model_name().to_string();
            let draft = draft.clone();
            tokio::task::spawn_blocking(move || {
                store.insert_observation(&draft, embedding.as_deref(), &model)
            })
            .await??
        };

        let _ = self.events.send(MemoryEvent::ObservationCreated {
            id: observation.id,
            project: observation.project.clone(),
            kind: observation.kind.as_str().to_string(),
            title: observation.title.clone(),
            timestamp: observation.created_at,
        });
        Ok(())
    }

    /// Embed on the bounded worker pool. `None` marks the write
    /// embedding-pending for the sweep.
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let permit = match self.embed_slots.clone().try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                // Pool saturated: do not block ingest, let the sweep catch up
                self.embedder_degraded.store(true, Ordering::Relaxed);
                return None;
            }
        };

        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            embedder.embed(&text)
        })
        .await;

        match result {
            Ok(Ok(vector)) => {
                self.embedder_degraded.store(false, Ordering::Relaxed);
                Some(vector)
            }
            Ok(Err(e)) => {
                tracing::warn!("embedding unavailable, deferring: {e}");
                self.embedder_degraded.store(true, Ordering::Relaxed);
                None
            }
            Err(e) => {
                tracing::warn!("embed task panicked: {e}");
                self.embedder_degraded.store(true, Ordering::Relaxed);
                None
            }
        }
    }

    /// Retry pending embeddings until shutdown.
    pub async fn run_pending_sweep(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = tick.tick() => {}
                _ = shutdown.changed() => break,
            }
            if let Err(e) = self.sweep_once().await {
                tracing::warn!("pending-embedding sweep failed: {e}");
            }
        }
    }

    /// One sweep pass. Returns how many embeddings were attached.
    pub async fn sweep_once(&self) -> anyhow::Result<usize> {
        let pending = {
            let store = Arc::clone(&self.store);
            tokio::task::spawn_blocking(move || store.pending_embeddings(64)).await??
        };
        if pending.is_empty() {
            return Ok(0);
        }

        let mut attached = 0;
        for (id, text) in pending {
            let Some(vector) = self.embed(&text).await else {
                // Still unavailable, try again next tick
                break;
            };
            let store = Arc::clone(&self.store);
            let model = self.embedder.model_name().to_string();
            tokio::task::spawn_blocking(move || store.attach_embedding(id, &vector, &model))
                .await??;
            attached += 1;
        }
        if attached > 0 {
            tracing::info!(attached, "pending embeddings caught up");
        }
        Ok(attached)
    }
}

/// Run every text field through the privacy filter before it can reach an
/// index or the embedder.
fn redact_draft(mut draft: ObservationDraft) -> ObservationDraft {
    draft.title = privacy::redact(&draft.title);
    draft.subtitle = privacy::redact(&draft.subtitle);
    draft.narrative = privacy::redact(&draft.narrative);
    draft.facts = draft.facts.iter().map(|f| privacy::redact(f)).collect();
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use engram_core::{EmbeddingError, ObservationFilter};
    use serde_json::json;
    use tempfile::TempDir;

    struct FixedEmbedder {
        fail: AtomicBool,
    }

    impl EmbeddingProvider for FixedEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.fail.load(Ordering::Relaxed) {
                return Err(EmbeddingError::Unavailable("down".into()));
            }
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
    }

    fn hub(fail_embeddings: bool) -> (TempDir, Arc<IngestHub>, Arc<Store>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Store::open(&dir.path().join("engram.db"), 2, 4).unwrap());
        let (events, _) = broadcast::channel(64);
        let hub = IngestHub::new(
            Arc::clone(&store),
            Arc::new(FixedEmbedder {
                fail: AtomicBool::new(fail_embeddings),
            }),
            events,
            "ws-test".into(),
            4,
            2,
        );
        (dir, hub, store)
    }

    fn edit_event(session: &str, file: &str) -> HookEvent {
        HookEvent {
            claude_session_id: Some(session.into()),
            project: Some("api_1a2b3c".into()),
            tool_name: Some("Edit".into()),
            tool_input: Some(json!({"file_path": file, "old_string": "a", "new_string": "b"})),
            tool_response: Some(json!({})),
            cwd: Some("/home/dev/api".into()),
        }
    }

    async fn drain(store: &Arc<Store>, expected: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let n = store
                .list_by_filter(&ObservationFilter::project("api_1a2b3c"), 100, 0)
                .unwrap()
                .len();
            if n >= expected {
                return;
            }
            assert!(tokio::time::Instant::now() < deadline, "ingest never drained");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn events_become_observations() {
        let (_dir, hub, store) = hub(false);
        hub.enqueue(edit_event("sess-1", "/home/dev/api/src/lib.rs"))
            .await
            .unwrap();
        drain(&store, 1).await;

        let rows = store
            .list_by_filter(&ObservationFilter::project("api_1a2b3c"), 10, 0)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].embedding_pending);
        assert!(rows[0].title.contains("src/lib.rs"));
        assert_eq!(rows[0].session_id.as_deref(), Some("sess-1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn embedder_failure_defers_not_drops() {
        let (_dir, hub, store) = hub(true);
        hub.enqueue(edit_event("sess-1", "/home/dev/api/src/lib.rs"))
            .await
            .unwrap();
        drain(&store, 1).await;

        let rows = store
            .list_by_filter(&ObservationFilter::project("api_1a2b3c"), 10, 0)
            .unwrap();
        assert!(rows[0].embedding_pending, "write must land with pending flag");
        assert!(hub.embedder_degraded());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweep_attaches_pending_embeddings() {
        let (_dir, hub, store) = hub(false);
        // Row written while the embedder was down
        let draft = engram_core::ObservationDraft::new(
            "api_1a2b3c",
            engram_core::ObservationType::Note,
            "written while embedder was down",
        );
        let obs = store.insert_observation(&draft, None, "fixed").unwrap();
        assert!(obs.embedding_pending);

        let attached = hub.sweep_once().await.unwrap();
        assert_eq!(attached, 1);
        assert!(!store.get_by_id(obs.id).unwrap().unwrap().embedding_pending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_payloads_are_rejected() {
        let (_dir, hub, _store) = hub(false);

        let mut no_session = edit_event("sess-1", "/tmp/x");
        no_session.claude_session_id = None;
        assert!(matches!(
            hub.enqueue(no_session).await,
            Err(IngestError::Invalid(_))
        ));

        let mut no_project = edit_event("sess-1", "/tmp/x");
        no_project.project = None;
        no_project.cwd = None;
        assert!(matches!(
            hub.enqueue(no_project).await,
            Err(IngestError::Invalid(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn subagent_events_wait_for_completion() {
        let (_dir, hub, store) = hub(false);
        let task_event = HookEvent {
            claude_session_id: Some("sess-1".into()),
            project: Some("api_1a2b3c".into()),
            tool_name: Some("Task".into()),
            tool_input: Some(json!({"description": "audit error handling"})),
            tool_response: Some(json!("found three unwraps in the ingest path")),
            cwd: Some("/home/dev/api".into()),
        };
        hub.enqueue(task_event).await.unwrap();

        // Nothing lands until the flush
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store
            .list_by_filter(&ObservationFilter::project("api_1a2b3c"), 10, 0)
            .unwrap()
            .is_empty());

        let flushed = hub.flush_deferred("sess-1").await.unwrap();
        assert_eq!(flushed, 1);
        drain(&store, 1).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn secrets_are_redacted_before_storage() {
        let (_dir, hub, store) = hub(false);
        let mut event = edit_event("sess-1", "/home/dev/api/.env");
        event.tool_input = Some(json!({
            "file_path": "/home/dev/api/.env",
            "old_string": "API_KEY=old",
            "new_string": "API_KEY=sk-abcdefghijklmnopqrstuvwx1234"
        }));
        hub.enqueue(event).await.unwrap();
        drain(&store, 1).await;

        let rows = store
            .list_by_filter(&ObservationFilter::project("api_1a2b3c"), 10, 0)
            .unwrap();
        assert!(!rows[0].narrative.contains("sk-abcdef"));
        assert!(rows[0].narrative.contains(privacy::PLACEHOLDER));
    }
}
