//! Tool-surface flows: envelope parsing, dispatch, and the ingest hub
//! feeding retrieval.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use engram_core::{ConsolidationConfig, Consolidator, HookEvent, ObservationFilter, ObservationType};
use engram_e2e::{TestMemory, TokenHashEmbedder};
use engram_server::events::MemoryEvent;
use engram_server::ingest::IngestHub;
use engram_server::protocol::{ToolRequest, ToolResponse};
use engram_server::state::AppState;
use engram_server::tools;

fn app_state(memory: &TestMemory) -> AppState {
    let (events, _) = broadcast::channel(64);
    let consolidator = Arc::new(Consolidator::new(
        Arc::clone(&memory.store),
        ConsolidationConfig::default(),
    ));
    let ingest = IngestHub::new(
        Arc::clone(&memory.store),
        Arc::new(TokenHashEmbedder),
        events.clone(),
        "ws-e2e".into(),
        16,
        2,
    );
    AppState {
        config: Arc::new(memory.config()),
        store: Arc::clone(&memory.store),
        search: Arc::clone(&memory.search),
        consolidator,
        ingest,
        events,
        workstation: "ws-e2e".into(),
        started_at: Instant::now(),
    }
}

fn edit_event(session: &str, file: &str, new_text: &str) -> HookEvent {
    HookEvent {
        claude_session_id: Some(session.into()),
        project: Some("proj_e2e".into()),
        tool_name: Some("Edit".into()),
        tool_input: Some(serde_json::json!({
            "file_path": file,
            "old_string": "before",
            "new_string": new_text,
        })),
        tool_response: Some(serde_json::json!({})),
        cwd: Some("/home/dev/e2e".into()),
    }
}

async fn drain(state: &AppState, expected: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let n = state
            .store
            .list_by_filter(&ObservationFilter::project("proj_e2e"), 100, 0)
            .unwrap()
            .len();
        if n >= expected {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "pipeline never produced {expected} observations"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn hook_events_flow_into_searchable_memory() {
    let memory = TestMemory::new();
    let state = app_state(&memory);
    let mut event_rx = state.events.subscribe();

    state
        .ingest
        .enqueue(edit_event(
            "sess-1",
            "/home/dev/e2e/src/ingest.rs",
            "bounded queue with busy fail-fast",
        ))
        .await
        .unwrap();
    drain(&state, 1).await;

    // The write was announced on the event stream
    let announced = tokio::time::timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("event within deadline")
        .expect("channel open");
    match announced {
        MemoryEvent::ObservationCreated { project, kind, .. } => {
            assert_eq!(project, "proj_e2e");
            assert_eq!(kind, "change");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // And is retrievable through the tool surface
    let result = tools::dispatch(
        &state,
        "search",
        serde_json::json!({
            "project": "proj_e2e",
            "query": "ingest queue",
            "rerank": false,
        }),
    )
    .await
    .unwrap();
    assert!(result["total"].as_u64().unwrap() >= 1);
    let first = &result["results"][0]["observation"];
    assert_eq!(first["project"], "proj_e2e");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_envelope_round_trips_through_dispatch() {
    let memory = TestMemory::new();
    memory.insert(
        "proj_e2e",
        ObservationType::Decision,
        "keep the stdio transport line-delimited",
        "simplest thing that the bridge can proxy",
    );
    let state = app_state(&memory);

    // The exact wire shape a stdio client would send
    let raw = r#"{"id": 42, "op": "decisions", "args": {"project": "proj_e2e"}}"#;
    let request: ToolRequest = serde_json::from_str(raw).unwrap();
    let id = request.id.clone();

    let response = match tools::dispatch(&state, &request.op, request.args).await {
        Ok(result) => ToolResponse::success(id, result),
        Err(e) => ToolResponse::failure(id, e.to_string()),
    };
    assert!(response.ok);
    let result = response.result.unwrap();
    assert_eq!(result["total"], 1);
    assert_eq!(
        result["observations"][0]["title"],
        "keep the stdio transport line-delimited"
    );

    // Unknown ops fail without crashing the transport
    let response = match tools::dispatch(&state, "frobnicate", serde_json::json!({})).await {
        Ok(result) => ToolResponse::success(None, result),
        Err(e) => ToolResponse::failure(None, e.to_string()),
    };
    assert!(!response.ok);
    assert!(response.error.unwrap().contains("unknown operation"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn recent_context_renders_the_injection_block() {
    let memory = TestMemory::new();
    memory.insert(
        "proj_e2e",
        ObservationType::Decision,
        "adopt Postgres",
        "single writer was the bottleneck",
    );
    let state = app_state(&memory);

    let result = tools::dispatch(
        &state,
        "get_recent_context",
        serde_json::json!({ "project": "proj_e2e" }),
    )
    .await
    .unwrap();

    let rendered = result["rendered"].as_str().unwrap();
    assert!(rendered.starts_with("<memory-context>"));
    assert!(rendered.contains("adopt Postgres"));
    assert_eq!(result["payload"]["full_count"], 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_consolidation_through_the_tool_surface() {
    let memory = TestMemory::new();
    memory.insert(
        "proj_e2e",
        ObservationType::Note,
        "a note to decay",
        "some narrative",
    );
    let state = app_state(&memory);

    let result = tools::dispatch(
        &state,
        "run_consolidation",
        serde_json::json!({ "cycle": "decay" }),
    )
    .await
    .unwrap();
    assert_eq!(result["cycles"][0]["updated"], 1);

    // The run is visible in the maintenance log
    let cycles = state.store.list_cycles(10).unwrap();
    assert_eq!(cycles[0].cycle, "decay");
}
