//! End-to-end flows over the core stack: ingest, retrieval, injection
//! ordering, consolidation, backup.

use chrono::{Duration, Utc};
use std::sync::Arc;

use engram_core::{
    ConsolidationConfig, Consolidator, CycleKind, ObservationFilter, ObservationPatch,
    ObservationType, SearchOptions, Store,
};
use engram_e2e::{TestMemory, DIMS};

#[test]
fn insert_then_inject_ranks_decisions_over_discoveries() {
    let memory = TestMemory::new();
    let decision = memory.insert(
        "proj_p",
        ObservationType::Decision,
        "adopt Postgres",
        "single writer was the bottleneck",
    );
    let discovery = memory.insert(
        "proj_p",
        ObservationType::Discovery,
        "use GIN index",
        "jsonb lookups got fast",
    );

    // Equalize the scores so only the type ordering differs
    let patch = ObservationPatch {
        importance: Some(0.6),
        ..Default::default()
    };
    memory
        .store
        .bulk_update(&[decision.id, discovery.id], &patch)
        .unwrap();
    memory
        .store
        .write_relevance(&[(decision.id, 0.5), (discovery.id, 0.5)])
        .unwrap();

    let rows = memory
        .store
        .list_by_filter(&ObservationFilter::project("proj_p"), 100, 0)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].kind, ObservationType::Decision);
    assert_eq!(rows[1].kind, ObservationType::Discovery);

    let payload = engram_server::inject::context_payload(&rows, 25);
    assert_eq!(payload["full_count"], 2);
    assert_eq!(payload["observations"][0]["title"], "adopt Postgres");
}

#[test]
fn search_is_project_isolated_on_every_path() {
    let memory = TestMemory::new();
    memory.insert(
        "proj_a",
        ObservationType::Note,
        "connection pooling notes",
        "pool size ten",
    );
    memory.insert(
        "proj_b",
        ObservationType::Note,
        "connection pooling notes",
        "pool size ten",
    );

    for mode in [
        engram_core::SearchMode::Hybrid,
        engram_core::SearchMode::Vector,
        engram_core::SearchMode::Lexical,
    ] {
        let options = SearchOptions {
            mode,
            rerank: false,
            ..SearchOptions::default()
        };
        let hits = memory
            .search
            .search(
                "connection pooling",
                &ObservationFilter::project("proj_a"),
                &options,
            )
            .unwrap();
        assert!(!hits.is_empty(), "{mode:?} found nothing");
        assert!(
            hits.iter().all(|h| h.observation.project == "proj_a"),
            "{mode:?} leaked another project"
        );
    }
}

#[test]
fn observation_json_round_trip_is_lossless() {
    let memory = TestMemory::new();
    let mut draft = engram_core::ObservationDraft::new(
        "proj_p",
        ObservationType::Error,
        "flaky integration test",
    );
    draft.narrative = "fails every third run on CI".into();
    draft.facts = vec!["started after the tokio upgrade".into()];
    draft.tags = vec!["ci".into(), "flaky".into()];
    draft.files = vec!["tests/integration.rs".into()];
    draft.concepts = vec!["testing".into()];
    let vector = memory.embedder.embed("flaky test").unwrap();
    let inserted = memory
        .store
        .insert_observation(&draft, Some(&vector), "m")
        .unwrap();

    let fetched = memory.store.get_by_id(inserted.id).unwrap().unwrap();
    let json = serde_json::to_string(&fetched).unwrap();
    let parsed: engram_core::Observation = serde_json::from_str(&json).unwrap();

    assert_eq!(
        serde_json::to_value(&fetched).unwrap(),
        serde_json::to_value(&parsed).unwrap()
    );
}

#[test]
fn consolidation_pipeline_decays_then_forgets() {
    let memory = TestMemory::new();
    let now = Utc::now();

    // An old, unimportant note and an old decision, both never accessed
    let mut stale = template("proj_p", ObservationType::Note, "stale note", now, 120);
    stale.importance = 0.4;
    let stale_id = memory
        .store
        .restore_observation(&stale, Some(&basis()), "m")
        .unwrap();

    let mut decision = template("proj_p", ObservationType::Decision, "old decision", now, 120);
    decision.importance = 0.4;
    let decision_id = memory
        .store
        .restore_observation(&decision, Some(&basis()), "m")
        .unwrap();

    let consolidator = Consolidator::new(
        Arc::clone(&memory.store),
        ConsolidationConfig {
            forgetting_enabled: true,
            ..ConsolidationConfig::default()
        },
    );

    // Decay drives both below the forgetting threshold
    consolidator.run_cycle(CycleKind::Decay).unwrap();
    let stale_relevance = memory.store.get_by_id(stale_id).unwrap().unwrap().relevance;
    assert!(stale_relevance < 0.1, "got {stale_relevance}");

    // Forgetting archives the note but protects the decision
    consolidator.run_cycle(CycleKind::Forget).unwrap();
    assert!(memory.store.get_by_id(stale_id).unwrap().unwrap().archived);
    assert!(!memory.store.get_by_id(decision_id).unwrap().unwrap().archived);

    // Archived rows no longer reach injection
    let rows = memory
        .store
        .list_by_filter(&ObservationFilter::project("proj_p"), 100, 0)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, decision_id);

    // ... but stay readable by id
    assert!(memory.store.get_by_id(stale_id).unwrap().is_some());
}

#[test]
fn backup_then_reopen_rebuilds_all_three_indexes() {
    let memory = TestMemory::new();
    let inserted = memory.insert(
        "proj_p",
        ObservationType::Discovery,
        "sqlite wal checkpoints",
        "wal keeps readers unblocked",
    );

    let backup_path = memory.dir.path().join("backup.db");
    memory.store.backup_to(&backup_path).unwrap();

    let restored = Store::open(&backup_path, 2, DIMS).unwrap();

    // Row store
    let row = restored.get_by_id(inserted.id).unwrap().unwrap();
    assert_eq!(row.title, "sqlite wal checkpoints");

    // Full-text index
    let filter = ObservationFilter::project("proj_p");
    let lexical = restored.keyword_search("wal checkpoint", &filter, 10).unwrap();
    assert_eq!(lexical[0].0, inserted.id);

    // Vector index, rebuilt from the embedding blobs
    let vector = memory.embedder.embed(&inserted.index_text()).unwrap();
    let semantic = restored.vector_query(&vector, 5, Some("proj_p")).unwrap();
    assert_eq!(semantic[0].0, inserted.id);
}

fn template(
    project: &str,
    kind: ObservationType,
    title: &str,
    now: chrono::DateTime<Utc>,
    age_days: i64,
) -> engram_core::Observation {
    let created = now - Duration::days(age_days);
    engram_core::Observation {
        id: 0,
        project: project.into(),
        session_id: None,
        workstation: "ws".into(),
        kind,
        title: title.into(),
        subtitle: String::new(),
        narrative: "aged".into(),
        facts: vec![],
        tags: vec![],
        files: vec![],
        concepts: vec![],
        importance: 0.5,
        confidence: 0.8,
        relevance: 1.0,
        access_count: 0,
        archived: false,
        superseded_by: None,
        embedding_pending: false,
        created_at: created,
        last_accessed: created,
    }
}

fn basis() -> Vec<f32> {
    let mut v = vec![0.0_f32; DIMS];
    v[0] = 1.0;
    v
}
