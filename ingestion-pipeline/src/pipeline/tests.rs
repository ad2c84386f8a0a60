use std::{path::PathBuf, sync::Arc};

use chrono::Utc;
use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::ingested_record::IngestedRecord},
    utils::config::MultipleValuesPolicy,
};
use json_stream_parser::ParseError;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{
    config::{IngestionConfig, IngestionTuning},
    CycleError, IngestionPipeline,
};
use crate::{
    test_support::{pipeline_with, MockStore},
    watcher::{debounce::SettledFile, guard::DedupGuard, guard::ProcessingState},
};

fn small_chunks() -> IngestionConfig {
    IngestionConfig {
        tuning: IngestionTuning {
            read_chunk_bytes: 7,
            ..IngestionTuning::default()
        },
        ..IngestionConfig::default()
    }
}

fn sample_document() -> Value {
    json!({
        "name": "john",
        "address": {"city": "Oslo", "zip": "0150"},
        "tags": ["a", "b", {"deep": [1, 2.5, -3e2, null, true, false]}],
        "escaped": "line\nbreak \"quoted\" \u{e9}\u{1f600}",
        "empty": {},
        "none": []
    })
}

#[tokio::test]
async fn parse_reader_matches_serde_json_across_chunks() {
    let store = Arc::new(MockStore::new());
    let pipeline = pipeline_with(store, small_chunks());
    let bytes = serde_json::to_vec_pretty(&sample_document()).unwrap();

    let parsed = pipeline.parse_reader(&bytes[..]).await.expect("parse");

    let expected: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(parsed, expected);
}

#[tokio::test]
async fn parse_reader_rejects_truncated_and_empty_streams() {
    let pipeline = pipeline_with(Arc::new(MockStore::new()), small_chunks());

    let truncated = pipeline
        .parse_reader(&br#"{"name": "john", "list": [1, 2"#[..])
        .await
        .unwrap_err();
    assert!(matches!(truncated, AppError::Parse(ParseError::UnexpectedEnd(_))));

    let empty = pipeline.parse_reader(&b"  \n "[..]).await.unwrap_err();
    assert!(matches!(empty, AppError::Parse(ParseError::Empty)));
}

#[tokio::test]
async fn trailing_values_follow_policy() {
    let input = br#"{"a": 1} {"b": 2}"#;

    let strict = pipeline_with(Arc::new(MockStore::new()), small_chunks());
    let err = strict.parse_reader(&input[..]).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Parse(ParseError::TrailingContent { .. })
    ));

    let lenient = pipeline_with(
        Arc::new(MockStore::new()),
        IngestionConfig {
            multiple_values: MultipleValuesPolicy::First,
            ..small_chunks()
        },
    );
    let first = lenient.parse_reader(&input[..]).await.expect("first value");
    assert_eq!(first, json!({"a": 1}));
}

#[tokio::test]
async fn commit_inserts_exactly_once() {
    let store = Arc::new(MockStore::new());
    let pipeline = pipeline_with(Arc::clone(&store), small_chunks());
    let before = Utc::now();

    let record = pipeline
        .commit("a.json", json!({"x": 1}))
        .await
        .expect("commit");

    assert_eq!(store.attempts(), 1);
    assert_eq!(record.filename, "a.json");
    assert_eq!(record.data, json!({"x": 1}));
    assert!(record.uploaded_at >= before);
    assert_eq!(store.records_for("a.json").len(), 1);
}

#[tokio::test]
async fn ingest_reader_classifies_failures_by_stage() {
    let store = Arc::new(MockStore::new());
    let pipeline = pipeline_with(Arc::clone(&store), small_chunks());
    let err = pipeline
        .ingest_reader("c.json", &br#"{"broken": "#[..])
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::Parse(_)));
    assert!(!err.needs_cooldown());
    assert_eq!(store.attempts(), 0);

    let failing = Arc::new(MockStore::failing());
    let pipeline = pipeline_with(Arc::clone(&failing), small_chunks());
    let err = pipeline
        .ingest_reader("c.json", &br#"{"ok": true}"#[..])
        .await
        .unwrap_err();
    assert!(matches!(err, CycleError::Commit(_)));
    assert!(err.needs_cooldown());
    assert_eq!(failing.attempts(), 1);
    assert!(matches!(err.into_inner(), AppError::InternalError(_)));
}

#[tokio::test]
async fn process_file_parses_then_commits() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("a.json");
    let document = sample_document();
    std::fs::write(&path, serde_json::to_vec(&document).unwrap()).unwrap();

    let store = Arc::new(MockStore::new());
    let pipeline = pipeline_with(Arc::clone(&store), small_chunks());
    let guard = DedupGuard::new();
    let file = SettledFile {
        filename: "a.json".to_string(),
        path,
        detected_at: Utc::now(),
    };
    guard.try_admit(&file);

    let record = pipeline.process_file(&file, &guard).await.expect("cycle");

    assert_eq!(record.data, document);
    assert_eq!(store.records_for("a.json").len(), 1);
    // Releasing is left to the caller.
    assert_eq!(guard.state_of("a.json"), Some(ProcessingState::Committing));
}

#[tokio::test]
async fn process_file_reports_missing_file_as_parse_failure() {
    let store = Arc::new(MockStore::new());
    let pipeline = pipeline_with(Arc::clone(&store), small_chunks());
    let guard = DedupGuard::new();
    let file = SettledFile {
        filename: "gone.json".to_string(),
        path: PathBuf::from("/definitely/not/here/gone.json"),
        detected_at: Utc::now(),
    };
    guard.try_admit(&file);

    let err = pipeline.process_file(&file, &guard).await.unwrap_err();
    assert!(matches!(err, CycleError::Parse(AppError::Io(_))));
    assert_eq!(store.attempts(), 0);
    assert_eq!(guard.state_of("gone.json"), Some(ProcessingState::Processing));
}

#[tokio::test]
async fn surreal_store_persists_committed_records() {
    let db = Arc::new(
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory surrealdb"),
    );
    db.ensure_initialized().await.expect("schema");
    let pipeline = IngestionPipeline::new(Arc::clone(&db), small_chunks());

    let committed = pipeline
        .ingest_reader("b.json", &br#"{"name": "jane", "n": [1, 2]}"#[..])
        .await
        .expect("ingest");

    let stored = IngestedRecord::find_by_filename(&db, "b.json")
        .await
        .expect("query")
        .expect("record present");
    assert_eq!(stored.id, committed.id);
    assert_eq!(stored.data, json!({"name": "jane", "n": [1, 2]}));
}
