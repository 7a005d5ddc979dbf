//! Integration tests for Memoria

use futures::StreamExt;
use memoria::consolidation::prompts::{
    CONTRADICTION_HEADING, GROUP_HEADING, MERGE_HEADING, SHORTEN_HEADING,
};
use memoria::inference::{FailingInference, ScriptedInference};
use memoria::protocol::{resources, tools};
use memoria::{
    AnalysisMode, Assistant, CapabilityStore, Category, ConsolidationPipeline,
    ConsolidationSummary, InMemoryStore, Inference, InferenceClient, MemoriaConfig, MemoriaError,
    MemoryRecord, MemoryServer, MemoryStore, ProgressStep, SqliteMemoryStore,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn inference(client: Arc<dyn InferenceClient>) -> Inference {
    Inference::new(client, Duration::from_millis(200))
}

/// Deterministic model covering every phase of the seeded store below
fn household_model() -> Arc<ScriptedInference> {
    Arc::new(
        ScriptedInference::new()
            .reply_to(GROUP_HEADING, r#"{"groups": [[1, 2]]}"#)
            .reply_to(MERGE_HEADING, "user likes coffee")
            .reply_to(
                CONTRADICTION_HEADING,
                r#"{"contradictions": [{"ids": [3, 4], "older_id": 3, "reason": "gave up"}]}"#,
            )
            .reply_to(
                "Original: the user has a very fluffy orange cat",
                "has a fluffy orange cat",
            ),
    )
}

async fn seed(store: &dyn MemoryStore) {
    store.add(Category::Attribute, "user likes coffee").await.unwrap();
    store.add(Category::Attribute, "user enjoys coffee a lot").await.unwrap();
    store.add(Category::Goal, "wants to learn Spanish").await.unwrap();
    store.add(Category::Goal, "gave up learning Spanish").await.unwrap();
    store
        .add(Category::Note, "the user has a very fluffy orange cat")
        .await
        .unwrap();
}

fn contents(records: &[MemoryRecord]) -> Vec<&str> {
    let mut contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
    contents.sort();
    contents
}

/// A full run over the SQLite store, then a second run that changes nothing
#[tokio::test]
async fn test_sqlite_run_converges() {
    let temp_dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteMemoryStore::open(&temp_dir.path().join("memories.db")).unwrap());
    seed(store.as_ref()).await;

    let pipeline = ConsolidationPipeline::new(store.clone(), inference(household_model()));

    let first = pipeline.run_to_end().await;
    let summary = ConsolidationSummary::from_events(&first);
    assert_eq!(summary.merged_groups, 1);
    assert_eq!(summary.contradictions_resolved, 1);
    assert_eq!(summary.shortened, 1);
    assert_eq!(summary.errors, 0);
    assert!(summary.finished);

    let after_first = store.list_all().await.unwrap();
    assert_eq!(
        contents(&after_first),
        vec!["gave up learning Spanish", "has a fluffy orange cat", "user likes coffee"]
    );

    let second = pipeline.run_to_end().await;
    assert!(!ConsolidationSummary::from_events(&second).changed_anything());
    assert_eq!(store.list_all().await.unwrap(), after_first);
}

/// The pipeline gives the same result when the store is only reachable
/// through resources and tools
#[tokio::test]
async fn test_run_over_capability_surface() {
    let backing = Arc::new(InMemoryStore::new());
    seed(backing.as_ref()).await;
    let store = Arc::new(CapabilityStore::over(backing.clone()));

    let pipeline = ConsolidationPipeline::new(store, inference(household_model()));
    let events = pipeline.run_to_end().await;
    assert_eq!(events.first().unwrap().step, ProgressStep::Start);
    assert_eq!(events.last().unwrap().step, ProgressStep::Complete);

    let server = MemoryServer::new(backing);
    let active = server.read_resource(resources::ACTIVE).await.unwrap();
    assert_eq!(active["attributes"].as_array().unwrap().len(), 1);
    assert_eq!(active["attributes"][0]["content"], "user likes coffee");
    assert_eq!(active["goals"][0]["content"], "gave up learning Spanish");
    assert_eq!(active["requests"], json!([]));
    assert_eq!(active["notes"][0]["content"], "has a fluffy orange cat");
}

#[tokio::test]
async fn test_empty_category_issues_no_calls() {
    let store = Arc::new(InMemoryStore::new());
    store.add(Category::Request, "reply in English").await.unwrap();
    let model = Arc::new(
        ScriptedInference::new()
            .reply_to(GROUP_HEADING, r#"{"groups": []}"#)
            .reply_to(SHORTEN_HEADING, "English replies"),
    );

    let events = ConsolidationPipeline::new(store, inference(model.clone()))
        .run_to_end()
        .await;

    // One similarity call; one record skips contradictions; 16 chars gets a shortening call.
    assert_eq!(model.call_count(), 2);
    assert!(events
        .iter()
        .filter_map(|e| e.category)
        .all(|c| c == Category::Request));
}

#[tokio::test]
async fn test_timeouts_still_reach_complete() {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await;
    let before = store.list_all().await.unwrap();

    let client = Arc::new(FailingInference::hang());
    let pipeline = ConsolidationPipeline::new(
        store.clone(),
        Inference::new(client, Duration::from_millis(20)),
    );
    let events = pipeline.run_to_end().await;

    let steps: Vec<ProgressStep> = events.iter().map(|e| e.step).collect();
    assert!(steps.iter().all(|s| matches!(
        s,
        ProgressStep::Start
            | ProgressStep::CategoryStart
            | ProgressStep::Process
            | ProgressStep::Info
            | ProgressStep::Complete
    )));
    assert_eq!(steps.last(), Some(&ProgressStep::Complete));
    assert_eq!(store.list_all().await.unwrap(), before);
}

#[tokio::test]
async fn test_sse_frames_for_whole_run() {
    let store = Arc::new(InMemoryStore::new());
    seed(store.as_ref()).await;
    let pipeline = ConsolidationPipeline::new(store, inference(household_model()));

    let frames: Vec<String> = pipeline.run().map(|e| e.to_sse()).collect().await;
    assert!(frames.iter().all(|f| f.starts_with("data: ") && f.ends_with("\n\n")));
    assert!(frames.last().unwrap().contains(r#""step":"complete""#));
}

#[tokio::test]
async fn test_capability_tools_reject_bad_input_before_store() {
    let backing = Arc::new(InMemoryStore::new());
    let server = MemoryServer::new(backing.clone());

    let err = server
        .call_tool(tools::ADD_MEMORY, json!({"category": "hobby", "content": "chess"}))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoriaError::InvalidCategory(_)));

    let err = server
        .call_tool(tools::UPDATE_MEMORY, json!({"id": "one"}))
        .await
        .unwrap_err();
    assert!(matches!(err, MemoriaError::InvalidArguments(_)));

    let err = server.read_resource("memories://archived").await.unwrap_err();
    assert!(matches!(err, MemoriaError::UnknownResource(_)));

    assert!(backing.list_all().await.unwrap().is_empty());
}

/// Rows written under the legacy `memory` label are consolidated as notes
#[tokio::test]
async fn test_legacy_memory_rows_are_consolidated() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("memories.db");
    let store = Arc::new(SqliteMemoryStore::open(&path).unwrap());

    let legacy = rusqlite::Connection::open(&path).unwrap();
    legacy
        .execute_batch(
            "INSERT INTO memories (category, content, created_at) VALUES
                ('memory', 'has a cat', '2023-06-01 08:30:00'),
                ('memory', 'owns a cat', '2023-06-02 09:00:00');",
        )
        .unwrap();
    drop(legacy);

    let model = Arc::new(
        ScriptedInference::new()
            .reply_to(GROUP_HEADING, r#"{"groups": [[1, 2]]}"#)
            .reply_to(MERGE_HEADING, "has a pet cat"),
    );
    let events = ConsolidationPipeline::new(store.clone(), inference(model))
        .run_to_end()
        .await;
    assert_eq!(ConsolidationSummary::from_events(&events).merged_groups, 1);

    let notes = store.list_by_category(Category::Note).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].content, "has a pet cat");
    assert_eq!(notes[0].category, Category::Note);
    assert_eq!(store.list_all().await.unwrap().len(), 1);
}

/// Chat turns append memories that a later consolidation run folds together
#[tokio::test]
async fn test_chat_then_consolidate() {
    let temp_dir = TempDir::new().unwrap();
    let config = MemoriaConfig::new(temp_dir.path().to_path_buf())
        .with_analysis(AnalysisMode::Awaited);
    let store = Arc::new(SqliteMemoryStore::open(&config.database).unwrap());

    let chat_model = Arc::new(
        ScriptedInference::new()
            .reply_to("User: I love jazz", r#"{"items": [{"category": "attribute", "content": "loves jazz"}]}"#)
            .reply_to("User: jazz is my favourite", r#"{"items": [{"category": "attribute", "content": "jazz is favourite genre"}]}"#)
            .otherwise("Nice!"),
    );
    let assistant = Assistant::new(store.clone(), chat_model, &config);
    assistant.chat("I love jazz", false).await.unwrap();
    let reply = assistant.chat("jazz is my favourite", true).await.unwrap();
    assert!(reply.context_used.unwrap().contains("loves jazz"));
    assert_eq!(store.list_by_category(Category::Attribute).await.unwrap().len(), 2);

    let ids: Vec<i64> = store.list_all().await.unwrap().iter().map(|r| r.id).collect();
    let group = format!(r#"{{"groups": [{:?}]}}"#, ids);
    let maintenance_model = Arc::new(
        ScriptedInference::new()
            .reply_to(GROUP_HEADING, group)
            .reply_to(MERGE_HEADING, "loves jazz"),
    );
    ConsolidationPipeline::new(store.clone(), inference(maintenance_model))
        .run_to_end()
        .await;

    let attributes = store.list_by_category(Category::Attribute).await.unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0].content, "loves jazz");
}
