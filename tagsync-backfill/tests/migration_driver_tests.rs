//! Integration tests for the migration driver
//!
//! Ordering, idempotence, notifications and version stamping, against both
//! the in-memory store and an on-disk SQLite store, plus store write
//! failures on the paths that must not be best-effort.

mod helpers;

use helpers::*;
use std::sync::Arc;
use tagsync_backfill::db::{init_database_pool, SqliteStore, DATABASE_FILE};
use tagsync_backfill::migration::Migration;
use tagsync_backfill::models::{Dataset, MigrationState, TrackRecord};
use tagsync_backfill::store::{keys, load_json, save_json};
use tagsync_backfill::{LocalStore, MemoryStore, MigrationError, MigrationOrchestrator};
use tagsync_common::events::{ChangeReason, EventBus, SyncEvent};
use tempfile::TempDir;

fn tagged_record(key: &str, tags: &[&str]) -> TrackRecord {
    let mut record = complete_record(key);
    record.rating = None;
    record.tags = tags.iter().map(|t| t.to_string()).collect();
    record
}

#[tokio::test(start_paused = true)]
async fn test_empty_dataset_is_a_no_op() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();
    let orchestrator =
        create_test_orchestrator(store.clone(), fetcher.clone(), EventBus::new(16), test_config());

    let mut dataset = Dataset::new();
    assert!(!orchestrator.run_migrations(&mut dataset).await.unwrap());
    assert!(!store.contains(keys::MIGRATION_STATE).await);
}

#[tokio::test(start_paused = true)]
async fn test_structural_migrations_run_in_order() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();
    let orchestrator =
        create_test_orchestrator(store.clone(), fetcher.clone(), EventBus::new(64), test_config());

    let mut dataset = dataset_of([
        tagged_record("keep", &[" Chill", "chill ", "Late Night"]),
        tagged_record("blank", &["  ", ""]),
    ]);
    seed_dataset(store.as_ref(), &dataset).await;

    assert!(orchestrator.run_migrations(&mut dataset).await.unwrap());

    assert_eq!(dataset.len(), 1);
    assert_eq!(dataset.get("keep").unwrap().tags, vec!["Chill", "Late Night"]);

    let persisted = orchestrator.load_dataset().await.unwrap();
    assert_eq!(persisted, dataset);

    let state = orchestrator.load_state().await.unwrap();
    for migration in Migration::ALL {
        assert!(state.is_complete(migration.name()), "{} not complete", migration.name());
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_run_reports_no_change() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();
    let event_bus = EventBus::new(64);
    let mut rx = event_bus.subscribe();
    let orchestrator = create_test_orchestrator(store.clone(), fetcher.clone(), event_bus, test_config());

    let mut dataset = dataset_of([rated_record("a"), tagged_record("b", &["x"])]);
    assert!(orchestrator.run_migrations(&mut dataset).await.unwrap());

    let first = drain_events(&mut rx);
    let types = event_types(&first);
    assert_eq!(
        types.iter().filter(|t| **t == "MigrationCompleted").count(),
        3,
        "one completion per migration: {:?}",
        types
    );
    assert_eq!(types.last(), Some(&"DatasetChanged"));
    assert!(matches!(
        first.last(),
        Some(SyncEvent::DatasetChanged { reason: ChangeReason::Migration, .. })
    ));

    let snapshot = dataset.clone();
    assert!(!orchestrator.run_migrations(&mut dataset).await.unwrap());
    assert_eq!(dataset, snapshot);
    assert!(drain_events(&mut rx).is_empty(), "no notification without change");
}

#[tokio::test(start_paused = true)]
async fn test_version_bump_alone_is_a_change() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();

    let mut state = MigrationState {
        version: "0.9.0".to_string(),
        ..Default::default()
    };
    for migration in Migration::ALL {
        state.mark_complete(migration.name());
    }
    save_json(store.as_ref(), keys::MIGRATION_STATE, &state).await.unwrap();

    let orchestrator =
        create_test_orchestrator(store.clone(), fetcher.clone(), EventBus::new(16), test_config());
    let mut dataset = dataset_of([complete_record("a")]);

    assert!(orchestrator.run_migrations(&mut dataset).await.unwrap());
    assert_eq!(orchestrator.load_state().await.unwrap().version, TEST_VERSION);
    assert_eq!(fetcher.total_calls(), 0);

    assert!(!orchestrator.run_migrations(&mut dataset).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_completed_flags_are_never_rerun() {
    let store = Arc::new(MemoryStore::new());
    let fetcher = ScriptedFetcher::new();

    let mut state = MigrationState {
        version: TEST_VERSION.to_string(),
        ..Default::default()
    };
    state.mark_complete(Migration::NormalizeTags.name());
    save_json(store.as_ref(), keys::MIGRATION_STATE, &state).await.unwrap();

    let orchestrator =
        create_test_orchestrator(store.clone(), fetcher.clone(), EventBus::new(16), test_config());
    let mut dataset = dataset_of([tagged_record("a", &[" messy ", "MESSY"])]);

    orchestrator.run_migrations(&mut dataset).await.unwrap();

    // normalize_tags was already marked done, so tags stay as they were
    assert_eq!(dataset.get("a").unwrap().tags, vec![" messy ", "MESSY"]);
    assert!(orchestrator
        .load_state()
        .await
        .unwrap()
        .is_complete(Migration::PurgeEmptyRecords.name()));
}

// ============================================================================
// Store write failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_dataset_write_is_a_store_error() {
    let store = FailingStore::new();
    store.fail_writes_to(keys::DATASET);
    let orchestrator = MigrationOrchestrator::new(
        store.clone(),
        ScriptedFetcher::new(),
        EventBus::new(64),
        test_config(),
        TEST_VERSION,
    );

    let mut dataset = dataset_of([tagged_record("a", &[" x ", "X"])]);
    let err = orchestrator.run_migrations(&mut dataset).await.unwrap_err();

    assert!(matches!(err, MigrationError::Store(_)), "got {:?}", err);
    assert!(!err.is_paused());
    let state = orchestrator.load_state().await.unwrap();
    assert!(!state.is_complete(Migration::NormalizeTags.name()));

    // Once the store accepts writes the run picks up where it failed
    store.heal();
    assert!(orchestrator.run_migrations(&mut dataset).await.unwrap());
    let state = orchestrator.load_state().await.unwrap();
    for migration in Migration::ALL {
        assert!(state.is_complete(migration.name()), "{} not complete", migration.name());
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_flag_write_is_a_store_error() {
    let store = FailingStore::new();
    store.fail_writes_to(keys::MIGRATION_STATE);
    let event_bus = EventBus::new(64);
    let mut rx = event_bus.subscribe();
    let orchestrator = MigrationOrchestrator::new(
        store.clone(),
        ScriptedFetcher::new(),
        event_bus,
        test_config(),
        TEST_VERSION,
    );

    let mut dataset = dataset_of([tagged_record("a", &["x"])]);
    let err = orchestrator.run_migrations(&mut dataset).await.unwrap_err();

    assert!(matches!(err, MigrationError::Store(_)), "got {:?}", err);
    assert!(store.get(keys::MIGRATION_STATE).await.unwrap().is_none());
    let types = event_types(&drain_events(&mut rx));
    assert!(!types.contains(&"MigrationCompleted"), "{:?}", types);
    assert!(!types.contains(&"DatasetChanged"), "{:?}", types);
}

// ============================================================================
// SQLite-backed store
// ============================================================================

#[tokio::test]
async fn test_runs_against_sqlite_store_and_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join(DATABASE_FILE);

    let dataset = dataset_of(["a", "b"].map(rated_record));
    {
        let pool = init_database_pool(&db_path).await.unwrap();
        let store: Arc<dyn LocalStore> = Arc::new(SqliteStore::new(pool.clone()));
        seed_dataset(store.as_ref(), &dataset).await;

        let orchestrator = MigrationOrchestrator::new(
            store,
            ScriptedFetcher::new(),
            EventBus::new(64),
            test_config(),
            TEST_VERSION,
        );
        let mut working = orchestrator.load_dataset().await.unwrap();
        assert!(orchestrator.run_migrations(&mut working).await.unwrap());
        pool.close().await;
    }

    let pool = init_database_pool(&db_path).await.unwrap();
    let store = SqliteStore::new(pool);

    let state: MigrationState = load_json(&store, keys::MIGRATION_STATE).await.unwrap().unwrap();
    assert!(state.is_complete(Migration::BackfillMetadata.name()));
    assert!(store.get(keys::MIGRATION_PROGRESS).await.unwrap().is_none());

    let persisted: Dataset =
        load_json(&store, keys::DATASET).await.unwrap().unwrap();
    assert_eq!(persisted.get("a").unwrap().name.as_deref(), Some("Title a"));
    assert_eq!(persisted.get("b").unwrap().tempo, Some(120.0));
}
