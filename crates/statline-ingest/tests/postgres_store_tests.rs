//! Postgres store tests using testcontainers
//!
//! Run with: cargo test --test postgres_store_tests -- --ignored

mod common;

use common::{games, init_test_tracing, test_config, TestPostgres, TestProvider};
use serial_test::serial;
use statline_common::types::{CanonicalStatRecord, Category, Checkpoint, StatValue};
use statline_ingest::pipeline::IngestCoordinator;
use statline_ingest::store::{CheckpointStore, PgCheckpointStore, PgStore, StatStore, WorkCatalog};
use std::collections::BTreeMap;
use std::sync::Arc;

fn record(subject: &str, work_id: i64, points: f64) -> CanonicalStatRecord {
    let mut attributes = BTreeMap::new();
    attributes.insert("points".to_string(), StatValue::Number(points));
    attributes.insert("position".to_string(), StatValue::Text("G".to_string()));
    CanonicalStatRecord {
        subject_id: subject.to_string(),
        work_item_id: work_id,
        group_id: "HOME".to_string(),
        category: Category::Nba,
        attributes,
        derived_score: points,
    }
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_catalog_pages_only_final_games() {
    init_test_tracing();
    let pg = TestPostgres::start().await.unwrap();
    pg.seed_games(&games(1..=5, Category::Nba)).await.unwrap();
    pg.seed_games(&games(6..=8, Category::Nhl)).await.unwrap();
    sqlx::query("UPDATE games SET status = 'scheduled' WHERE id = 3")
        .execute(pg.pool())
        .await
        .unwrap();

    let store = PgStore::new(pg.pool().clone());

    let first = store.list_work_items(None, None, 3).await.unwrap();
    let ids: Vec<i64> = first.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![1, 2, 4]);
    assert_eq!(first[0].participants, vec!["HOME", "AWAY"]);

    let next = store.list_work_items(None, Some(4), 3).await.unwrap();
    let ids: Vec<i64> = next.iter().map(|g| g.id).collect();
    assert_eq!(ids, vec![5, 6, 7]);

    let hockey = store
        .list_work_items(Some(Category::Nhl), None, 100)
        .await
        .unwrap();
    assert_eq!(hockey.len(), 3);
    assert!(hockey.iter().all(|g| g.category == Category::Nhl));
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_upsert_overwrites_by_key() {
    let pg = TestPostgres::start().await.unwrap();
    pg.seed_games(&games(1..=2, Category::Nba)).await.unwrap();
    let store = PgStore::new(pg.pool().clone());

    let written = store
        .upsert_records(&[record("p1", 1, 10.0), record("p2", 1, 12.0), record("p1", 2, 7.0)])
        .await
        .unwrap();
    assert_eq!(written, 3);

    store.upsert_records(&[record("p1", 1, 33.0)]).await.unwrap();

    assert_eq!(store.record_count(None).await.unwrap(), 3);
    assert_eq!(store.record_count(Some(Category::Nhl)).await.unwrap(), 0);

    let score: f64 = sqlx::query_scalar(
        "SELECT derived_score FROM player_stats WHERE subject_id = 'p1' AND work_item_id = 1",
    )
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert_eq!(score, 33.0);

    let position: String = sqlx::query_scalar(
        "SELECT attributes->>'position' FROM player_stats WHERE subject_id = 'p2'",
    )
    .fetch_one(pg.pool())
    .await
    .unwrap();
    assert_eq!(position, "G");

    let covered = store.covered_work_ids(Some(Category::Nba)).await.unwrap();
    assert_eq!(covered.len(), 2);
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_checkpoint_cursor_never_regresses() {
    let pg = TestPostgres::start().await.unwrap();
    let checkpoints = PgCheckpointStore::new(pg.pool().clone());

    assert!(checkpoints.load("nba").await.unwrap().is_zero());

    let ahead = Checkpoint {
        last_completed_work_id: Some(40),
        processed_count: 40,
        success_count: 39,
        not_found_count: 1,
        ..Checkpoint::default()
    };
    checkpoints.save("nba", &ahead).await.unwrap();

    let behind = Checkpoint {
        last_completed_work_id: Some(12),
        processed_count: 55,
        ..Checkpoint::default()
    };
    checkpoints.save("nba", &behind).await.unwrap();

    let loaded = checkpoints.load("nba").await.unwrap();
    assert_eq!(loaded.last_completed_work_id, Some(40));
    assert_eq!(loaded.processed_count, 55);
    assert!(loaded.saved_at.is_some());

    assert!(checkpoints.load("nhl").await.unwrap().is_zero());

    checkpoints.reset("nba").await.unwrap();
    assert!(checkpoints.load("nba").await.unwrap().is_zero());
}

#[tokio::test]
#[serial]
#[ignore = "requires Docker"]
async fn test_pipeline_run_against_postgres() {
    let pg = TestPostgres::start().await.unwrap();
    pg.seed_games(&games(1..=45, Category::Nba)).await.unwrap();

    let store = Arc::new(PgStore::new(pg.pool().clone()));
    let checkpoints = Arc::new(PgCheckpointStore::new(pg.pool().clone()));
    let provider = Arc::new(TestProvider::new());
    let coordinator =
        IngestCoordinator::new(store.clone(), store.clone(), checkpoints.clone(), provider.clone());

    let summary = coordinator.run(&test_config(8, 10)).await.unwrap();
    assert_eq!(summary.succeeded, 45);
    assert_eq!(summary.flushes, 5);
    assert_eq!(store.record_count(None).await.unwrap(), 45);
    assert_eq!(
        checkpoints.load("all").await.unwrap().last_completed_work_id,
        Some(45)
    );

    // Nothing left to do on a second pass
    let again = coordinator.run(&test_config(8, 10)).await.unwrap();
    assert_eq!(again.processed, 0);
    assert_eq!(provider.total_calls(), 45);
}
