//! Postgres-backed catalog, stat store and checkpoint store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use statline_common::types::{CanonicalStatRecord, Category, Checkpoint, WorkItem};
use std::collections::HashSet;
use tracing::debug;

use super::{CheckpointStore, StatStore, WorkCatalog};
use crate::error::{IngestError, Result};

/// Rows per INSERT statement (7 binds each, well under the 65535 limit)
pub const UPSERT_CHUNK_SIZE: usize = 1000;

#[derive(Debug, sqlx::FromRow)]
struct GameRow {
    id: i64,
    external_ref: String,
    category: String,
    home_team_id: Option<String>,
    away_team_id: Option<String>,
}

impl TryFrom<GameRow> for WorkItem {
    type Error = IngestError;

    fn try_from(row: GameRow) -> Result<Self> {
        let category: Category = row.category.parse()?;
        Ok(WorkItem::new(row.id, row.external_ref, category)
            .with_participants(row.home_team_id.into_iter().chain(row.away_team_id)))
    }
}

/// Catalog and stat store over the `games` and `player_stats` tables
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Number of stored stat lines, optionally per category
    pub async fn record_count(&self, category: Option<Category>) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM player_stats WHERE ($1::text IS NULL OR category = $1)",
        )
        .bind(category.map(|c| c.as_str()))
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl WorkCatalog for PgStore {
    async fn list_work_items(
        &self,
        category: Option<Category>,
        after_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let rows: Vec<GameRow> = sqlx::query_as(
            r#"
            SELECT id, external_ref, category, home_team_id, away_team_id
            FROM games
            WHERE status = 'final'
              AND ($1::text IS NULL OR category = $1)
              AND ($2::bigint IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(category.map(|c| c.as_str()))
        .bind(after_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IngestError::CatalogUnavailable(e.to_string()))?;

        rows.into_iter().map(WorkItem::try_from).collect()
    }
}

#[async_trait]
impl StatStore for PgStore {
    async fn covered_work_ids(&self, category: Option<Category>) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT work_item_id
            FROM player_stats
            WHERE ($1::text IS NULL OR category = $1)
            "#,
        )
        .bind(category.map(|c| c.as_str()))
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().collect())
    }

    async fn upsert_records(&self, records: &[CanonicalStatRecord]) -> Result<u64> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let now = Utc::now();
        let mut written = 0u64;

        for chunk in records.chunks(UPSERT_CHUNK_SIZE) {
            let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO player_stats (subject_id, work_item_id, group_id, category, attributes, derived_score, updated_at) ",
            );

            query_builder.push_values(chunk.iter(), |mut b, record| {
                b.push_bind(&record.subject_id)
                    .push_bind(record.work_item_id)
                    .push_bind(&record.group_id)
                    .push_bind(record.category.as_str())
                    .push_bind(Json(&record.attributes))
                    .push_bind(record.derived_score)
                    .push_bind(now);
            });

            query_builder.push(
                " ON CONFLICT (subject_id, work_item_id) DO UPDATE SET \
                 group_id = EXCLUDED.group_id, \
                 category = EXCLUDED.category, \
                 attributes = EXCLUDED.attributes, \
                 derived_score = EXCLUDED.derived_score, \
                 updated_at = EXCLUDED.updated_at",
            );

            let result = query_builder.build().execute(&mut *tx).await?;
            written += result.rows_affected();
        }

        tx.commit().await?;

        debug!(records = records.len(), written, "Upserted player_stats batch");
        Ok(written)
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CheckpointRow {
    last_completed_work_id: Option<i64>,
    processed_count: i64,
    success_count: i64,
    failure_count: i64,
    skipped_count: i64,
    not_found_count: i64,
    saved_at: DateTime<Utc>,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        let count = |n: i64| u64::try_from(n).unwrap_or(0);
        Checkpoint {
            last_completed_work_id: row.last_completed_work_id,
            processed_count: count(row.processed_count),
            success_count: count(row.success_count),
            failure_count: count(row.failure_count),
            skipped_count: count(row.skipped_count),
            not_found_count: count(row.not_found_count),
            saved_at: Some(row.saved_at),
        }
    }
}

fn to_db_count(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Checkpoints in the `ingest_checkpoints` table
#[derive(Clone)]
pub struct PgCheckpointStore {
    pool: PgPool,
}

impl PgCheckpointStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CheckpointStore for PgCheckpointStore {
    async fn load(&self, scope: &str) -> Result<Checkpoint> {
        let row: Option<CheckpointRow> = sqlx::query_as(
            r#"
            SELECT last_completed_work_id, processed_count, success_count,
                   failure_count, skipped_count, not_found_count, saved_at
            FROM ingest_checkpoints
            WHERE scope = $1
            "#,
        )
        .bind(scope)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IngestError::CheckpointLoad {
            scope: scope.to_string(),
            reason: e.to_string(),
        })?;

        Ok(row.map(Checkpoint::from).unwrap_or_default())
    }

    async fn save(&self, scope: &str, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO ingest_checkpoints (
                scope, last_completed_work_id, processed_count, success_count,
                failure_count, skipped_count, not_found_count, saved_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (scope) DO UPDATE SET
                last_completed_work_id = GREATEST(
                    ingest_checkpoints.last_completed_work_id,
                    EXCLUDED.last_completed_work_id
                ),
                processed_count = EXCLUDED.processed_count,
                success_count = EXCLUDED.success_count,
                failure_count = EXCLUDED.failure_count,
                skipped_count = EXCLUDED.skipped_count,
                not_found_count = EXCLUDED.not_found_count,
                saved_at = EXCLUDED.saved_at
            "#,
        )
        .bind(scope)
        .bind(checkpoint.last_completed_work_id)
        .bind(to_db_count(checkpoint.processed_count))
        .bind(to_db_count(checkpoint.success_count))
        .bind(to_db_count(checkpoint.failure_count))
        .bind(to_db_count(checkpoint.skipped_count))
        .bind(to_db_count(checkpoint.not_found_count))
        .bind(checkpoint.saved_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn reset(&self, scope: &str) -> Result<()> {
        sqlx::query("DELETE FROM ingest_checkpoints WHERE scope = $1")
            .bind(scope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
