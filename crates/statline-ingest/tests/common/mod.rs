//! Shared fixtures for statline-ingest integration tests
//!
//! - `TestProvider`: scripted in-process box score provider
//! - `TestPostgres`: throwaway PostgreSQL container with migrations applied

#![allow(dead_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use statline_common::types::{Category, WorkItem};
use statline_ingest::config::RunConfig;
use statline_ingest::pipeline::BackoffPolicy;
use statline_ingest::provider::{FetchError, ProviderResponse, StatProvider};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use testcontainers::{core::IntoContainerPort, runners::AsyncRunner, ContainerAsync};
use testcontainers_modules::postgres::Postgres;
use tokio_util::sync::CancellationToken;

/// How the provider answers for one work item
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Never answers within any sane timeout
    Hang,
    NotFound,
    /// Valid JSON in a shape the normalizer does not know
    Malformed,
    /// Transient error for the first `n` calls, then a normal box score
    FlakyFor(u32),
    /// Normal box score with this point total for the single player
    Points(f64),
}

/// Scripted provider: one player per game unless told otherwise
pub struct TestProvider {
    behaviours: Mutex<HashMap<i64, Behaviour>>,
    calls: Mutex<HashMap<i64, u32>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Duration,
    cancel_at: Option<(i64, CancellationToken)>,
}

impl Default for TestProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProvider {
    pub fn new() -> Self {
        Self {
            behaviours: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Duration::ZERO,
            cancel_at: None,
        }
    }

    /// Sleep this long inside every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` when work item `id` is requested
    pub fn cancel_on(mut self, id: i64, token: CancellationToken) -> Self {
        self.cancel_at = Some((id, token));
        self
    }

    pub fn set(&self, id: i64, behaviour: Behaviour) {
        self.behaviours.lock().unwrap().insert(id, behaviour);
    }

    pub fn clear(&self, id: i64) {
        self.behaviours.lock().unwrap().remove(&id);
    }

    pub fn calls_for(&self, id: i64) -> u32 {
        self.calls.lock().unwrap().get(&id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn requested_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.calls.lock().unwrap().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Box score for one player whose id is derived from the game id
pub fn box_score(item: &WorkItem, points: f64) -> Value {
    let stats = match item.category {
        Category::Nba => json!({ "pts": points, "reb": 4, "ast": 2 }),
        Category::Nfl => json!({ "rushing_yards": points * 10.0, "rushing_tds": 1 }),
        Category::Mlb => json!({ "h": points, "r": 1 }),
        Category::Nhl => json!({ "g": 1, "sog": points }),
    };
    json!({
        "players": [
            { "player_id": format!("p{}", item.id), "team_id": "HOME", "stats": stats }
        ]
    })
}

#[async_trait]
impl StatProvider for TestProvider {
    async fn fetch_boxscore(
        &self,
        item: &WorkItem,
    ) -> std::result::Result<ProviderResponse, FetchError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(item.id).or_insert(0);
            *count += 1;
            *count
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if let Some((id, ref token)) = self.cancel_at {
            if id == item.id {
                token.cancel();
            }
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let behaviour = self.behaviours.lock().unwrap().get(&item.id).cloned();
        match behaviour {
            Some(Behaviour::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 3600)).await;
                Err(FetchError::Timeout)
            },
            Some(Behaviour::NotFound) => Ok(ProviderResponse::NotFound),
            Some(Behaviour::Malformed) => {
                Ok(ProviderResponse::Found(json!({ "status": "postponed" })))
            },
            Some(Behaviour::FlakyFor(n)) if call <= n => {
                Err(FetchError::Transient("HTTP 503".to_string()))
            },
            Some(Behaviour::Points(points)) => Ok(ProviderResponse::Found(box_score(item, points))),
            _ => Ok(ProviderResponse::Found(box_score(item, (item.id % 30 + 1) as f64))),
        }
    }
}

/// Completed games with ids in `ids`
pub fn games(ids: std::ops::RangeInclusive<i64>, category: Category) -> Vec<WorkItem> {
    ids.map(|id| {
        WorkItem::new(id, format!("{}-{}", category, id), category).with_participants(["HOME", "AWAY"])
    })
    .collect()
}

/// Fast settings: tiny backoff, short timeout, no time-based flushes
pub fn test_config(concurrency: usize, batch_size: usize) -> RunConfig {
    RunConfig {
        concurrency,
        batch_size,
        flush_interval: Duration::from_secs(3600),
        max_retries: 3,
        fetch_timeout: Duration::from_secs(1),
        backoff: BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(100)),
        ..RunConfig::default()
    }
}

pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

/// PostgreSQL container with the bundled migrations applied
pub struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        let container = Postgres::default()
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;
        let url = format!("postgresql://postgres:postgres@{}:{}/postgres", host, port);

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        sqlx::migrate!("../../migrations")
            .run(&pool)
            .await
            .context("Failed to run migrations")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Insert catalog rows for `items` with status `final`
    pub async fn seed_games(&self, items: &[WorkItem]) -> Result<()> {
        for item in items {
            sqlx::query(
                "INSERT INTO games (id, external_ref, category, home_team_id, away_team_id, status)
                 VALUES ($1, $2, $3, $4, $5, 'final')",
            )
            .bind(item.id)
            .bind(&item.external_ref)
            .bind(item.category.as_str())
            .bind(item.participants.first().cloned().unwrap_or_default())
            .bind(item.participants.get(1).cloned().unwrap_or_default())
            .execute(&self.pool)
            .await
            .context("Failed to seed game")?;
        }
        Ok(())
    }
}
