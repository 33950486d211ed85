//! PostgreSQL backend.
//!
//! One `keyrelay_state` table keyed by `(kind, key)`. Updates lock the row
//! with `SELECT ... FOR UPDATE` inside a transaction; the first write of a key
//! races on `INSERT ... ON CONFLICT DO NOTHING` and the loser retries against
//! the now-existing row.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;

use super::{EntityKind, Mutator, StateStore, StorageBackend, StoreError, StoreResult};

const MAX_CAS_ATTEMPTS: usize = 16;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS keyrelay_state (
    kind TEXT NOT NULL,
    key TEXT NOT NULL,
    value JSONB NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (kind, key)
)
"#;

/// PostgreSQL-backed state store.
pub struct PostgresStore {
    /// Database connection pool.
    pool: PgPool,
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::unavailable(StorageBackend::Postgres, err)
}

impl PostgresStore {
    /// Create store with existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to database, then create the state table if needed.
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .min_connections(1)
            .acquire_timeout(acquire_timeout)
            .idle_timeout(Duration::from_secs(300))
            .connect(database_url)
            .await
            .map_err(unavailable)?;
        let store = Self::new(pool);
        store.run_migrations().await?;
        Ok(store)
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for PostgresStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Postgres
    }

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>> {
        let row: Option<Json<Value>> =
            sqlx::query_scalar("SELECT value FROM keyrelay_state WHERE kind = $1 AND key = $2")
                .bind(kind.as_str())
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        Ok(row.map(|Json(value)| value))
    }

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO keyrelay_state (kind, key, value) VALUES ($1, $2, $3) \
             ON CONFLICT (kind, key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
        )
        .bind(kind.as_str())
        .bind(key)
        .bind(Json(&value))
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(())
    }

    async fn compare_and_update(
        &self,
        kind: EntityKind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> StoreResult<Value> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut tx = self.pool.begin().await.map_err(unavailable)?;

            let current: Option<Json<Value>> = sqlx::query_scalar(
                "SELECT value FROM keyrelay_state WHERE kind = $1 AND key = $2 FOR UPDATE",
            )
            .bind(kind.as_str())
            .bind(key)
            .fetch_optional(&mut *tx)
            .await
            .map_err(unavailable)?;

            match current {
                Some(Json(current)) => {
                    let next = mutator(Some(current));
                    sqlx::query(
                        "UPDATE keyrelay_state SET value = $3, updated_at = now() \
                         WHERE kind = $1 AND key = $2",
                    )
                    .bind(kind.as_str())
                    .bind(key)
                    .bind(Json(&next))
                    .execute(&mut *tx)
                    .await
                    .map_err(unavailable)?;
                    tx.commit().await.map_err(unavailable)?;
                    return Ok(next);
                },
                None => {
                    let next = mutator(None);
                    let inserted = sqlx::query(
                        "INSERT INTO keyrelay_state (kind, key, value) VALUES ($1, $2, $3) \
                         ON CONFLICT (kind, key) DO NOTHING",
                    )
                    .bind(kind.as_str())
                    .bind(key)
                    .bind(Json(&next))
                    .execute(&mut *tx)
                    .await
                    .map_err(unavailable)?
                    .rows_affected();

                    if inserted == 1 {
                        tx.commit().await.map_err(unavailable)?;
                        return Ok(next);
                    }
                    tx.rollback().await.map_err(unavailable)?;
                },
            }
        }

        Err(unavailable(format!(
            "compare_and_update on {} gave up after {} attempts",
            kind.record_key(key),
            MAX_CAS_ATTEMPTS
        )))
    }

    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        sqlx::query_scalar("SELECT key FROM keyrelay_state WHERE kind = $1 ORDER BY key")
            .bind(kind.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)
    }
}
