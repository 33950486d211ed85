//! Redis backend.
//!
//! `compare_and_update` runs an optimistic `WATCH` / `GET` / `MULTI` / `SET` /
//! `EXEC` loop. `WATCH` is connection-scoped, so every update opens its own
//! connection instead of sharing the multiplexed one.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde_json::Value;

use super::{EntityKind, Mutator, StateStore, StorageBackend, StoreError, StoreResult};

const DEFAULT_NAMESPACE: &str = "keyrelay";
const MAX_CAS_ATTEMPTS: usize = 64;

pub struct RedisStore {
    client: Client,
    namespace: String,
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::unavailable(StorageBackend::Redis, err)
}

impl RedisStore {
    /// Open the client and verify the server answers `PING`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        Self::connect_with_namespace(url, DEFAULT_NAMESPACE).await
    }

    pub async fn connect_with_namespace(url: &str, namespace: &str) -> StoreResult<Self> {
        let client = Client::open(url).map_err(unavailable)?;
        let store = Self { client, namespace: namespace.to_string() };

        let mut conn = store.connection().await?;
        let _pong: String = redis::cmd("PING").query_async(&mut conn).await.map_err(unavailable)?;
        Ok(store)
    }

    fn redis_key(&self, kind: EntityKind, key: &str) -> String {
        format!("{}:{}", self.namespace, kind.record_key(key))
    }

    async fn connection(&self) -> StoreResult<MultiplexedConnection> {
        self.client.get_multiplexed_async_connection().await.map_err(unavailable)
    }
}

fn decode(raw: Option<String>) -> StoreResult<Option<Value>> {
    match raw {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

#[async_trait]
impl StateStore for RedisStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Redis
    }

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> =
            conn.get(self.redis_key(kind, key)).await.map_err(unavailable)?;
        decode(raw)
    }

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&value)?;
        let _: () = conn.set(self.redis_key(kind, key), payload).await.map_err(unavailable)?;
        Ok(())
    }

    async fn compare_and_update(
        &self,
        kind: EntityKind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> StoreResult<Value> {
        let redis_key = self.redis_key(kind, key);
        let mut conn = self.connection().await?;

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let _: () =
                redis::cmd("WATCH").arg(&redis_key).query_async(&mut conn).await.map_err(unavailable)?;
            let raw: Option<String> = conn.get(&redis_key).await.map_err(unavailable)?;
            let next = mutator(decode(raw)?);
            let payload = serde_json::to_string(&next)?;

            // EXEC replies nil when the watched key changed underneath us.
            let committed: Option<()> = redis::pipe()
                .atomic()
                .set(&redis_key, payload)
                .ignore()
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if committed.is_some() {
                return Ok(next);
            }
            tracing::trace!("Redis CAS conflict on {} (attempt {})", redis_key, attempt);
        }

        Err(unavailable(format!(
            "compare_and_update on {} gave up after {} conflicts",
            redis_key, MAX_CAS_ATTEMPTS
        )))
    }

    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let mut conn = self.connection().await?;
        let prefix = format!("{}:", self.namespace);
        let pattern = format!("{}{}:*", prefix, kind.as_str());
        let raw: Vec<String> = conn.keys(pattern).await.map_err(unavailable)?;

        let mut keys: Vec<String> = raw
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|k| kind.strip(k))
            .map(ToString::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }
}
