//! Durable gateway state behind one capability trait.
//!
//! Every mutable record (rate-limit windows, usage counters, key state) is a
//! JSON value addressed by `(EntityKind, key)`. Backends differ in how they make
//! [`StateStore::compare_and_update`] atomic but share the same contract:
//! concurrent mutators on one key never lose an update.

mod chain;
mod file;
mod memory;
mod mongo;
mod postgres;
mod redis;


pub use chain::{resolve_data_dir, select_backend};
pub use file::FileStore;
pub use memory::MemoryStore;
pub use mongo::MongoStore;
pub use postgres::PostgresStore;
pub use self::redis::RedisStore;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use keyrelay_types::GatewayError;

/// Namespace of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// `ratelimit:{credential_id}`
    RateLimit,
    /// `usage:{date}:{model}`
    Usage,
    /// `keystate:{credential_id}`
    KeyState,
    /// `keystats:{credential_id}`
    KeyStats,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "ratelimit",
            Self::Usage => "usage",
            Self::KeyState => "keystate",
            Self::KeyStats => "keystats",
        }
    }

    /// Backend-agnostic record key, e.g. `ratelimit:3f2a...`.
    pub fn record_key(&self, key: &str) -> String {
        format!("{}:{}", self.as_str(), key)
    }

    /// Inverse of [`EntityKind::record_key`].
    pub fn strip<'a>(&self, record_key: &'a str) -> Option<&'a str> {
        record_key.strip_prefix(self.as_str())?.strip_prefix(':')
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which backend won the startup priority chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Redis,
    Postgres,
    MongoDb,
    File,
    Memory,
}

impl fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Redis => "redis",
            Self::Postgres => "postgres",
            Self::MongoDb => "mongodb",
            Self::File => "file",
            Self::Memory => "memory",
        };
        f.write_str(name)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Backend unreachable or the operation failed mid-flight.
    #[error("Storage unavailable ({backend}): {message}")]
    Unavailable { backend: StorageBackend, message: String },
    /// Stored value does not decode into the expected shape.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn unavailable(backend: StorageBackend, err: impl fmt::Display) -> Self {
        Self::Unavailable { backend, message: err.to_string() }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        GatewayError::StorageUnavailable { message: err.to_string() }
    }
}

/// Pure function from the current value (if any) to the next one.
///
/// Optimistic backends may call it several times under contention.
pub type Mutator<'a> = &'a (dyn Fn(Option<Value>) -> Value + Send + Sync);

#[async_trait]
pub trait StateStore: Send + Sync {
    fn backend(&self) -> StorageBackend;

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>>;

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()>;

    /// Apply `mutator` atomically with respect to every other caller touching
    /// the same `(kind, key)`, and return the stored result.
    async fn compare_and_update(
        &self,
        kind: EntityKind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> StoreResult<Value>;

    /// Keys (without the kind prefix) currently stored under `kind`.
    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>>;
}

/// Typed read.
pub async fn load<T: DeserializeOwned>(
    store: &dyn StateStore,
    kind: EntityKind,
    key: &str,
) -> StoreResult<Option<T>> {
    match store.get(kind, key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Typed write.
pub async fn save<T: Serialize + Sync>(
    store: &dyn StateStore,
    kind: EntityKind,
    key: &str,
    value: &T,
) -> StoreResult<()> {
    store.put(kind, key, serde_json::to_value(value)?).await
}

/// Typed compare-and-update.
///
/// A stored value that no longer decodes is handed to `update` as absent so a
/// corrupt record gets replaced instead of wedging the key forever.
pub async fn update<T, F>(
    store: &dyn StateStore,
    kind: EntityKind,
    key: &str,
    update: F,
) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned,
    F: Fn(Option<T>) -> T + Send + Sync,
{
    let mutator = move |current: Option<Value>| -> Value {
        let current = current.and_then(|value| serde_json::from_value::<T>(value).ok());
        serde_json::to_value(update(current)).unwrap_or(Value::Null)
    };
    let stored = store.compare_and_update(kind, key, &mutator).await?;
    Ok(serde_json::from_value(stored)?)
}
