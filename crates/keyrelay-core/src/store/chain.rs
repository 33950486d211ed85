//! Startup backend selection.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_types::StorageConfig;

use super::{FileStore, MongoStore, PostgresStore, RedisStore, StateStore, StoreResult};

/// Try Redis, PostgreSQL, MongoDB, then the local file, in that order.
///
/// Only configured backends are tried. The first reachable one is returned and
/// used for the rest of the process lifetime; the file backend is the floor and
/// its failure is the only error surfaced.
pub async fn select_backend(config: &StorageConfig) -> StoreResult<Arc<dyn StateStore>> {
    let timeout = Duration::from_secs(config.connect_timeout_secs.max(1));

    if let Some(url) = non_empty(config.redis_url.as_deref()) {
        if let Some(store) = attempt("redis", timeout, RedisStore::connect(url)).await {
            return Ok(store);
        }
    }

    if let Some(url) = non_empty(config.postgres_url.as_deref()) {
        if let Some(store) = attempt("postgres", timeout, PostgresStore::connect(url, timeout)).await
        {
            return Ok(store);
        }
    }

    if let Some(uri) = non_empty(config.mongodb_uri.as_deref()) {
        let database = config.mongodb_database_name();
        if let Some(store) =
            attempt("mongodb", timeout, MongoStore::connect(uri, database, timeout)).await
        {
            return Ok(store);
        }
    }

    let dir = resolve_data_dir(config);
    let store = FileStore::open(&dir).await?;
    tracing::info!("State store backend: file ({})", store.path().display());
    Ok(Arc::new(store))
}

async fn attempt<S, F>(name: &str, timeout: Duration, connect: F) -> Option<Arc<dyn StateStore>>
where
    S: StateStore + 'static,
    F: Future<Output = StoreResult<S>>,
{
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(store)) => {
            tracing::info!("State store backend: {}", name);
            Some(Arc::new(store))
        },
        Ok(Err(e)) => {
            tracing::warn!("State store {} unreachable, trying next backend: {}", name, e);
            None
        },
        Err(_) => {
            tracing::warn!(
                "State store {} did not answer within {}s, trying next backend",
                name,
                timeout.as_secs()
            );
            None
        },
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Configured data dir, else `<platform data dir>/keyrelay`, else `./data`.
pub fn resolve_data_dir(config: &StorageConfig) -> PathBuf {
    if let Some(dir) = non_empty(config.data_dir.as_deref()) {
        return PathBuf::from(dir);
    }
    dirs::data_local_dir()
        .map(|dir| dir.join("keyrelay"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}
