//! Local JSON file backend.
//!
//! All records live in one `state.json`. Writers serialize on an exclusive
//! advisory lock of `state.json.lock`, which also covers other gateway
//! processes sharing the directory. Writes go through tmp file + rename so
//! lock-free readers never see a torn file.

use async_trait::async_trait;
use fs2::FileExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{EntityKind, Mutator, StateStore, StorageBackend, StoreError, StoreResult};

const STATE_FILE: &str = "state.json";

type Records = BTreeMap<String, Value>;

pub struct FileStore {
    path: PathBuf,
    lock_path: PathBuf,
    temp_path: PathBuf,
}

/// Releases the advisory lock on drop.
struct LockGuard(std::fs::File);

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.0);
    }
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::unavailable(StorageBackend::File, err)
}

impl FileStore {
    /// Open (creating if needed) the store in `dir` and verify it is writable.
    pub async fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref();
        tokio::fs::create_dir_all(dir).await.map_err(unavailable)?;

        let path = dir.join(STATE_FILE);
        let store = Self {
            lock_path: path.with_extension("json.lock"),
            temp_path: path.with_extension("json.tmp"),
            path,
        };

        // Lock and parse once: the directory must be usable and the file sane.
        let _guard = store.acquire().await?;
        store.read_records().await?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn acquire(&self) -> StoreResult<LockGuard> {
        let lock_path = self.lock_path.clone();
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<std::fs::File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .read(true)
                .write(true)
                .open(&lock_path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(unavailable)?
        .map_err(unavailable)?;
        Ok(LockGuard(file))
    }

    async fn read_records(&self) -> StoreResult<Records> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Records::new()),
            Err(e) => return Err(unavailable(e)),
        };
        if raw.trim().is_empty() {
            return Ok(Records::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_records(&self, records: &Records) -> StoreResult<()> {
        let content = serde_json::to_vec_pretty(records)?;
        tokio::fs::write(&self.temp_path, &content).await.map_err(unavailable)?;
        tokio::fs::rename(&self.temp_path, &self.path).await.map_err(unavailable)?;
        Ok(())
    }
}

#[async_trait]
impl StateStore for FileStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::File
    }

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>> {
        let mut records = self.read_records().await?;
        Ok(records.remove(&kind.record_key(key)))
    }

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()> {
        let _guard = self.acquire().await?;
        let mut records = self.read_records().await?;
        records.insert(kind.record_key(key), value);
        self.write_records(&records).await
    }

    async fn compare_and_update(
        &self,
        kind: EntityKind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> StoreResult<Value> {
        let _guard = self.acquire().await?;
        let mut records = self.read_records().await?;
        let record_key = kind.record_key(key);
        let next = mutator(records.remove(&record_key));
        records.insert(record_key, next.clone());
        self.write_records(&records).await?;
        Ok(next)
    }

    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let records = self.read_records().await?;
        Ok(records.keys().filter_map(|k| kind.strip(k)).map(ToString::to_string).collect())
    }
}
