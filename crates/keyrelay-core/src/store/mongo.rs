//! MongoDB backend.
//!
//! Each record is a document `{_id, kind, key, value, version}` where `value`
//! holds the JSON text. Updates are conditional on the version read, and the
//! first insert of a key relies on the `_id` unique index to detect a race.

use async_trait::async_trait;
use mongodb::bson::{doc, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use serde_json::Value;
use std::time::Duration;

use super::{EntityKind, Mutator, StateStore, StorageBackend, StoreError, StoreResult};

const COLLECTION: &str = "keyrelay_state";
const MAX_CAS_ATTEMPTS: usize = 64;
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    collection: Collection<Document>,
}

fn unavailable(err: impl std::fmt::Display) -> StoreError {
    StoreError::unavailable(StorageBackend::MongoDb, err)
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

fn version_of(document: &Document) -> i64 {
    match document.get("version") {
        Some(Bson::Int64(v)) => *v,
        Some(Bson::Int32(v)) => i64::from(*v),
        _ => 0,
    }
}

fn value_of(document: &Document) -> StoreResult<Value> {
    let raw = document
        .get_str("value")
        .map_err(|e| StoreError::Serialization(format!("document without value: {}", e)))?;
    Ok(serde_json::from_str(raw)?)
}

impl MongoStore {
    /// Connect and verify the deployment answers `ping`.
    pub async fn connect(uri: &str, database: &str, timeout: Duration) -> StoreResult<Self> {
        let mut options = ClientOptions::parse(uri).await.map_err(unavailable)?;
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        options.app_name = Some("keyrelay".to_string());

        let client = Client::with_options(options).map_err(unavailable)?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await.map_err(unavailable)?;

        Ok(Self { collection: db.collection(COLLECTION) })
    }
}

#[async_trait]
impl StateStore for MongoStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::MongoDb
    }

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>> {
        let id = kind.record_key(key);
        match self.collection.find_one(doc! { "_id": id.as_str() }).await.map_err(unavailable)? {
            Some(document) => Ok(Some(value_of(&document)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()> {
        let id = kind.record_key(key);
        let payload = serde_json::to_string(&value)?;
        self.collection
            .update_one(
                doc! { "_id": id.as_str() },
                doc! {
                    "$set": { "kind": kind.as_str(), "key": key, "value": payload },
                    "$inc": { "version": 1_i64 },
                },
            )
            .upsert(true)
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
        let id = kind.record_key(key);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let existing = self.collection.find_one(doc! { "_id": id.as_str() }).await.map_err(unavailable)?;

            match existing {
                Some(document) => {
                    let version = version_of(&document);
                    let next = mutator(Some(value_of(&document)?));
                    let payload = serde_json::to_string(&next)?;
                    let result = self
                        .collection
                        .update_one(
                            doc! { "_id": id.as_str(), "version": version },
                            doc! { "$set": { "value": payload, "version": version + 1 } },
                        )
                        .await
                        .map_err(unavailable)?;
                    if result.matched_count == 1 {
                        return Ok(next);
                    }
                },
                None => {
                    let next = mutator(None);
                    let payload = serde_json::to_string(&next)?;
                    let insert = self
                        .collection
                        .insert_one(doc! {
                            "_id": id.as_str(),
                            "kind": kind.as_str(),
                            "key": key,
                            "value": payload,
                            "version": 1_i64,
                        })
                        .await;
                    match insert {
                        Ok(_) => return Ok(next),
                        Err(e) if is_duplicate_key(&e) => {},
                        Err(e) => return Err(unavailable(e)),
                    }
                },
            }
            tracing::trace!("MongoDB CAS conflict on {}", id);
        }

        Err(unavailable(format!(
            "compare_and_update on {} gave up after {} conflicts",
            id, MAX_CAS_ATTEMPTS
        )))
    }

    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let raw = self
            .collection
            .distinct("key", doc! { "kind": kind.as_str() })
            .await
            .map_err(unavailable)?;
        let mut keys: Vec<String> =
            raw.iter().filter_map(Bson::as_str).map(ToString::to_string).collect();
        keys.sort();
        Ok(keys)
    }
}
