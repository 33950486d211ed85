//! In-process store for tests and embedding. Not part of the startup chain.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::{EntityKind, Mutator, StateStore, StorageBackend, StoreResult};

#[derive(Default)]
pub struct MemoryStore {
    records: DashMap<String, Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    fn backend(&self) -> StorageBackend {
        StorageBackend::Memory
    }

    async fn get(&self, kind: EntityKind, key: &str) -> StoreResult<Option<Value>> {
        Ok(self.records.get(&kind.record_key(key)).map(|v| v.value().clone()))
    }

    async fn put(&self, kind: EntityKind, key: &str, value: Value) -> StoreResult<()> {
        self.records.insert(kind.record_key(key), value);
        Ok(())
    }

    async fn compare_and_update(
        &self,
        kind: EntityKind,
        key: &str,
        mutator: Mutator<'_>,
    ) -> StoreResult<Value> {
        // The shard write lock is held only for the synchronous mutator call.
        let next = match self.records.entry(kind.record_key(key)) {
            Entry::Occupied(mut occupied) => {
                let next = mutator(Some(occupied.get().clone()));
                occupied.insert(next.clone());
                next
            },
            Entry::Vacant(vacant) => {
                let next = mutator(None);
                vacant.insert(next.clone());
                next
            },
        };
        Ok(next)
    }

    async fn list_keys(&self, kind: EntityKind) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter_map(|entry| kind.strip(entry.key()).map(ToString::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }
}
