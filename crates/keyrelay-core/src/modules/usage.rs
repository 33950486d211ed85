//! Daily per-model usage and per-credential call statistics.
//!
//! Reporting only: nothing here feeds back into key selection, so every write
//! is best effort and a store failure is logged and dropped.

use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;

use keyrelay_types::models::usage_day;
use keyrelay_types::protocol::Usage;
use keyrelay_types::{Credential, KeyStats, UsageRecord};

use crate::store::{self, EntityKind, StateStore, StoreResult};

pub struct UsageRecorder {
    store: Arc<dyn StateStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Count one finished request against today's record for `model`.
    pub async fn record_usage(&self, model: &str, success: bool, usage: Option<&Usage>) {
        if let Err(e) = self.record_usage_at(model, success, usage, Utc::now()).await {
            tracing::warn!("Failed to record usage for {}: {}", model, e);
        }
    }

    pub async fn record_usage_at(
        &self,
        model: &str,
        success: bool,
        usage: Option<&Usage>,
        now: DateTime<Utc>,
    ) -> StoreResult<UsageRecord> {
        let date = usage_day(now).to_string();
        let key = format!("{}:{}", date, model);
        let (prompt, completion) = usage.map_or((0, 0), |u| (u.prompt_tokens, u.completion_tokens));
        let model = model.to_string();
        let timestamp = now.timestamp();

        let tally = move |current: Option<UsageRecord>| {
            let mut record = current.unwrap_or_else(|| UsageRecord {
                date: date.clone(),
                model: model.clone(),
                ..UsageRecord::default()
            });
            if success {
                record.success_count += 1;
            } else {
                record.failure_count += 1;
            }
            record.prompt_tokens += prompt;
            record.completion_tokens += completion;
            record.last_call_at = Some(timestamp);
            record
        };
        store::update(self.store.as_ref(), EntityKind::Usage, &key, tally).await
    }

    /// Per-call statistics of one credential, `status` is `None` for transport failures.
    pub async fn record_key_call(&self, credential: &Credential, model: &str, status: Option<u16>) {
        let success = status.is_some_and(|s| (200..300).contains(&s));
        let now = Utc::now().timestamp();
        let result = store::update(
            self.store.as_ref(),
            EntityKind::KeyStats,
            &credential.id,
            |current: Option<KeyStats>| {
                let mut stats = current.unwrap_or_default();
                stats.record(model, success, status, now);
                stats
            },
        )
        .await;
        if let Err(e) = result {
            tracing::warn!("Failed to record key stats for {}: {}", credential.masked(), e);
        }
    }

    /// Records of one usage day, sorted by model.
    pub async fn usage_for_day(&self, day: NaiveDate) -> StoreResult<Vec<UsageRecord>> {
        let prefix = format!("{}:", day);
        let mut records = Vec::new();
        for key in self.store.list_keys(EntityKind::Usage).await? {
            if !key.starts_with(&prefix) {
                continue;
            }
            if let Some(record) =
                store::load::<UsageRecord>(self.store.as_ref(), EntityKind::Usage, &key).await?
            {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.model.cmp(&b.model));
        Ok(records)
    }

    pub async fn today(&self) -> StoreResult<Vec<UsageRecord>> {
        self.usage_for_day(usage_day(Utc::now())).await
    }

    pub async fn key_stats(&self, id: &str) -> StoreResult<Option<KeyStats>> {
        store::load(self.store.as_ref(), EntityKind::KeyStats, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStore, MemoryStore};
    use chrono::TimeZone;

    fn recorder() -> UsageRecorder {
        UsageRecorder::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_usage_rolls_over_at_seven_utc() {
        let recorder = recorder();
        let before = Utc.with_ymd_and_hms(2025, 6, 2, 6, 30, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2025, 6, 2, 7, 30, 0).unwrap();

        recorder.record_usage_at("gpt-5", true, None, before).await.unwrap();
        recorder.record_usage_at("gpt-5", true, None, after).await.unwrap();
        recorder.record_usage_at("gpt-5", false, None, after).await.unwrap();

        let june_1 = recorder.usage_for_day(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()).await;
        let june_2 = recorder.usage_for_day(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()).await;

        let june_1 = june_1.unwrap();
        assert_eq!(june_1.len(), 1);
        assert_eq!(june_1[0].success_count, 1);

        let june_2 = june_2.unwrap();
        assert_eq!(june_2[0].date, "2025-06-02");
        assert_eq!(june_2[0].success_count, 1);
        assert_eq!(june_2[0].failure_count, 1);
    }

    #[tokio::test]
    async fn test_tokens_accumulate_per_model() {
        let recorder = recorder();
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
        let usage = Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 };

        recorder.record_usage_at("claude-sonnet-4", true, Some(&usage), now).await.unwrap();
        recorder.record_usage_at("claude-sonnet-4", true, Some(&usage), now).await.unwrap();
        recorder.record_usage_at("gpt-5", true, None, now).await.unwrap();

        let records = recorder.usage_for_day(usage_day(now)).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].model, "claude-sonnet-4");
        assert_eq!(records[0].prompt_tokens, 20);
        assert_eq!(records[0].completion_tokens, 10);
        assert_eq!(records[1].total_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_usage_records_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(FileStore::open(dir.path()).await.unwrap());
        let recorder = Arc::new(UsageRecorder::new(store));
        let now = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let recorder = Arc::clone(&recorder);
                tokio::spawn(async move {
                    recorder.record_usage_at("gpt-5", true, None, now).await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let records = recorder.usage_for_day(usage_day(now)).await.unwrap();
        assert_eq!(records[0].success_count, 16);
    }

    #[tokio::test]
    async fn test_key_stats() {
        let recorder = recorder();
        let credential = Credential::new("sk-stats-key-123", 30);

        recorder.record_key_call(&credential, "gpt-5", Some(200)).await;
        recorder.record_key_call(&credential, "gpt-5", Some(429)).await;
        recorder.record_key_call(&credential, "gpt-5", None).await;

        let stats = recorder.key_stats(&credential.id).await.unwrap().unwrap();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.last_status, None);
        assert!(recorder.key_stats("unknown").await.unwrap().is_none());
    }
}
