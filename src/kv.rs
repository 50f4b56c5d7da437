//! NATS JetStream KV implementation of the record-store contract.
//!
//! One KV bucket per collection name. A firing's lease key is
//! `hist.<name>.<intended_at epoch seconds>`; the bucket's atomic
//! create-if-absent is the uniqueness primitive, so no separate index
//! exists or is needed. Expiry rides on the bucket's `max_age`, which NATS
//! applies from a record's last write rather than `started_at` — for cron
//! history (one update at finish) the difference is one job duration.

use std::time::Duration;

use async_nats::jetstream::{self, kv};
use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::config::{HistoryPatch, HistoryRecord};
use crate::error::CronError;
use crate::store::{HistoryStore, InsertOutcome};

pub const HISTORY_KEY_PREFIX: &str = "hist.";

/// History store backed by a NATS JetStream KV bucket.
#[derive(Clone)]
pub struct NatsHistoryStore {
    store: kv::Store,
}

impl NatsHistoryStore {
    /// Get or create the bucket for `collection`. `ttl` (when set) becomes
    /// the bucket's `max_age`; it only takes effect when this call creates
    /// the bucket.
    pub async fn connect(
        js: &jetstream::Context,
        collection: &str,
        ttl: Option<Duration>,
    ) -> Result<Self, CronError> {
        let store = get_or_create(
            js,
            kv::Config {
                bucket: collection.to_string(),
                history: 1,
                max_age: ttl.unwrap_or_default(),
                ..Default::default()
            },
        )
        .await?;
        Ok(Self { store })
    }
}

async fn get_or_create(js: &jetstream::Context, config: kv::Config) -> Result<kv::Store, CronError> {
    let name = config.bucket.clone();
    match js.create_key_value(config).await {
        Ok(store) => Ok(store),
        Err(_) => js
            .get_key_value(&name)
            .await
            .map_err(|e| CronError::Store(e.to_string())),
    }
}

fn history_key(name: &str, intended_at: DateTime<Utc>) -> String {
    format!("{HISTORY_KEY_PREFIX}{name}.{}", intended_at.timestamp())
}

impl HistoryStore for NatsHistoryStore {
    type Error = CronError;

    async fn insert_history(&self, record: HistoryRecord) -> Result<InsertOutcome, CronError> {
        let key = history_key(&record.name, record.intended_at);
        let bytes = serde_json::to_vec(&record)?;
        match self.store.create(&key, bytes.into()).await {
            Ok(_revision) => Ok(InsertOutcome::Inserted(key)),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => {
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(CronError::Store(e.to_string())),
        }
    }

    async fn update_history(&self, id: String, patch: HistoryPatch) -> Result<(), CronError> {
        // Single writer per lease key, so read-modify-write is race-free.
        let bytes = self
            .store
            .get(&id)
            .await
            .map_err(|e| CronError::Store(e.to_string()))?
            .ok_or_else(|| CronError::Store(format!("history record '{id}' not found")))?;
        let mut record: HistoryRecord = serde_json::from_slice(&bytes)?;
        if patch.finished_at.is_some() {
            record.finished_at = patch.finished_at;
        }
        if patch.result.is_some() {
            record.result = patch.result;
        }
        if patch.error.is_some() {
            record.error = patch.error;
        }
        self.store
            .put(&id, serde_json::to_vec(&record)?.into())
            .await
            .map_err(|e| CronError::Store(e.to_string()))?;
        Ok(())
    }

    async fn find_recent(&self, name: String, limit: usize) -> Result<Vec<HistoryRecord>, CronError> {
        let prefix = format!("{HISTORY_KEY_PREFIX}{name}.");
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(|e| CronError::Store(e.to_string()))?;

        let mut rows = Vec::new();
        while let Some(key) = keys.next().await {
            let key = key.map_err(|e| CronError::Store(e.to_string()))?;
            if !key.starts_with(&prefix) {
                continue;
            }
            // Entries can expire between listing and fetch.
            if let Some(bytes) = self
                .store
                .get(&key)
                .await
                .map_err(|e| CronError::Store(e.to_string()))?
            {
                rows.push(serde_json::from_slice::<HistoryRecord>(&bytes)?);
            }
        }
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn create_unique_index(&self) -> Result<(), CronError> {
        // Uniqueness is intrinsic: `create` is atomic create-if-absent on
        // the lease key. Nothing to build.
        Ok(())
    }

    async fn create_ttl_index(&self, _expire_after_secs: u64) -> Result<(), CronError> {
        // Expiry is the bucket's max_age, fixed at creation in `connect`.
        Ok(())
    }
}
