//! In-memory history store for unit testing without a real record store.
//!
//! Enabled with the `test-support` feature:
//!
//! ```toml
//! [dev-dependencies]
//! cronlock = { path = "...", features = ["test-support"] }
//! ```
//!
//! Cloning shares the underlying map, so several `Scheduler` instances
//! handed clones of one `MemoryHistoryStore` contend over the same
//! `(name, intended_at)` keyspace — the in-process equivalent of multiple
//! application instances sharing a collection.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::{HistoryPatch, HistoryRecord};
use crate::store::{HistoryStore, InsertOutcome};

#[derive(Clone, Default)]
pub struct MemoryHistoryStore {
    inner: Arc<Mutex<Inner>>,
    fail_inserts: Arc<AtomicBool>,
    fail_updates: Arc<AtomicBool>,
}

#[derive(Default)]
struct Inner {
    /// Lease keyspace: `(name, intended_at` truncated to seconds`)`.
    leases: HashSet<(String, i64)>,
    records: HashMap<String, HistoryRecord>,
    unique_index_created: bool,
    unique_index_calls: u32,
    ttl_seconds: Option<u64>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a store outage — `insert_history` will fail.
    pub fn deny_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    pub fn allow_inserts(&self) {
        self.fail_inserts.store(false, Ordering::SeqCst);
    }

    /// Simulate update failures (the coordinator must swallow them).
    pub fn deny_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }

    pub fn allow_updates(&self) {
        self.fail_updates.store(false, Ordering::SeqCst);
    }

    /// Snapshot of every record, in no particular order.
    pub fn records(&self) -> Vec<HistoryRecord> {
        self.inner.lock().unwrap().records.values().cloned().collect()
    }

    pub fn record_count(&self) -> usize {
        self.inner.lock().unwrap().records.len()
    }

    pub fn records_for(&self, name: &str) -> Vec<HistoryRecord> {
        self.inner
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn unique_index_created(&self) -> bool {
        self.inner.lock().unwrap().unique_index_created
    }

    /// How many times `create_unique_index` ran; exactly-once init checks.
    pub fn unique_index_calls(&self) -> u32 {
        self.inner.lock().unwrap().unique_index_calls
    }

    pub fn ttl_seconds(&self) -> Option<u64> {
        self.inner.lock().unwrap().ttl_seconds
    }
}

#[derive(Debug)]
pub struct MockStoreError(pub &'static str);

impl std::fmt::Display for MockStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for MockStoreError {}

impl HistoryStore for MemoryHistoryStore {
    type Error = MockStoreError;

    async fn insert_history(
        &self,
        record: HistoryRecord,
    ) -> Result<InsertOutcome, MockStoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(MockStoreError("injected insert failure"));
        }
        let mut inner = self.inner.lock().unwrap();
        let key = (record.name.clone(), record.intended_at.timestamp());
        if !inner.leases.insert(key) {
            return Ok(InsertOutcome::Duplicate);
        }
        let id = record.id.clone();
        inner.records.insert(id.clone(), record);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn update_history(
        &self,
        id: String,
        patch: HistoryPatch,
    ) -> Result<(), MockStoreError> {
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(MockStoreError("injected update failure"));
        }
        let mut inner = self.inner.lock().unwrap();
        let record = inner
            .records
            .get_mut(&id)
            .ok_or(MockStoreError("record not found"))?;
        if patch.finished_at.is_some() {
            record.finished_at = patch.finished_at;
        }
        if patch.result.is_some() {
            record.result = patch.result;
        }
        if patch.error.is_some() {
            record.error = patch.error;
        }
        Ok(())
    }

    async fn find_recent(
        &self,
        name: String,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, MockStoreError> {
        let inner = self.inner.lock().unwrap();
        let mut rows: Vec<HistoryRecord> = inner
            .records
            .values()
            .filter(|r| r.name == name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn create_unique_index(&self) -> Result<(), MockStoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.unique_index_created = true;
        inner.unique_index_calls += 1;
        Ok(())
    }

    async fn create_ttl_index(&self, expire_after_secs: u64) -> Result<(), MockStoreError> {
        self.inner.lock().unwrap().ttl_seconds = Some(expire_after_secs);
        Ok(())
    }
}
