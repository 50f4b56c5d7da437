//! Record-store contract.
//!
//! Any backend with an atomic create-if-absent on the `(name, intended_at)`
//! pair can coordinate firings. Implementations must report a duplicate key
//! as [`InsertOutcome::Duplicate`], not as an error — losing the race is the
//! expected outcome on every instance but one.

use std::future::Future;

use crate::config::{HistoryPatch, HistoryRecord};

/// Result of a lease-insert attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The insert won; the id addresses the record for later updates.
    Inserted(String),
    /// Another instance already holds `(name, intended_at)`.
    Duplicate,
}

pub trait HistoryStore: Send + Sync + Clone + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert a history record. MUST be atomic on the unique pair
    /// `(name, intended_at)` with second precision preserved.
    fn insert_history(
        &self,
        record: HistoryRecord,
    ) -> impl Future<Output = Result<InsertOutcome, Self::Error>> + Send;

    /// Apply a partial update (`finished_at` / `result` / `error`) to the
    /// record addressed by `id`.
    fn update_history(
        &self,
        id: String,
        patch: HistoryPatch,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Most recent records for a job, newest first by `started_at`.
    fn find_recent(
        &self,
        name: String,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<HistoryRecord>, Self::Error>> + Send;

    /// Idempotent; create-if-absent.
    fn create_unique_index(&self) -> impl Future<Output = Result<(), Self::Error>> + Send;

    /// Idempotent; records expire `expire_after_secs` after `started_at`.
    fn create_ttl_index(
        &self,
        expire_after_secs: u64,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}
