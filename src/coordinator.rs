//! Per-firing coordination.
//!
//! A firing is `(job name, intended instant)`. When the job persists, the
//! instance that wins the history insert for that pair owns the firing;
//! everyone else sees a duplicate key and skips. The winner runs the job,
//! then patches the record with the outcome.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Timelike, Utc};
use uuid::Uuid;

use crate::config::{HistoryPatch, HistoryRecord, JobConfig};
use crate::error::CronError;
use crate::executor;
use crate::store::{HistoryStore, InsertOutcome};

/// In-flight executions on this instance. Exists solely to bound
/// `graceful_shutdown`; entries are removed by guard drop even when a
/// firing exits early.
#[derive(Clone, Default)]
pub(crate) struct RunningSet {
    inner: Arc<Mutex<HashSet<Uuid>>>,
}

impl RunningSet {
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    fn enter(&self) -> RunningGuard {
        let id = Uuid::new_v4();
        self.inner.lock().unwrap().insert(id);
        RunningGuard {
            set: Arc::clone(&self.inner),
            id,
        }
    }
}

pub(crate) struct RunningGuard {
    set: Arc<Mutex<HashSet<Uuid>>>,
    id: Uuid,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.set.lock().unwrap().remove(&self.id);
    }
}

/// Run one firing of `config` at `intended_at`.
///
/// Job failures are routed to the job's `on_error` callback and recorded in
/// history; they do not surface as errors here. Only a lease-insert failure
/// other than a duplicate key fails the firing.
pub(crate) async fn run_firing<S: HistoryStore>(
    store: &S,
    config: &JobConfig,
    running: &RunningSet,
    intended_at: DateTime<Utc>,
) -> Result<(), CronError> {
    // The lease key carries second precision only.
    let intended_at = intended_at.with_nanosecond(0).unwrap_or(intended_at);
    let _guard = running.enter();

    let lease_id = if config.persist {
        let record = HistoryRecord {
            id: Uuid::new_v4().to_string(),
            name: config.name.clone(),
            intended_at,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
        };
        match store.insert_history(record).await {
            Ok(InsertOutcome::Inserted(id)) => Some(id),
            Ok(InsertOutcome::Duplicate) => {
                tracing::debug!(
                    job = %config.name,
                    intended_at = %intended_at,
                    "Skipping firing — already running on another instance"
                );
                return Ok(());
            }
            Err(e) => return Err(CronError::Store(e.to_string())),
        }
    } else {
        None
    };

    let outcome = executor::execute(&config.job, intended_at, &config.name, None, None).await;

    if let Some(id) = lease_id {
        let patch = HistoryPatch {
            finished_at: Some(Utc::now()),
            result: outcome.result.clone(),
            error: outcome.error.as_ref().map(|e| e.to_string()),
        };
        if let Err(e) = store.update_history(id, patch).await {
            tracing::warn!(
                job = %config.name,
                error = %e,
                "Failed to record firing outcome"
            );
        }
    }

    if let Some(error) = &outcome.error {
        tracing::error!(
            job = %config.name,
            intended_at = %intended_at,
            duration_ms = outcome.duration.as_millis() as u64,
            error = %error,
            "Job failed"
        );
        if let Some(callback) = &config.on_error {
            if let Err(cb_err) = callback(error, intended_at) {
                tracing::warn!(
                    job = %config.name,
                    error = %cb_err,
                    "Job onError callback failed"
                );
            }
        }
    } else {
        tracing::debug!(
            job = %config.name,
            intended_at = %intended_at,
            duration_ms = outcome.duration.as_millis() as u64,
            "Job completed"
        );
    }

    Ok(())
}
