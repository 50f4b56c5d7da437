use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::BoxError;

/// How often a job fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Fire every N units, either drifting from the previous scheduling
    /// instant (`aligned: false`) or snapped to boundary multiples of the
    /// unit in the selected time zone (`aligned: true`).
    Interval {
        every: u32,
        unit: IntervalUnit,
        #[serde(default)]
        aligned: bool,
    },
    /// Fire once a day at `"H:MM"` / `"HH:MM"` wall-clock time.
    Daily { at: String },
    /// Five-field cron expression: minute hour day-of-month month day-of-week.
    Cron { expr: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntervalUnit {
    Seconds,
    Minutes,
    Hours,
    /// Aligned day intervals with `every > 1` are anchored to "today at
    /// midnight plus `every` days" — the anchor follows the scheduling
    /// instant, it is not snapped to a calendar epoch.
    Days,
}

/// Future returned by a job body.
pub type JobFuture = BoxFuture<'static, Result<serde_json::Value, BoxError>>;

/// A job body. Invoked with the intended firing instant (sub-second fields
/// zeroed) and the job name. Synchronous bodies wrap into an
/// immediately-ready future via [`JobConfig::new_sync`].
pub type JobFn = Arc<dyn Fn(DateTime<Utc>, String) -> JobFuture + Send + Sync>;

/// Callback invoked when a job body fails. Errors it returns are caught and
/// logged by the coordinator, never propagated.
pub type OnErrorFn = Arc<dyn Fn(&BoxError, DateTime<Utc>) -> Result<(), BoxError> + Send + Sync>;

/// Definition of a recurring job.
#[derive(Clone)]
pub struct JobConfig {
    /// Unique, non-empty. Restricted to `[A-Za-z0-9_-]` so names embed
    /// directly into record-store keys.
    pub name: String,
    pub schedule: Schedule,
    pub job: JobFn,
    /// When false, no lease is acquired and no history is written: the job
    /// runs unconditionally on every instance at every firing.
    pub persist: bool,
    pub on_error: Option<OnErrorFn>,
}

impl JobConfig {
    pub fn new<F, Fut>(name: impl Into<String>, schedule: Schedule, job: F) -> Self
    where
        F: Fn(DateTime<Utc>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, BoxError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            schedule,
            job: Arc::new(move |at, name| Box::pin(job(at, name))),
            persist: true,
            on_error: None,
        }
    }

    /// Wrap a synchronous job body into an immediately-complete future.
    pub fn new_sync<F>(name: impl Into<String>, schedule: Schedule, job: F) -> Self
    where
        F: Fn(DateTime<Utc>, String) -> Result<serde_json::Value, BoxError>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, schedule, move |at, name| {
            std::future::ready(job(at, name))
        })
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&BoxError, DateTime<Utc>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for JobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobConfig")
            .field("name", &self.name)
            .field("schedule", &self.schedule)
            .field("persist", &self.persist)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// One firing's record in the shared store. `(name, intended_at)` is unique
/// across the store — the insert that wins this key owns the firing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: String,
    pub name: String,
    /// Second precision; sub-second fields are zeroed before insertion.
    pub intended_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Partial update applied to a history record once a firing completes.
#[derive(Debug, Clone, Default)]
pub struct HistoryPatch {
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// TTLs below this are rejected with a logged warning and no TTL expiry.
pub const MIN_COLLECTION_TTL: u64 = 300;

/// Instance-wide options.
#[derive(Debug, Clone)]
pub struct CronOptions {
    pub collection_name: String,
    /// Seconds after `started_at` at which history records expire.
    /// `None` disables expiry.
    pub collection_ttl: Option<u64>,
    /// Compute all wall-clock schedules in UTC instead of local time.
    /// Recommended for production; local mode is subject to DST anomalies.
    pub utc: bool,
}

impl Default for CronOptions {
    fn default() -> Self {
        Self {
            collection_name: "cronHistory".to_string(),
            collection_ttl: Some(172_800),
            utc: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_deserializes_tagged_interval() {
        let s: Schedule = serde_json::from_str(
            r#"{ "type": "interval", "every": 15, "unit": "minutes", "aligned": true }"#,
        )
        .unwrap();
        assert_eq!(
            s,
            Schedule::Interval {
                every: 15,
                unit: IntervalUnit::Minutes,
                aligned: true
            }
        );
    }

    #[test]
    fn schedule_aligned_defaults_to_false() {
        let s: Schedule =
            serde_json::from_str(r#"{ "type": "interval", "every": 5, "unit": "seconds" }"#)
                .unwrap();
        assert_eq!(
            s,
            Schedule::Interval {
                every: 5,
                unit: IntervalUnit::Seconds,
                aligned: false
            }
        );
    }

    #[test]
    fn schedule_rejects_mixed_shape() {
        // Tagged as interval but carrying a cron expression — unknown fields
        // for the variant must not silently coerce into something runnable.
        let s: Result<Schedule, _> =
            serde_json::from_str(r#"{ "type": "cron", "every": 5, "unit": "seconds" }"#);
        assert!(s.is_err());
    }

    #[test]
    fn schedule_rejects_untyped_shape() {
        let s: Result<Schedule, _> = serde_json::from_str(r#"{ "every": 5 }"#);
        assert!(s.is_err());
    }

    #[test]
    fn history_record_roundtrips_optional_fields() {
        let rec = HistoryRecord {
            id: "r1".to_string(),
            name: "backup".to_string(),
            intended_at: Utc::now(),
            started_at: Utc::now(),
            finished_at: None,
            result: None,
            error: None,
        };
        let json = serde_json::to_string(&rec).unwrap();
        assert!(!json.contains("finished_at"), "unset options must be omitted");
        let back: HistoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "backup");
    }

    #[test]
    fn default_options() {
        let opts = CronOptions::default();
        assert_eq!(opts.collection_name, "cronHistory");
        assert_eq!(opts.collection_ttl, Some(172_800));
        assert!(!opts.utc);
    }
}
