//! # cronlock
//!
//! Distributed cron scheduler: register named recurring jobs on any number
//! of cooperating application instances, and each scheduled firing runs on
//! exactly one of them.
//!
//! ## Features
//!
//! - Three schedule forms: fixed interval (drift or boundary-aligned),
//!   daily `"HH:MM"`, and five-field cron (`L`, names, `0`/`7` Sunday,
//!   standard day-of-month / day-of-week OR rule).
//! - Coordination by atomic insert: the instance whose history record for
//!   `(job, intended instant)` wins the unique key runs the firing; the
//!   rest skip silently. Any store with atomic create-if-absent works; a
//!   NATS JetStream KV backend ships in [`kv`].
//! - Self-healing timers: delay clamping for far-future firings,
//!   exponential backoff on scheduling failures, and a per-job circuit
//!   breaker — one broken job never takes down the instance.
//! - Lifecycle: per-job pause/resume, instance pause/stop, graceful
//!   shutdown that waits for in-flight executions, plus status, health and
//!   metrics snapshots.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use cronlock::{CronOptions, JobConfig, NatsHistoryStore, Schedule, Scheduler};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), cronlock::CronError> {
//!     let nats = async_nats::connect("nats://localhost:4222").await.unwrap();
//!     let js = async_nats::jetstream::new(nats);
//!     let store = NatsHistoryStore::connect(&js, "cronHistory", None).await?;
//!
//!     let scheduler = Scheduler::new(store, CronOptions::default());
//!     scheduler
//!         .add(JobConfig::new(
//!             "nightly-report",
//!             Schedule::Cron { expr: "0 2 * * MON-FRI".to_string() },
//!             |intended_at, name| async move {
//!                 println!("{name} firing for {intended_at}");
//!                 Ok(serde_json::json!({ "ok": true }))
//!             },
//!         ))
//!         .await?;
//!     scheduler.start().await
//! }
//! ```
//!
//! ## Schedule examples (JSON)
//!
//! ```json
//! { "type": "interval", "every": 15, "unit": "minutes", "aligned": true }
//! ```
//!
//! ```json
//! { "type": "daily", "at": "09:30" }
//! ```
//!
//! ```json
//! { "type": "cron", "expr": "0 9 L * *" }
//! ```

pub mod config;
mod coordinator;
pub mod cron;
pub mod error;
pub mod executor;
pub mod kv;
pub mod schedule;
pub mod scheduler;
pub mod store;
pub mod timer;

#[cfg(any(test, feature = "test-support"))]
pub mod mocks;

pub use config::{CronOptions, HistoryPatch, HistoryRecord, IntervalUnit, JobConfig, Schedule};
pub use error::{BoxError, CronError};
pub use executor::{with_timeout, ExecutionResult};
pub use kv::NatsHistoryStore;
pub use scheduler::{HealthReport, JobStats, JobStatus, Metrics, Scheduler};
pub use store::{HistoryStore, InsertOutcome};
pub use timer::TimerHandle;
