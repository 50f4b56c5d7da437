//! Job registry and instance lifecycle.
//!
//! The registry owns every job entry and its timer. Jobs and the instance
//! carry independent pause state: `pause_job` parks one job, `pause` parks
//! the whole instance while remembering per-job flags, so a paused job stays
//! paused across `pause()` / `start()` cycles.
//!
//! Registry state lives under a plain mutex. No lock is held across an
//! await or while a job body runs, so a job may call back into `add`,
//! `remove`, and friends; such calls take effect immediately while the
//! in-flight firing completes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::config::{CronOptions, HistoryRecord, JobConfig, Schedule, MIN_COLLECTION_TTL};
use crate::coordinator::{self, RunningSet};
use crate::cron;
use crate::error::CronError;
use crate::schedule;
use crate::store::HistoryStore;
use crate::timer::{self, ExecFn, NextFn, RecurringOpts, TimerHandle};

/// Per-process guard ensuring each collection name is initialized exactly
/// once, no matter how many scheduler instances share it.
static INIT_CACHE: OnceLock<Mutex<HashMap<String, Arc<OnceCell<()>>>>> = OnceLock::new();

fn init_cell(collection: &str) -> Arc<OnceCell<()>> {
    let cache = INIT_CACHE.get_or_init(|| Mutex::new(HashMap::new()));
    cache
        .lock()
        .unwrap()
        .entry(collection.to_string())
        .or_default()
        .clone()
}

struct JobEntry {
    config: Arc<JobConfig>,
    timer: Option<TimerHandle>,
    paused: bool,
}

/// One scheduler instance. Instances on different hosts coordinate purely
/// through the shared history store; nothing else is replicated.
pub struct Scheduler<S: HistoryStore> {
    opts: CronOptions,
    store: S,
    entries: Arc<Mutex<HashMap<String, JobEntry>>>,
    running: Arc<AtomicBool>,
    in_flight: RunningSet,
}

impl<S: HistoryStore> Scheduler<S> {
    pub fn new(store: S, opts: CronOptions) -> Self {
        Self {
            opts,
            store,
            entries: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicBool::new(false)),
            in_flight: RunningSet::default(),
        }
    }

    // ── Job registration ─────────────────────────────────────────────────

    /// Register a job. Fails on a duplicate name or an invalid schedule;
    /// when the instance is already running the job is scheduled
    /// immediately.
    pub async fn add(&self, config: JobConfig) -> Result<(), CronError> {
        validate_name(&config.name)?;
        validate_schedule(&config.schedule)?;
        let name = config.name.clone();
        {
            let mut entries = self.entries.lock().unwrap();
            if entries.contains_key(&name) {
                return Err(CronError::JobAlreadyExists { name });
            }
            entries.insert(
                name.clone(),
                JobEntry {
                    config: Arc::new(config),
                    timer: None,
                    paused: false,
                },
            );
        }
        if self.running.load(Ordering::SeqCst) {
            self.ensure_initialized().await?;
            self.schedule_job(&name);
        }
        tracing::info!(job = %name, "Job registered");
        Ok(())
    }

    pub fn remove(&self, name: &str) -> Result<(), CronError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.remove(name) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.cancel();
                }
                tracing::info!(job = %name, "Job removed");
                Ok(())
            }
            None => Err(CronError::JobNotFound {
                name: name.to_string(),
            }),
        }
    }

    pub fn pause_job(&self, name: &str) -> Result<(), CronError> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.get_mut(name).ok_or_else(|| CronError::JobNotFound {
            name: name.to_string(),
        })?;
        if let Some(timer) = entry.timer.take() {
            timer.cancel();
        }
        entry.paused = true;
        tracing::info!(job = %name, "Job paused");
        Ok(())
    }

    pub fn resume_job(&self, name: &str) -> Result<(), CronError> {
        {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries.get_mut(name).ok_or_else(|| CronError::JobNotFound {
                name: name.to_string(),
            })?;
            entry.paused = false;
        }
        if self.running.load(Ordering::SeqCst) {
            self.schedule_job(name);
        }
        tracing::info!(job = %name, "Job resumed");
        Ok(())
    }

    /// False for unknown names.
    pub fn is_job_paused(&self, name: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(name)
            .map_or(false, |e| e.paused)
    }

    pub fn get_job_names(&self) -> Vec<String> {
        self.entries.lock().unwrap().keys().cloned().collect()
    }

    // ── Instance lifecycle ───────────────────────────────────────────────

    /// Initialize the history store (once per process and collection) and
    /// schedule every non-paused job. Idempotent.
    pub async fn start(&self) -> Result<(), CronError> {
        if self.running.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.ensure_initialized().await?;
        self.running.store(true, Ordering::SeqCst);

        let names: Vec<String> = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .filter(|(_, e)| !e.paused)
                .map(|(name, _)| name.clone())
                .collect()
        };
        for name in &names {
            self.schedule_job(name);
        }
        tracing::info!(scheduled = names.len(), "Scheduler started");
        Ok(())
    }

    /// Cancel all timers but keep every entry (including per-job pause
    /// flags). Non-blocking.
    pub fn pause(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut entries = self.entries.lock().unwrap();
        for entry in entries.values_mut() {
            if let Some(timer) = entry.timer.take() {
                timer.cancel();
            }
        }
        tracing::info!("Scheduler paused");
    }

    /// Pause, then discard all entries.
    pub fn stop(&self) {
        self.pause();
        self.entries.lock().unwrap().clear();
        tracing::info!("Scheduler stopped");
    }

    /// Pause, then wait up to `timeout` for in-flight executions to finish.
    pub async fn graceful_shutdown(&self, timeout: Duration) {
        self.pause();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let in_flight = self.in_flight.len();
            if in_flight == 0 {
                tracing::info!("Graceful shutdown complete");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(
                    in_flight,
                    "Graceful shutdown budget expired with executions still in flight"
                );
                return;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ── Introspection ────────────────────────────────────────────────────

    /// The job's next firing instant from the current clock, or `None` when
    /// the job is unknown or its schedule cannot currently be computed.
    pub fn next_scheduled_at(&self, name: &str) -> Option<DateTime<Utc>> {
        let schedule = {
            self.entries
                .lock()
                .unwrap()
                .get(name)
                .map(|e| e.config.schedule.clone())
        }?;
        schedule.next_after(Utc::now(), self.opts.utc).ok()
    }

    /// Status synthesized from registry state and the most recent (≤ 100)
    /// history rows. Store failures degrade to empty history.
    pub async fn get_job_status(&self, name: &str) -> Result<JobStatus, CronError> {
        let (schedule, is_scheduled, is_paused) = {
            let entries = self.entries.lock().unwrap();
            let entry = entries.get(name).ok_or_else(|| CronError::JobNotFound {
                name: name.to_string(),
            })?;
            (
                entry.config.schedule.clone(),
                entry.timer.as_ref().map_or(false, |t| !t.is_done()),
                entry.paused,
            )
        };

        let rows = match self.store.find_recent(name.to_string(), 100).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(job = %name, error = %e, "Failed to load job history");
                Vec::new()
            }
        };

        let completed: Vec<&HistoryRecord> =
            rows.iter().filter(|r| r.finished_at.is_some()).collect();
        let total_runs = completed.len();
        let error_count = completed.iter().filter(|r| r.error.is_some()).count();
        let average_duration_ms = if total_runs > 0 {
            completed
                .iter()
                .filter_map(|r| {
                    r.finished_at
                        .map(|f| (f - r.started_at).num_milliseconds() as f64)
                })
                .sum::<f64>()
                / total_runs as f64
        } else {
            0.0
        };

        Ok(JobStatus {
            name: name.to_string(),
            is_scheduled,
            is_paused,
            next_run_at: schedule.next_after(Utc::now(), self.opts.utc).ok(),
            last_run: rows.first().cloned(),
            stats: JobStats {
                total_runs,
                success_count: total_runs - error_count,
                error_count,
                average_duration_ms,
            },
        })
    }

    pub async fn get_all_job_statuses(&self) -> Vec<JobStatus> {
        let mut names = self.get_job_names();
        names.sort_unstable();
        let mut statuses = Vec::with_capacity(names.len());
        for name in names {
            if let Ok(status) = self.get_job_status(&name).await {
                statuses.push(status);
            }
        }
        statuses
    }

    /// Snapshot of instance health. Non-blocking; never touches the store.
    pub fn health_check(&self) -> HealthReport {
        let now = Utc::now();
        let is_running = self.running.load(Ordering::SeqCst);
        let entries = self.entries.lock().unwrap();
        let mut issues = Vec::new();
        for (name, entry) in entries.iter() {
            if is_running && !entry.paused && entry.timer.as_ref().map_or(true, |t| t.is_done()) {
                issues.push(format!("job '{name}' has no active timer"));
            }
            if let Err(e) = entry.config.schedule.next_after(now, self.opts.utc) {
                issues.push(format!("job '{name}' next run cannot be computed: {e}"));
            }
        }
        issues.sort_unstable();
        HealthReport {
            is_running,
            job_count: entries.len(),
            issues,
        }
    }

    /// Instance counters. Non-blocking; never touches the store.
    pub fn get_metrics(&self) -> Metrics {
        let entries = self.entries.lock().unwrap();
        let scheduled_job_count = entries
            .values()
            .filter(|e| e.timer.as_ref().map_or(false, |t| !t.is_done()))
            .count();
        let paused_job_count = entries.values().filter(|e| e.paused).count();
        Metrics {
            is_running: self.running.load(Ordering::SeqCst),
            job_count: entries.len(),
            scheduled_job_count,
            paused_job_count,
            running_job_count: self.in_flight.len(),
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    async fn ensure_initialized(&self) -> Result<(), CronError> {
        let cell = init_cell(&self.opts.collection_name);
        cell.get_or_try_init(|| async {
            self.store
                .create_unique_index()
                .await
                .map_err(|e| CronError::Store(e.to_string()))?;
            match self.opts.collection_ttl {
                Some(ttl) if ttl >= MIN_COLLECTION_TTL => {
                    self.store
                        .create_ttl_index(ttl)
                        .await
                        .map_err(|e| CronError::Store(e.to_string()))?;
                }
                Some(ttl) => {
                    tracing::warn!(
                        ttl_seconds = ttl,
                        minimum = MIN_COLLECTION_TTL,
                        "Collection TTL below minimum; history records will not expire"
                    );
                }
                None => {}
            }
            tracing::debug!(
                collection = %self.opts.collection_name,
                "History store initialized"
            );
            Ok::<(), CronError>(())
        })
        .await?;
        Ok(())
    }

    /// Arm the job's recurring timer unless it is paused or already armed.
    fn schedule_job(&self, name: &str) {
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.get_mut(name) else {
            return;
        };
        if entry.paused || entry.timer.as_ref().is_some_and(|t| !t.is_done()) {
            return;
        }

        let schedule = entry.config.schedule.clone();
        let utc = self.opts.utc;
        let next_fn: NextFn = Box::new(move |now| schedule.next_after(now, utc));

        let store = self.store.clone();
        let config = Arc::clone(&entry.config);
        let in_flight = self.in_flight.clone();
        let exec_fn: ExecFn = Box::new(move |intended_at| {
            let store = store.clone();
            let config = Arc::clone(&config);
            let in_flight = in_flight.clone();
            Box::pin(async move {
                coordinator::run_firing(&store, &config, &in_flight, intended_at).await
            })
        });

        let job_name = name.to_string();
        let sched_name = name.to_string();
        let opts = RecurringOpts::new(name)
            .on_schedule(move |next_run| {
                tracing::debug!(job = %sched_name, next_run = %next_run, "Next firing scheduled");
            })
            .on_circuit_break(move |cause| {
                let broken = CronError::CircuitBroken {
                    name: job_name.clone(),
                };
                tracing::error!(job = %job_name, cause = %cause, "{broken}");
            });

        entry.timer = Some(timer::schedule_recurring(next_fn, exec_fn, opts));
    }
}

fn validate_name(name: &str) -> Result<(), CronError> {
    if name.is_empty() {
        return Err(CronError::InvalidJobConfig {
            reason: "job name must not be empty".to_string(),
        });
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    {
        return Err(CronError::InvalidJobConfig {
            reason: format!("job name '{name}' may only contain [A-Za-z0-9_-]"),
        });
    }
    Ok(())
}

/// Front-load schedule validation so a bad cron or `at` string fails at
/// registration instead of tripping the timer later.
fn validate_schedule(s: &Schedule) -> Result<(), CronError> {
    match s {
        Schedule::Cron { expr } => cron::parse(expr).map(|_| ()),
        Schedule::Daily { at } => schedule::parse_daily_at(at).map(|_| ()),
        Schedule::Interval { every: 0, .. } => Err(CronError::InvalidSchedule {
            reason: "interval `every` must be at least 1".to_string(),
        }),
        Schedule::Interval { .. } => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStats {
    pub total_runs: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub name: String,
    pub is_scheduled: bool,
    pub is_paused: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run: Option<HistoryRecord>,
    pub stats: JobStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub is_running: bool,
    pub job_count: usize,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Metrics {
    pub is_running: bool,
    pub job_count: usize,
    pub scheduled_job_count: usize,
    pub paused_job_count: usize,
    pub running_job_count: usize,
}
