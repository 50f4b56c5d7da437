//! Self-healing recurring timers.
//!
//! Each job gets one timer task: compute the next firing instant, validate
//! it, sleep, fire, repeat. Failures to *schedule* (a bad or non-future
//! instant) back off exponentially and trip a per-job circuit breaker after
//! repeated attempts; failures to *execute* are reported and never affect
//! the loop. Cancellation is cooperative (an `AtomicBool` plus `Notify`);
//! a firing whose execution already began runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use futures::future::BoxFuture;
use tokio::sync::Notify;

use crate::error::CronError;

/// Longest single sleep the timer will arm (~24.8 days). Delays beyond this
/// are clamped: the timer wakes, recomputes, and re-arms without executing,
/// so no firing is ever dropped by the clamp.
pub const MAX_DELAY_MS: i64 = 2_147_483_647;

pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;

const BACKOFF_BASE_MS: u64 = 10;
const BACKOFF_CAP_MS: u64 = 60_000;

/// Computes the next firing instant given the current time.
pub type NextFn = Box<dyn Fn(DateTime<Utc>) -> Result<DateTime<Utc>, CronError> + Send + Sync>;

/// Runs one firing at its intended instant.
pub type ExecFn =
    Box<dyn Fn(DateTime<Utc>) -> BoxFuture<'static, Result<(), CronError>> + Send + Sync>;

type ScheduleHook = Arc<dyn Fn(DateTime<Utc>) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&CronError) + Send + Sync>;

pub struct RecurringOpts {
    /// Label for log lines; typically the job name.
    pub name: String,
    pub max_consecutive_failures: u32,
    pub on_schedule: Option<ScheduleHook>,
    pub on_error: Option<ErrorHook>,
    pub on_circuit_break: Option<ErrorHook>,
}

impl RecurringOpts {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            on_schedule: None,
            on_error: None,
            on_circuit_break: None,
        }
    }

    pub fn on_schedule<F>(mut self, f: F) -> Self
    where
        F: Fn(DateTime<Utc>) + Send + Sync + 'static,
    {
        self.on_schedule = Some(Arc::new(f));
        self
    }

    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&CronError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    pub fn on_circuit_break<F>(mut self, f: F) -> Self
    where
        F: Fn(&CronError) + Send + Sync + 'static,
    {
        self.on_circuit_break = Some(Arc::new(f));
        self
    }
}

/// Cancellation handle for a recurring or one-shot timer.
#[derive(Clone)]
pub struct TimerHandle {
    done: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl TimerHandle {
    fn new() -> Self {
        Self {
            done: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Stop the timer. Idempotent; an execution already in flight completes.
    pub fn cancel(&self) {
        if !self.done.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// True once the timer was cancelled or its circuit breaker tripped.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Deterministic exponential backoff: `10 · 2^(failures−1)` ms, capped at
/// one minute.
fn backoff_delay(failures: u32) -> Duration {
    let exponent = failures.saturating_sub(1).min(16);
    Duration::from_millis((BACKOFF_BASE_MS << exponent).min(BACKOFF_CAP_MS))
}

/// Arm a recurring timer. Every tick independently computes the next firing
/// via `next_fn`, sleeps, then runs `exec_fn` with the intended instant
/// (sub-second fields zeroed).
pub fn schedule_recurring(next_fn: NextFn, exec_fn: ExecFn, opts: RecurringOpts) -> TimerHandle {
    let handle = TimerHandle::new();
    let h = handle.clone();

    tokio::spawn(async move {
        let mut failures: u32 = 0;

        loop {
            if h.done.load(Ordering::SeqCst) {
                break;
            }

            let now = Utc::now();
            let computed = next_fn(now).and_then(|t| {
                if t > now {
                    Ok(t)
                } else {
                    Err(CronError::SchedulingFailure(format!(
                        "computed next run {t} is not after {now}"
                    )))
                }
            });

            let next_run = match computed {
                Ok(t) => t,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(
                        job = %opts.name,
                        consecutive_failures = failures,
                        error = %e,
                        "Failed to schedule next run"
                    );
                    if let Some(hook) = &opts.on_error {
                        hook(&e);
                    }
                    if failures >= opts.max_consecutive_failures {
                        tracing::error!(
                            job = %opts.name,
                            consecutive_failures = failures,
                            "Giving up on job after repeated scheduling failures"
                        );
                        h.done.store(true, Ordering::SeqCst);
                        if let Some(hook) = &opts.on_circuit_break {
                            hook(&e);
                        }
                        break;
                    }
                    tokio::select! {
                        _ = h.notify.notified() => break,
                        _ = tokio::time::sleep(backoff_delay(failures)) => {}
                    }
                    continue;
                }
            };

            failures = 0;
            if let Some(hook) = &opts.on_schedule {
                hook(next_run);
            }

            let delay_ms = (next_run - Utc::now()).num_milliseconds().max(0);
            if delay_ms > MAX_DELAY_MS {
                // Too far out for one sleep: wake at the clamp horizon and
                // recompute instead of executing.
                tokio::select! {
                    _ = h.notify.notified() => break,
                    _ = tokio::time::sleep(Duration::from_millis(MAX_DELAY_MS as u64)) => {}
                }
                continue;
            }

            tokio::select! {
                _ = h.notify.notified() => break,
                _ = tokio::time::sleep(Duration::from_millis(delay_ms as u64)) => {
                    // A cancel that raced the sleep still wins.
                    if h.done.load(Ordering::SeqCst) {
                        break;
                    }
                    let intended_at = next_run.with_nanosecond(0).unwrap_or(next_run);
                    // Run the firing in its own task and re-enter scheduling
                    // immediately: a slow execution must neither delay nor
                    // coalesce subsequent firings, so overlapping executions
                    // of the same job on this instance are possible.
                    let fut = exec_fn(intended_at);
                    let job = opts.name.clone();
                    let on_error = opts.on_error.clone();
                    tokio::spawn(async move {
                        if let Err(e) = fut.await {
                            tracing::error!(job = %job, error = %e, "Firing failed");
                            if let Some(hook) = on_error {
                                hook(&e);
                            }
                        }
                    });
                }
            }
        }
    });

    handle
}

/// Arm a single-shot timer. `delay` must not exceed [`MAX_DELAY_MS`].
/// Errors returned by `f` are logged and do not propagate.
pub fn schedule_once<F, Fut>(delay: Duration, f: F) -> Result<TimerHandle, CronError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<(), CronError>> + Send + 'static,
{
    if delay.as_millis() > MAX_DELAY_MS as u128 {
        return Err(CronError::SchedulingFailure(format!(
            "delay {}ms outside [0, {MAX_DELAY_MS}]",
            delay.as_millis()
        )));
    }

    let handle = TimerHandle::new();
    let h = handle.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = h.notify.notified() => {}
            _ = tokio::time::sleep(delay) => {
                if !h.done.load(Ordering::SeqCst) {
                    if let Err(e) = f().await {
                        tracing::error!(error = %e, "One-shot timer callback failed");
                    }
                }
                h.done.store(true, Ordering::SeqCst);
            }
        }
    });
    Ok(handle)
}
