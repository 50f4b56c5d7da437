//! Job invocation with duration measurement and optional timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use crate::config::JobFn;
use crate::error::{BoxError, CronError};

/// Outcome of one job invocation.
pub struct ExecutionResult {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<BoxError>,
    pub duration: Duration,
    /// True iff `error` is the timeout signal produced by an enforced budget.
    pub timed_out: bool,
}

/// Run `job` once. With a positive `timeout` the body is spawned onto the
/// runtime and raced against the deadline: on expiry the result is a
/// [`CronError::JobTimedOut`] failure, but the body itself is not
/// interrupted and may keep running in the background. `on_timeout` fires
/// only on expiry, never for ordinary failures or successes.
pub async fn execute(
    job: &JobFn,
    intended_at: DateTime<Utc>,
    name: &str,
    timeout: Option<Duration>,
    on_timeout: Option<&(dyn Fn(Duration) + Send + Sync)>,
) -> ExecutionResult {
    let start = Instant::now();
    let fut = job(intended_at, name.to_string());

    let outcome: Result<serde_json::Value, BoxError> = match timeout {
        Some(budget) if !budget.is_zero() => {
            let task = tokio::spawn(fut);
            match tokio::time::timeout(budget, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(Box::new(join_err)),
                Err(_elapsed) => Err(Box::new(CronError::JobTimedOut {
                    name: name.to_string(),
                    timeout_ms: budget.as_millis() as u64,
                })),
            }
        }
        _ => fut.await,
    };

    let duration = start.elapsed();
    match outcome {
        Ok(value) => ExecutionResult {
            success: true,
            result: Some(value),
            error: None,
            duration,
            timed_out: false,
        },
        Err(error) => {
            let timed_out = is_timeout(&error);
            if timed_out {
                if let Some(hook) = on_timeout {
                    hook(duration);
                }
            }
            ExecutionResult {
                success: false,
                result: None,
                error: Some(error),
                duration,
                timed_out,
            }
        }
    }
}

/// Wrap a job so every invocation enforces `timeout` and fails with
/// [`CronError::JobTimedOut`] on expiry. The wrapped body is spawned and
/// not interrupted by the timeout; it may keep running in the background.
pub fn with_timeout(job: JobFn, timeout: Duration) -> JobFn {
    Arc::new(move |intended_at, name| {
        let job = Arc::clone(&job);
        Box::pin(async move {
            let task = tokio::spawn(job(intended_at, name.clone()));
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_err)) => Err(Box::new(join_err) as BoxError),
                Err(_elapsed) => Err(Box::new(CronError::JobTimedOut {
                    name,
                    timeout_ms: timeout.as_millis() as u64,
                }) as BoxError),
            }
        })
    })
}

/// A failure is a timeout iff it is the executor's own timeout signal.
pub(crate) fn is_timeout(error: &BoxError) -> bool {
    matches!(
        error.downcast_ref::<CronError>(),
        Some(CronError::JobTimedOut { .. })
    )
}
