/// Errors produced by job bodies and `onError` callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum CronError {
    /// A cron expression or daily `at` string is ill-formed.
    Parse {
        field: &'static str,
        token: String,
        reason: String,
    },
    /// A schedule value is semantically invalid (e.g. `every: 0`).
    InvalidSchedule { reason: String },
    /// No matching instant exists within the four-year search horizon.
    ImpossibleSchedule { detail: String },
    JobAlreadyExists { name: String },
    JobNotFound { name: String },
    InvalidJobConfig { reason: String },
    /// A record-store failure other than a duplicate lease key.
    Store(String),
    /// The timer loop could not compute or arm the next firing.
    SchedulingFailure(String),
    /// Produced by the executor when a timed job exceeds its budget.
    JobTimedOut { name: String, timeout_ms: u64 },
    /// Terminal state of a single job's timer after repeated failures.
    CircuitBroken { name: String },
    Serde(serde_json::Error),
}

impl std::fmt::Display for CronError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse {
                field,
                token,
                reason,
            } => write!(f, "invalid {field} field '{token}': {reason}"),
            Self::InvalidSchedule { reason } => write!(f, "invalid schedule: {reason}"),
            Self::ImpossibleSchedule { detail } => {
                write!(f, "schedule never matches: {detail}")
            }
            Self::JobAlreadyExists { name } => write!(f, "job '{name}' already exists"),
            Self::JobNotFound { name } => write!(f, "job '{name}' not found"),
            Self::InvalidJobConfig { reason } => write!(f, "invalid job config: {reason}"),
            Self::Store(msg) => write!(f, "store error: {msg}"),
            Self::SchedulingFailure(msg) => write!(f, "scheduling failure: {msg}"),
            Self::JobTimedOut { name, timeout_ms } => {
                write!(f, "job '{name}' timed out after {timeout_ms}ms")
            }
            Self::CircuitBroken { name } => {
                write!(f, "job '{name}' circuit breaker tripped; timer stopped")
            }
            Self::Serde(e) => write!(f, "serialization error: {e}"),
        }
    }
}

impl std::error::Error for CronError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serde(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for CronError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e)
    }
}
