use std::time::Duration;

/// Default upper bound on how long a job waits for its completion event.
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default minimum spacing between progress callbacks.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Per-job tunables shared by every job a dispatcher creates.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Maximum wait for the backend to finish a prompt. `None` waits
    /// forever.
    pub timeout: Option<Duration>,
    /// Minimum interval between two progress callbacks.
    pub progress_interval: Duration,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_JOB_TIMEOUT),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}
