//! Job states and the common run wrapper.

use std::sync::Arc;

use tokio::sync::watch;

use comfybot_core::progress::ProgressSink;
use comfybot_core::types::{Artifacts, JobId};

use crate::error::JobError;
use crate::tracker::{JobTracker, TrackerGuard};

/// Lifecycle of a job. States only ever move forward, in declaration
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum JobState {
    /// Created, nothing sent yet.
    Ready,
    /// Accepted by the backend, waiting for execution to begin.
    Queued,
    /// The backend is executing the prompt.
    Running,
    /// Execution finished; outputs can be fetched.
    ArtifactReady,
    /// The run wrapper has returned.
    Done,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::ArtifactReady => "artifact_ready",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure the backend reported while executing the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub node_id: String,
    pub message: String,
}

/// Observable status: the current state plus any reported failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub failure: Option<ExecutionFailure>,
}

impl JobStatus {
    /// Whether a waiter for the outputs can stop waiting.
    pub fn is_settled(&self) -> bool {
        self.failure.is_some() || self.state >= JobState::ArtifactReady
    }
}

/// Shared, watchable job status.
///
/// Writers go through [`advance`](Self::advance), which refuses to move
/// backwards, so concurrent event handlers cannot regress the state.
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<JobStatus>,
}

impl Default for StateCell {
    fn default() -> Self {
        let (tx, _) = watch::channel(JobStatus {
            state: JobState::Ready,
            failure: None,
        });
        Self { tx }
    }
}

impl StateCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> JobState {
        self.tx.borrow().state
    }

    pub fn status(&self) -> JobStatus {
        self.tx.borrow().clone()
    }

    /// Move to `next` if it is ahead of the current state. Returns
    /// whether the state changed.
    pub fn advance(&self, next: JobState) -> bool {
        self.tx.send_if_modified(|status| {
            if next > status.state {
                status.state = next;
                true
            } else {
                false
            }
        })
    }

    /// Record a backend failure. The first failure wins.
    pub fn fail(&self, failure: ExecutionFailure) -> bool {
        self.tx.send_if_modified(|status| {
            if status.failure.is_none() {
                status.failure = Some(failure);
                true
            } else {
                false
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }
}

/// A unit of generation work.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> JobId;

    /// Short label for logs, e.g. `comfy` or `external`.
    fn kind(&self) -> &'static str;

    /// Where progress is reported, if anywhere. Also used by the tracker
    /// to reach the job's output surface.
    fn progress_sink(&self) -> Option<Arc<dyn ProgressSink>>;

    /// Perform the work and return the artifacts.
    async fn execute(self: Arc<Self>) -> Result<Artifacts, JobError>;

    /// Final transition, made by [`run_job`] once `execute` returns.
    fn mark_done(&self);
}

/// Run a job while it is registered with `tracker`.
///
/// The registration is released on every exit path, including failure
/// and cancellation of the returned future.
pub async fn run_job(job: Arc<dyn Job>, tracker: &Arc<JobTracker>) -> Result<Artifacts, JobError> {
    let id = job.id();
    let kind = job.kind();
    let _tracked = TrackerGuard::new(Arc::clone(tracker), id, job.progress_sink());

    tracing::info!(job = %id, kind, "Job started");
    let result = Arc::clone(&job).execute().await;
    job.mark_done();

    match &result {
        Ok(artifacts) => {
            let files: usize = artifacts.values().map(Vec::len).sum();
            tracing::info!(job = %id, kind, nodes = artifacts.len(), files, "Job finished");
        }
        Err(e) => {
            tracing::error!(job = %id, kind, error = %e, "Job failed");
        }
    }

    result
}
