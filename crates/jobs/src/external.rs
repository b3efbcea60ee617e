//! Jobs backed by an externally hosted generation API.
//!
//! The task is a single future supplied by the caller. There is no event
//! stream, so the job reports no intermediate progress: it moves to
//! `Running` when it starts awaiting the future and to `ArtifactReady`
//! when the future resolves.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::FutureExt;

use comfybot_core::progress::ProgressSink;
use comfybot_core::types::{Artifacts, BoxError, JobId};

use crate::error::JobError;
use crate::job::{Job, JobState, StateCell};

type Task = BoxFuture<'static, Result<Artifacts, BoxError>>;

pub struct ExternalJob {
    id: JobId,
    task: Mutex<Option<Task>>,
    sink: Option<Arc<dyn ProgressSink>>,
    status: StateCell,
}

impl ExternalJob {
    pub fn new<F>(task: F, sink: Option<Arc<dyn ProgressSink>>) -> Self
    where
        F: Future<Output = Result<Artifacts, BoxError>> + Send + 'static,
    {
        Self {
            id: JobId::next(),
            task: Mutex::new(Some(task.boxed())),
            sink,
            status: StateCell::new(),
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }
}

#[async_trait::async_trait]
impl Job for ExternalJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "external"
    }

    fn progress_sink(&self) -> Option<Arc<dyn ProgressSink>> {
        self.sink.clone()
    }

    async fn execute(self: Arc<Self>) -> Result<Artifacts, JobError> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(JobError::Aborted("external task already consumed"))?;

        self.status.advance(JobState::Running);
        let artifacts = task.await.map_err(JobError::External)?;
        self.status.advance(JobState::ArtifactReady);
        Ok(artifacts)
    }

    fn mark_done(&self) {
        self.status.advance(JobState::Done);
    }
}
