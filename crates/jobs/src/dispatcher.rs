//! Entry point for running jobs against one backend.

use std::future::Future;
use std::sync::Arc;

use comfybot_comfyui::{ComfyUIApi, Transport};
use comfybot_core::progress::ProgressSink;
use comfybot_core::types::{Artifacts, BoxError};

use crate::comfy_job::ComfyJob;
use crate::config::JobConfig;
use crate::error::JobError;
use crate::external::ExternalJob;
use crate::job::run_job;
use crate::tracker::JobTracker;

/// Shared handles every job needs. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    api: ComfyUIApi,
    transport: Arc<Transport>,
    tracker: Arc<JobTracker>,
    config: JobConfig,
}

impl Dispatcher {
    pub fn new(
        api: ComfyUIApi,
        transport: Arc<Transport>,
        tracker: Arc<JobTracker>,
        config: JobConfig,
    ) -> Self {
        Self {
            api,
            transport,
            tracker,
            config,
        }
    }

    /// Build a backend job without running it.
    pub fn comfy_job(
        &self,
        payload: serde_json::Value,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Arc<ComfyJob> {
        Arc::new(ComfyJob::new(
            self.api.clone(),
            Arc::clone(&self.transport),
            payload,
            sink,
            self.config.clone(),
        ))
    }

    /// Submit `payload` to the backend and return its outputs by node id.
    pub async fn run(
        &self,
        payload: serde_json::Value,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Artifacts, JobError> {
        run_job(self.comfy_job(payload, sink), &self.tracker).await
    }

    /// Run an externally hosted task as a tracked job.
    pub async fn run_external<F>(
        &self,
        task: F,
        sink: Option<Arc<dyn ProgressSink>>,
    ) -> Result<Artifacts, JobError>
    where
        F: Future<Output = Result<Artifacts, BoxError>> + Send + 'static,
    {
        run_job(Arc::new(ExternalJob::new(task, sink)), &self.tracker).await
    }

    pub fn active_job_count(&self) -> usize {
        self.tracker.count()
    }

    /// Broadcast `message` to every surface with a running job.
    pub async fn notify_all(&self, message: &str) -> usize {
        self.tracker.notify_all(message).await
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn tracker(&self) -> &Arc<JobTracker> {
        &self.tracker
    }
}
