//! Event-driven job for a single backend prompt.
//!
//! A [`ComfyJob`] registers itself as a listener on the shared transport,
//! submits its workflow, and then advances its state from the frames the
//! transport fans out. Frames for other prompts reach every listener, so
//! each one is filtered by prompt id before it can touch the state.
//!
//! The listener is registered before the prompt is submitted, so a fast
//! or fully cached prompt may finish before the backend's answer to the
//! submission arrives. Prompt-tagged messages seen in that window are held
//! and replayed once the prompt id is known.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::time::Instant;

use comfybot_comfyui::messages::{self, ComfyUIMessage};
use comfybot_comfyui::{ComfyUIApi, Frame, FrameListener, ListenerError, ListenerId, Transport};
use comfybot_core::progress::ProgressSink;
use comfybot_core::types::{Artifacts, JobId, PromptId};

use crate::config::JobConfig;
use crate::error::JobError;
use crate::job::{ExecutionFailure, Job, JobState, JobStatus, StateCell};
use crate::retrieval::retrieve_artifacts;
use crate::throttle::Throttle;

/// Most messages held while the prompt id is still unknown. Older ones
/// are dropped first.
const HELD_MESSAGE_LIMIT: usize = 64;

/// Mutable per-job data touched by the frame handler.
struct Inner {
    prompt_id: Option<PromptId>,
    /// Latest preview, replaced in place.
    preview: Option<Bytes>,
    throttle: Throttle,
    completion_reported: bool,
    /// Tagged messages received before `prompt_id` was known.
    held: VecDeque<ComfyUIMessage>,
}

pub struct ComfyJob {
    id: JobId,
    payload: serde_json::Value,
    api: ComfyUIApi,
    transport: Arc<Transport>,
    sink: Option<Arc<dyn ProgressSink>>,
    config: JobConfig,
    status: StateCell,
    inner: Mutex<Inner>,
}

impl ComfyJob {
    pub fn new(
        api: ComfyUIApi,
        transport: Arc<Transport>,
        payload: serde_json::Value,
        sink: Option<Arc<dyn ProgressSink>>,
        config: JobConfig,
    ) -> Self {
        let inner = Inner {
            prompt_id: None,
            preview: None,
            throttle: Throttle::new(config.progress_interval),
            completion_reported: false,
            held: VecDeque::new(),
        };
        Self {
            id: JobId::next(),
            payload,
            api,
            transport,
            sink,
            config,
            status: StateCell::new(),
            inner: Mutex::new(inner),
        }
    }

    pub fn state(&self) -> JobState {
        self.status.state()
    }

    /// Observe state transitions.
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<JobStatus> {
        self.status.subscribe()
    }

    /// Backend id of the prompt, once submitted.
    pub fn prompt_id(&self) -> Option<PromptId> {
        self.lock().prompt_id.clone()
    }

    /// Queue the workflow on the backend and move to `Queued`.
    pub async fn submit(&self) -> Result<PromptId, JobError> {
        let response = self
            .api
            .queue_prompt(&self.payload, self.transport.client_id())
            .await
            .map_err(JobError::Submission)?;

        tracing::info!(
            job = %self.id,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Prompt queued",
        );
        self.mark_queued(response.prompt_id.clone()).await;
        Ok(response.prompt_id)
    }

    /// Adopt `prompt_id`, move to `Queued`, and replay the messages for
    /// it that arrived first.
    pub(crate) async fn mark_queued(&self, prompt_id: PromptId) {
        let held = {
            let mut inner = self.lock();
            inner.prompt_id = Some(prompt_id.clone());
            std::mem::take(&mut inner.held)
        };
        self.status.advance(JobState::Queued);

        let early: Vec<ComfyUIMessage> = held
            .into_iter()
            .filter(|m| m.prompt_id() == Some(prompt_id.as_str()))
            .collect();
        if !early.is_empty() {
            tracing::debug!(job = %self.id, replayed = early.len(), "Replaying early messages");
        }
        for message in early {
            if self.status.status().failure.is_some() {
                break;
            }
            self.handle_message(message).await;
        }
    }

    /// Wait until the backend has finished the prompt.
    ///
    /// Resolves once the job reaches `ArtifactReady`, fails with
    /// [`JobError::Execution`] if the backend reported an error, and with
    /// [`JobError::Timeout`] if neither happens within the configured
    /// limit.
    pub async fn await_artifact_ready(&self) -> Result<(), JobError> {
        let mut rx = self.status.subscribe();
        let settled = async {
            rx.wait_for(JobStatus::is_settled)
                .await
                .map(|status| status.clone())
        };

        let status = match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, settled)
                .await
                .map_err(|_| JobError::Timeout(limit))?,
            None => settled.await,
        }
        .map_err(|_| JobError::Aborted("job status channel closed"))?;

        match status.failure {
            Some(failure) => Err(JobError::Execution {
                node_id: failure.node_id,
                message: failure.message,
            }),
            None => Ok(()),
        }
    }

    /// Keep a tagged message until the prompt id is known. Returns the
    /// message back if the id was adopted meanwhile.
    fn hold(&self, message: ComfyUIMessage) -> Option<ComfyUIMessage> {
        if message.prompt_id().is_none() {
            return None;
        }
        let mut inner = self.lock();
        if inner.prompt_id.is_some() {
            return Some(message);
        }
        if inner.held.len() == HELD_MESSAGE_LIMIT {
            inner.held.pop_front();
        }
        inner.held.push_back(message);
        None
    }

    fn is_ours(&self, prompt_id: Option<&str>) -> bool {
        match prompt_id {
            Some(id) => self.lock().prompt_id.as_deref() == Some(id),
            None => true,
        }
    }

    async fn handle_message(&self, message: ComfyUIMessage) {
        if !self.is_ours(message.prompt_id()) {
            return;
        }

        match message {
            ComfyUIMessage::ExecutionStart(data) => {
                if self.status.advance(JobState::Running) {
                    tracing::info!(job = %self.id, prompt_id = %data.prompt_id, "Execution started");
                }
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(job = %self.id, cached = data.nodes.len(), "Cached nodes skipped");
            }
            ComfyUIMessage::Executing(data) => match data.node {
                Some(node) => {
                    tracing::debug!(job = %self.id, node = %node, "Executing node");
                }
                None => self.complete().await,
            },
            ComfyUIMessage::Progress(data) => {
                if self.status.state() != JobState::Running {
                    return;
                }
                let preview = {
                    let mut inner = self.lock();
                    if !inner.throttle.try_acquire(Instant::now()) {
                        return;
                    }
                    inner.preview.clone()
                };
                self.report(data.fraction(), preview).await;
            }
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    job = %self.id,
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    exception_type = %data.exception_type,
                    "Backend execution failed: {}",
                    data.exception_message,
                );
                self.status.fail(ExecutionFailure {
                    node_id: data.node_id,
                    message: data.exception_message,
                });
            }
        }
    }

    /// Report 100% once, then release the waiter.
    async fn complete(&self) {
        let preview = {
            let mut inner = self.lock();
            if inner.completion_reported {
                return;
            }
            inner.completion_reported = true;
            inner.preview.clone()
        };
        self.report(1.0, preview).await;
        self.status.advance(JobState::ArtifactReady);
        tracing::info!(job = %self.id, "Outputs ready");
    }

    async fn report(&self, fraction: f32, preview: Option<Bytes>) {
        let Some(sink) = &self.sink else {
            return;
        };
        if let Err(e) = sink.on_progress(fraction, preview).await {
            tracing::warn!(job = %self.id, error = %e, "Progress sink failed");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait::async_trait]
impl FrameListener for ComfyJob {
    fn listener_id(&self) -> ListenerId {
        self.id
    }

    async fn on_frame(&self, frame: &Frame) -> Result<(), ListenerError> {
        let status = self.status.status();
        // A failed prompt is still followed by `executing` with no node.
        if status.failure.is_some() {
            return Ok(());
        }
        let state = status.state;

        if state == JobState::Ready {
            if let Frame::Text(text) = frame {
                if let Some(message) = messages::parse_message(text)?.and_then(|m| self.hold(m)) {
                    self.handle_message(message).await;
                }
            }
            return Ok(());
        }
        if !matches!(state, JobState::Queued | JobState::Running) {
            return Ok(());
        }

        match frame {
            Frame::Binary(data) => {
                if state == JobState::Running {
                    if let Some(preview) = messages::preview_payload(data) {
                        self.lock().preview = Some(preview);
                    }
                }
            }
            Frame::Text(text) => {
                if let Some(message) = messages::parse_message(text)? {
                    self.handle_message(message).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Job for ComfyJob {
    fn id(&self) -> JobId {
        self.id
    }

    fn kind(&self) -> &'static str {
        "comfy"
    }

    fn progress_sink(&self) -> Option<Arc<dyn ProgressSink>> {
        self.sink.clone()
    }

    async fn execute(self: Arc<Self>) -> Result<Artifacts, JobError> {
        if !self.transport.is_connected() {
            tracing::warn!(job = %self.id, "Event stream is down, refusing to submit");
            return Err(JobError::TransportUnavailable);
        }

        let _listening = self.transport.register(self.clone());
        let prompt_id = self.submit().await?;
        self.await_artifact_ready().await?;
        Ok(retrieve_artifacts(&self.api, &prompt_id).await?)
    }

    fn mark_done(&self) {
        self.status.advance(JobState::Done);
    }
}
