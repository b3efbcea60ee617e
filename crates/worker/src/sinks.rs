//! Progress sink and output surface backed by the log.

use std::sync::Arc;

use bytes::Bytes;

use comfybot_core::progress::{OutputSurface, ProgressSink};
use comfybot_core::types::BoxError;

/// Surface that writes user-facing messages to the log.
pub struct LogSurface {
    id: String,
}

impl LogSurface {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait::async_trait]
impl OutputSurface for LogSurface {
    fn surface_id(&self) -> &str {
        &self.id
    }

    async fn send(&self, message: &str) -> Result<(), BoxError> {
        tracing::warn!(surface = %self.id, "{message}");
        Ok(())
    }
}

/// Logs the progress of one workflow.
pub struct LogProgress {
    workflow: String,
    surface: Arc<dyn OutputSurface>,
}

impl LogProgress {
    pub fn new(workflow: impl Into<String>, surface: Arc<dyn OutputSurface>) -> Self {
        Self {
            workflow: workflow.into(),
            surface,
        }
    }
}

#[async_trait::async_trait]
impl ProgressSink for LogProgress {
    async fn on_progress(&self, fraction: f32, preview: Option<Bytes>) -> Result<(), BoxError> {
        tracing::info!(
            workflow = %self.workflow,
            percent = (fraction * 100.0).round() as u32,
            preview_bytes = preview.as_ref().map(Bytes::len),
            "Progress",
        );
        Ok(())
    }

    fn surface(&self) -> Option<Arc<dyn OutputSurface>> {
        Some(Arc::clone(&self.surface))
    }
}
