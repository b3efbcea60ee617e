//! Progress reporting seams.
//!
//! A [`ProgressSink`] receives throttled progress samples for one job.
//! A sink may be bound to an [`OutputSurface`] (a chat channel, a
//! terminal, ...) so that process-wide announcements such as shutdown
//! notices can reach every surface that currently has a job running.

use std::sync::Arc;

use bytes::Bytes;

use crate::types::BoxError;

/// Receives progress updates for a single job.
///
/// `fraction` is always within `[0.0, 1.0]`. `preview` carries the most
/// recent preview frame the backend streamed, if any.
#[async_trait::async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, fraction: f32, preview: Option<Bytes>) -> Result<(), BoxError>;

    /// The output surface this sink writes to, if it has one.
    fn surface(&self) -> Option<Arc<dyn OutputSurface>> {
        None
    }
}

/// A destination that can receive free-form text announcements.
#[async_trait::async_trait]
pub trait OutputSurface: Send + Sync {
    /// Stable identity used to deduplicate surfaces shared by many jobs.
    fn surface_id(&self) -> &str;

    async fn send(&self, message: &str) -> Result<(), BoxError>;
}
