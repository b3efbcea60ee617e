//! Process-wide registry of running jobs.
//!
//! Independent of the transport's listener registry: a job is tracked
//! for the whole of its run, including phases where it is not listening
//! to the event stream. The tracker is consulted for introspection and
//! to announce shutdowns on every surface that has work in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use comfybot_core::progress::{OutputSurface, ProgressSink};
use comfybot_core::types::JobId;

type Entries = HashMap<JobId, Option<Arc<dyn ProgressSink>>>;

/// Thread-safe set of active jobs and their progress sinks.
#[derive(Default)]
pub struct JobTracker {
    jobs: Mutex<Entries>,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a job as active. Registering the same id again replaces
    /// its sink.
    pub fn register(&self, id: JobId, sink: Option<Arc<dyn ProgressSink>>) {
        let mut jobs = self.lock();
        jobs.insert(id, sink);
        tracing::debug!(job = %id, active = jobs.len(), "Job registered");
    }

    /// Forget a job. Unknown ids are ignored.
    pub fn unregister(&self, id: JobId) {
        let mut jobs = self.lock();
        if jobs.remove(&id).is_some() {
            tracing::debug!(job = %id, active = jobs.len(), "Job unregistered");
        }
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of jobs currently running.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    /// Send `message` once to every distinct surface with a running job.
    ///
    /// Surfaces are collected under the lock and messaged after it is
    /// released. A failing surface is logged and skipped. Returns how
    /// many surfaces accepted the message.
    pub async fn notify_all(&self, message: &str) -> usize {
        let surfaces: Vec<Arc<dyn OutputSurface>> = {
            let jobs = self.lock();
            let mut by_id: HashMap<String, Arc<dyn OutputSurface>> = HashMap::new();
            for surface in jobs.values().flatten().filter_map(|sink| sink.surface()) {
                by_id
                    .entry(surface.surface_id().to_string())
                    .or_insert(surface);
            }
            by_id.into_values().collect()
        };

        tracing::info!(surfaces = surfaces.len(), "Sending notification to active surfaces");

        let mut delivered = 0;
        for surface in surfaces {
            match surface.send(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(
                        surface = surface.surface_id(),
                        error = %e,
                        "Failed to notify surface",
                    );
                }
            }
        }
        delivered
    }

    fn lock(&self) -> MutexGuard<'_, Entries> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a job tracked until dropped.
pub struct TrackerGuard {
    tracker: Arc<JobTracker>,
    id: JobId,
}

impl TrackerGuard {
    pub fn new(tracker: Arc<JobTracker>, id: JobId, sink: Option<Arc<dyn ProgressSink>>) -> Self {
        tracker.register(id, sink);
        Self { tracker, id }
    }
}

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.tracker.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;
    use comfybot_core::types::BoxError;

    use super::*;

    struct Channel {
        id: String,
        fail: bool,
        sent: AtomicUsize,
    }

    impl Channel {
        fn new(id: &str, fail: bool) -> Arc<Self> {
            Arc::new(Self {
                id: id.to_string(),
                fail,
                sent: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl OutputSurface for Channel {
        fn surface_id(&self) -> &str {
            &self.id
        }

        async fn send(&self, _message: &str) -> Result<(), BoxError> {
            if self.fail {
                return Err("channel gone".into());
            }
            self.sent.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct BoundSink {
        channel: Arc<Channel>,
    }

    #[async_trait::async_trait]
    impl ProgressSink for BoundSink {
        async fn on_progress(&self, _fraction: f32, _preview: Option<Bytes>) -> Result<(), BoxError> {
            Ok(())
        }

        fn surface(&self) -> Option<Arc<dyn OutputSurface>> {
            Some(self.channel.clone())
        }
    }

    fn sink_on(channel: &Arc<Channel>) -> Option<Arc<dyn ProgressSink>> {
        Some(Arc::new(BoundSink {
            channel: Arc::clone(channel),
        }))
    }

    #[test]
    fn register_and_unregister_update_count() {
        let tracker = JobTracker::new();
        let a = JobId::next();
        let b = JobId::next();

        tracker.register(a, None);
        tracker.register(b, None);
        tracker.register(a, None);
        assert_eq!(tracker.count(), 2);

        tracker.unregister(a);
        tracker.unregister(a);
        assert_eq!(tracker.count(), 1);
        assert!(tracker.contains(b));
    }

    #[tokio::test]
    async fn notify_all_deduplicates_surfaces() {
        let tracker = JobTracker::new();
        let general = Channel::new("general", false);
        let art = Channel::new("art", false);

        tracker.register(JobId::next(), sink_on(&general));
        tracker.register(JobId::next(), sink_on(&general));
        tracker.register(JobId::next(), sink_on(&art));
        tracker.register(JobId::next(), None);

        let delivered = tracker.notify_all("restarting").await;

        assert_eq!(delivered, 2);
        assert_eq!(general.sent.load(Ordering::SeqCst), 1);
        assert_eq!(art.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_all_continues_past_failing_surface() {
        let tracker = JobTracker::new();
        let broken = Channel::new("broken", true);
        let healthy = Channel::new("healthy", false);

        tracker.register(JobId::next(), sink_on(&broken));
        tracker.register(JobId::next(), sink_on(&healthy));

        let delivered = tracker.notify_all("restarting").await;

        assert_eq!(delivered, 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn notify_all_with_no_jobs_is_noop() {
        let tracker = JobTracker::new();
        assert_eq!(tracker.notify_all("hello").await, 0);
    }

    #[test]
    fn guard_unregisters_on_drop() {
        let tracker = Arc::new(JobTracker::new());
        let id = JobId::next();
        {
            let _guard = TrackerGuard::new(Arc::clone(&tracker), id, None);
            assert!(tracker.contains(id));
        }
        assert_eq!(tracker.count(), 0);
    }
}
