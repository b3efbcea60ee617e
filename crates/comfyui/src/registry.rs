//! Registry of listeners that want every frame from the event stream.
//!
//! The backend addresses all events for this process to one client id,
//! so every registered listener sees every frame and filters for its own
//! prompt. Registration is keyed by [`ListenerId`]; adding the same id
//! twice keeps a single entry.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::FutureExt;

use comfybot_core::types::JobId;

use crate::client::Frame;

/// Listeners are identified by the job they belong to.
pub type ListenerId = JobId;

/// Receives every frame the transport reads.
#[async_trait::async_trait]
pub trait FrameListener: Send + Sync {
    fn listener_id(&self) -> ListenerId;

    /// Handle one frame. Errors are logged by the caller and never stop
    /// delivery to other listeners.
    async fn on_frame(&self, frame: &Frame) -> Result<(), ListenerError>;
}

/// Failure inside a listener's frame handler.
#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// A text frame could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Thread-safe set of active listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<ListenerId, Arc<dyn FrameListener>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Returns `false` if its id was already present.
    pub fn add(&self, listener: Arc<dyn FrameListener>) -> bool {
        let id = listener.listener_id();
        let mut listeners = self.lock();
        if listeners.contains_key(&id) {
            return false;
        }
        listeners.insert(id, listener);
        tracing::debug!(listener = %id, active = listeners.len(), "Listener added");
        true
    }

    /// Unregister a listener. Unknown ids are ignored.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let removed = listeners.remove(&id).is_some();
        if removed {
            tracing::debug!(listener = %id, active = listeners.len(), "Listener removed");
        }
        removed
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Deliver one frame to every registered listener in turn.
    ///
    /// The listener set is copied out before delivery so the lock is not
    /// held while handlers run. A handler that errors or panics is logged
    /// and skipped. Returns the number of handlers that failed.
    pub async fn dispatch(&self, frame: &Frame) -> usize {
        let listeners: Vec<Arc<dyn FrameListener>> = self.lock().values().cloned().collect();
        let mut failures = 0;

        for listener in listeners {
            let id = listener.listener_id();
            match AssertUnwindSafe(listener.on_frame(frame)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(listener = %id, error = %e, "Listener failed to handle frame");
                }
                Err(_) => {
                    failures += 1;
                    tracing::error!(listener = %id, "Listener panicked while handling frame");
                }
            }
        }

        failures
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerId, Arc<dyn FrameListener>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a listener registered for as long as it is alive.
///
/// Dropping the guard (normal return, `?`, or a cancelled future)
/// removes the registration, but only if this guard made it. A guard for
/// an id that was already registered leaves the existing entry alone.
pub struct ListenerGuard {
    registry: Arc<ListenerRegistry>,
    id: ListenerId,
    owned: bool,
}

impl ListenerGuard {
    pub fn new(registry: Arc<ListenerRegistry>, listener: Arc<dyn FrameListener>) -> Self {
        let id = listener.listener_id();
        let owned = registry.add(listener);
        if !owned {
            tracing::warn!(listener = %id, "Listener already registered; guard will not remove it");
        }
        Self {
            registry,
            id,
            owned,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Whether dropping this guard removes the registration.
    pub fn is_owner(&self) -> bool {
        self.owned
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        if self.owned {
            self.registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Counting {
        id: ListenerId,
        seen: AtomicUsize,
    }

    impl Counting {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: JobId::next(),
                seen: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl FrameListener for Counting {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_frame(&self, _frame: &Frame) -> Result<(), ListenerError> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing {
        id: ListenerId,
        panic: bool,
    }

    #[async_trait::async_trait]
    impl FrameListener for Failing {
        fn listener_id(&self) -> ListenerId {
            self.id
        }

        async fn on_frame(&self, _frame: &Frame) -> Result<(), ListenerError> {
            if self.panic {
                panic!("listener blew up");
            }
            Err(serde_json::from_str::<serde_json::Value>("{").unwrap_err().into())
        }
    }

    fn text(s: &str) -> Frame {
        Frame::Text(s.to_string())
    }

    #[test]
    fn add_is_idempotent_per_id() {
        let registry = ListenerRegistry::new();
        let listener = Counting::new();

        assert!(registry.add(listener.clone()));
        assert!(!registry.add(listener.clone()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_unknown_id_is_noop() {
        let registry = ListenerRegistry::new();
        registry.add(Counting::new());

        assert!(!registry.remove(JobId::next()));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_add_delivers_once() {
        let registry = ListenerRegistry::new();
        let listener = Counting::new();
        registry.add(listener.clone());
        registry.add(listener.clone());

        registry.dispatch(&text("{}")).await;

        assert_eq!(listener.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_listeners_do_not_block_others() {
        let registry = ListenerRegistry::new();
        let healthy = Counting::new();
        registry.add(Arc::new(Failing {
            id: JobId::next(),
            panic: false,
        }));
        registry.add(Arc::new(Failing {
            id: JobId::next(),
            panic: true,
        }));
        registry.add(healthy.clone());

        let failures = registry.dispatch(&text("{}")).await;

        assert_eq!(failures, 2);
        assert_eq!(healthy.seen.load(Ordering::SeqCst), 1);
        // The panicking listener stays registered; its owner removes it.
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn guard_removes_on_drop() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Counting::new();
        let id = listener.listener_id();

        {
            let guard = ListenerGuard::new(Arc::clone(&registry), listener);
            assert_eq!(guard.id(), id);
            assert!(registry.contains(id));
        }

        assert!(!registry.contains(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn second_guard_for_same_id_keeps_first_registration() {
        let registry = Arc::new(ListenerRegistry::new());
        let listener = Counting::new();
        let id = listener.listener_id();

        let first = ListenerGuard::new(Arc::clone(&registry), listener.clone());
        let second = ListenerGuard::new(Arc::clone(&registry), listener);
        assert!(first.is_owner());
        assert!(!second.is_owner());
        assert_eq!(registry.len(), 1);

        drop(second);
        assert!(registry.contains(id));

        drop(first);
        assert!(!registry.contains(id));
    }
}
