//! Shared event-stream transport.
//!
//! [`Transport`] owns the single streaming connection to the backend.
//! It runs a connect -> pump -> back off loop until shut down and hands
//! every received [`Frame`] to all registered listeners. Connectivity is
//! published through a [`tokio::sync::watch`] channel so that callers
//! can refuse to submit work while the stream is down.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{EventSource, FrameStream};
use crate::reconnect::{Backoff, ReconnectConfig};
use crate::registry::{FrameListener, ListenerGuard, ListenerId, ListenerRegistry};

/// Process-wide handle on the backend event stream.
///
/// Built once at startup and shared as `Arc<Transport>`.
pub struct Transport {
    source: Arc<dyn EventSource>,
    reconnect: ReconnectConfig,
    listeners: Arc<ListenerRegistry>,
    connected: watch::Sender<bool>,
    cancel: CancellationToken,
}

impl Transport {
    pub fn new(source: Arc<dyn EventSource>, reconnect: ReconnectConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            source,
            reconnect,
            listeners: Arc::new(ListenerRegistry::new()),
            connected,
            cancel: CancellationToken::new(),
        }
    }

    /// Client id shared by the stream and every prompt submission.
    pub fn client_id(&self) -> &str {
        self.source.client_id()
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    /// Observe connectivity changes.
    pub fn watch_connected(&self) -> watch::Receiver<bool> {
        self.connected.subscribe()
    }

    /// Wait until the stream is connected, up to `timeout`.
    pub async fn wait_connected(&self, timeout: Duration) -> bool {
        let mut rx = self.connected.subscribe();
        let connected = match tokio::time::timeout(timeout, rx.wait_for(|c| *c)).await {
            Ok(result) => result.is_ok(),
            Err(_) => false,
        };
        connected
    }

    pub fn add_listener(&self, listener: Arc<dyn FrameListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Register a listener for the lifetime of the returned guard.
    pub fn register(&self, listener: Arc<dyn FrameListener>) -> ListenerGuard {
        ListenerGuard::new(Arc::clone(&self.listeners), listener)
    }

    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.listeners.contains(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Spawn [`run`](Self::run) onto the current runtime.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            transport.run().await;
        })
    }

    /// Stop the connection loop. In-flight jobs stop receiving events.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down event stream transport");
        self.cancel.cancel();
    }

    /// Connect, pump frames, and reconnect with backoff until shut down.
    pub async fn run(&self) {
        let mut backoff = Backoff::new(self.reconnect.clone());
        let mut attempt = 0u32;

        tracing::info!(client_id = %self.client_id(), "Starting event stream transport");

        loop {
            attempt += 1;
            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.source.open() => result,
            };

            match opened {
                Ok(mut frames) => {
                    backoff.reset();
                    attempt = 0;
                    self.connected.send_replace(true);
                    tracing::info!(client_id = %self.client_id(), "Event stream connected");

                    self.pump(&mut frames).await;

                    self.connected.send_replace(false);
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::warn!("Event stream lost, reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "Event stream connection failed");
                }
            }

            let delay = backoff.next_delay();
            tracing::info!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.connected.send_replace(false);
        tracing::info!("Event stream transport stopped");
    }

    /// Fan frames out until the session ends or the transport is cancelled.
    async fn pump(&self, frames: &mut FrameStream) {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    let failures = self.listeners.dispatch(&frame).await;
                    if failures > 0 {
                        tracing::debug!(failures, "Frame delivered with listener failures");
                    }
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Event stream receive error");
                    return;
                }
                None => {
                    tracing::info!("Event stream closed by backend");
                    return;
                }
            }
        }
    }
}
