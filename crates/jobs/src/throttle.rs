//! Minimum-interval gate for progress callbacks.
//!
//! Samples that arrive while the gate is closed are dropped, not queued;
//! the caller delivers whatever sample it holds when the gate opens.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Throttle {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    /// Open the gate if at least `min_interval` has passed since it last
    /// opened. The first call always opens it.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.min_interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }

    pub fn last_fired(&self) -> Option<Instant> {
        self.last
    }
}
