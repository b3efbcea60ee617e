//! Reconnect delays for the event stream.
//!
//! The transport asks a [`Backoff`] how long to sleep after every failed
//! connect or dropped session, and resets it once a connection is up.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Floor: the first delay, and the delay after every reset.
    pub initial_delay: Duration,
    /// Ceiling for the growing delay.
    pub max_delay: Duration,
    /// Growth factor applied after each attempt.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Exponential delay sequence: `initial_delay`, then multiplied by
/// `multiplier` each step, never above `max_delay`.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    upcoming: Duration,
}

impl Backoff {
    pub fn new(config: ReconnectConfig) -> Self {
        let upcoming = config.initial_delay.min(config.max_delay);
        Self { config, upcoming }
    }

    /// Delay to sleep now. Advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.upcoming;
        self.upcoming = delay.mul_f64(self.config.multiplier).min(self.config.max_delay);
        delay
    }

    /// Start over from the floor.
    pub fn reset(&mut self) {
        self.upcoming = self.config.initial_delay.min(self.config.max_delay);
    }
}
