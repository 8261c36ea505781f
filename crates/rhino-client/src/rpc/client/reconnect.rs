use std::time::Duration;

use crate::config::ReconnectConfig;

/// Exponential backoff between dial attempts.
///
/// The session loop cannot sleep through a retry delay (it still has to
/// notice `close`), so this only computes delays; the loop schedules them.
#[derive(Debug, Clone)]
pub struct Backoff {
    min_interval: Duration,

    max_interval: Duration,

    /// Exponential backoff multiplier
    backoff_multiplier: f64,

    /// None means unlimited retries
    max_attempts: Option<u32>,

    attempt: u32,

    current_interval: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            max_interval: config.max_interval(),
            backoff_multiplier: config.backoff_multiplier,
            max_attempts: config.max_attempts,
            attempt: 0,
            current_interval: config.min_interval(),
        }
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self.current_interval = interval;
        self
    }

    pub fn max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    /// Re-dials scheduled since the last success.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Schedule one more dial and return how long to wait before it, or
    /// `None` once `max_attempts` re-dials have been spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        self.attempt += 1;

        if let Some(max) = self.max_attempts {
            if self.attempt > max {
                return None;
            }
        }

        let delay = self.current_interval;
        self.current_interval = std::cmp::min(
            Duration::from_millis(
                (self.current_interval.as_millis() as f64 * self.backoff_multiplier) as u64,
            ),
            self.max_interval,
        );
        Some(delay)
    }

    /// Forget previous failures after a successful dial.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.current_interval = self.min_interval;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
