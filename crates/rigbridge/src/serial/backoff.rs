use std::time::Duration;

use tokio::time::Instant;

use crate::config::ReconnectPolicy;

/// Tracks reopen backoff timing for an absent serial device.
#[derive(Debug)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    next_retry_at: Instant,
}

impl ReconnectBackoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let initial = policy.initial.max(Duration::from_millis(1));
        Self {
            initial,
            max: policy.max.max(initial),
            current: initial,
            next_retry_at: Instant::now(),
        }
    }

    /// Record a failed reopen and push the next attempt into the future.
    pub fn mark_failure(&mut self, now: Instant) {
        self.next_retry_at = now + self.current;
        self.current = (self.current * 2).min(self.max);
    }

    pub fn mark_success(&mut self, now: Instant) {
        self.current = self.initial;
        self.next_retry_at = now;
    }

    pub fn should_retry(&self, now: Instant) -> bool {
        now >= self.next_retry_at
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }
}
