use std::time::Duration;

use photolift_protocol::constants::MIN_RESCHEDULE_DELAY;

/// Limits of a background window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundConfig {
    /// Delay before the next window may begin. Never below 60 seconds.
    pub reschedule_delay: Duration,
    /// Bytes after which the queue is paused once the current item finishes.
    pub max_bytes_per_window: u64,
    /// Remaining time below which an extension is requested, or the queue suspended.
    pub safety_margin: Duration,
    /// How often the remaining time is checked.
    pub tick: Duration,
    pub requires_external_power: bool,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            reschedule_delay: MIN_RESCHEDULE_DELAY,
            max_bytes_per_window: 100 * 1024 * 1024,
            safety_margin: Duration::from_secs(5),
            tick: Duration::from_secs(1),
            requires_external_power: false,
        }
    }
}

impl BackgroundConfig {
    pub fn effective_reschedule_delay(&self) -> Duration {
        self.reschedule_delay.max(MIN_RESCHEDULE_DELAY)
    }
}
