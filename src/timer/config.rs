//! # Timer configuration.
//!
//! ## Sentinel values
//! - `due_time = None` → the timer starts unarmed
//! - `min_interval = 0s` → no pause between runs

use std::time::Duration;

/// Settings for a [`ScheduledTimer`](crate::ScheduledTimer).
///
/// ## Field semantics
/// - `due_time`: delay until the first run (`None` = wait for the first `schedule_next`)
/// - `min_interval`: minimum pause after each run before the next may start (`0s` = none)
/// - `immediacy_window`: a requested next run closer than this to "now" is treated as
///   "run again right away" and scheduled at `now + immediacy_window`
#[derive(Clone, Debug)]
pub struct TimerConfig {
    /// Delay until the first run.
    pub due_time: Option<Duration>,

    /// Minimum pause after each run.
    pub min_interval: Duration,

    /// Near-future requests are rounded up to this distance from now.
    pub immediacy_window: Duration,
}

impl TimerConfig {
    /// Returns the minimum interval as an `Option`.
    ///
    /// - `None` → runs may follow each other back to back
    /// - `Some(d)` → at least `d` between the end of one run and the start of the next
    #[inline]
    pub fn min_interval_opt(&self) -> Option<Duration> {
        if self.min_interval == Duration::ZERO {
            None
        } else {
            Some(self.min_interval)
        }
    }
}

impl Default for TimerConfig {
    /// Default configuration:
    ///
    /// - `due_time = None` (unarmed)
    /// - `min_interval = 0s` (none)
    /// - `immediacy_window = 10ms`
    fn default() -> Self {
        Self {
            due_time: None,
            min_interval: Duration::ZERO,
            immediacy_window: Duration::from_millis(10),
        }
    }
}
