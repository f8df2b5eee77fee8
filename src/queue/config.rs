//! # Task queue configuration.
//!
//! ## Sentinel values
//! - `max_items = 0` → unbounded
//! - `max_parallelism = 0` → treated as 1

use std::time::Duration;

/// Settings for a [`TaskQueue`](crate::TaskQueue).
///
/// ## Field semantics
/// - `max_items`: maximum number of **queued** (not yet started) jobs (`0` = unbounded)
/// - `max_parallelism`: maximum number of jobs running at once (min 1)
/// - `auto_start`: start the worker loop on construction
/// - `slot_timeout`: bound on one wait for a free slot, after which shutdown is re-checked
/// - `idle_timeout`: bound on one idle wait when nothing is queued
#[derive(Clone, Debug)]
pub struct TaskQueueConfig {
    /// Maximum number of queued jobs.
    ///
    /// - `0` = unbounded
    /// - `n > 0` = `enqueue` returns `false` while `n` jobs are waiting
    pub max_items: usize,

    /// Maximum number of concurrently running jobs.
    pub max_parallelism: usize,

    /// Start the worker loop in the constructor.
    ///
    /// When `false`, nothing runs until [`TaskQueue::start`](crate::TaskQueue::start).
    pub auto_start: bool,

    /// Bound on one wait for a free slot.
    pub slot_timeout: Duration,

    /// Bound on one idle wait.
    pub idle_timeout: Duration,
}

impl TaskQueueConfig {
    /// Returns the queue capacity as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` queued jobs
    #[inline]
    pub fn max_items_limit(&self) -> Option<usize> {
        if self.max_items == 0 {
            None
        } else {
            Some(self.max_items)
        }
    }

    /// Returns the parallelism clamped to a minimum of 1.
    #[inline]
    pub fn max_parallelism_clamped(&self) -> usize {
        self.max_parallelism.max(1)
    }
}

impl Default for TaskQueueConfig {
    /// Default configuration:
    ///
    /// - `max_items = 0` (unbounded)
    /// - `max_parallelism = 1` (sequential)
    /// - `auto_start = true`
    /// - `slot_timeout = 1s`
    /// - `idle_timeout = 10s`
    fn default() -> Self {
        Self {
            max_items: 0,
            max_parallelism: 1,
            auto_start: true,
            slot_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(10),
        }
    }
}
