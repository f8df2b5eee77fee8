//! # Message bus configuration.
//!
//! Provides [`BusConfig`], used by [`BusBuilder`](crate::BusBuilder).
//!
//! ## Sentinel values
//! - `task_queue_max_items = 0` → unbounded dispatch queue
//! - `task_queue_max_parallelism = 0` → treated as 1

use std::time::Duration;

use crate::queue::TaskQueueConfig;
use crate::timer::TimerConfig;

/// Settings for an [`InMemoryBus`](crate::InMemoryBus).
///
/// ## Field semantics
/// - `topic`: prefix of the bus id, used in logs
/// - `task_queue_max_items`: pending dispatch jobs before publishes start being dropped
/// - `task_queue_max_parallelism`: handlers running at once, across all subscribers
/// - `delivery_window`: delayed messages due within this window of a sweep are sent together
/// - `timer`: settings of the maintenance timer that delivers delayed messages
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Bus name.
    pub topic: String,

    /// Capacity of the dispatch queue (`0` = unbounded).
    pub task_queue_max_items: usize,

    /// Concurrency of the dispatch queue (min 1).
    pub task_queue_max_parallelism: usize,

    /// Coalescing window for delayed deliveries.
    pub delivery_window: Duration,

    /// Maintenance timer settings.
    pub timer: TimerConfig,
}

impl BusConfig {
    /// Dispatch queue configuration derived from this config.
    pub fn task_queue(&self) -> TaskQueueConfig {
        TaskQueueConfig {
            max_items: self.task_queue_max_items,
            max_parallelism: self.task_queue_max_parallelism,
            ..TaskQueueConfig::default()
        }
    }
}

impl Default for BusConfig {
    /// Default configuration:
    ///
    /// - `topic = "messages"`
    /// - `task_queue_max_items = 10000`
    /// - `task_queue_max_parallelism = 4`
    /// - `delivery_window = 50ms`
    /// - `timer = TimerConfig::default()` (unarmed until something is delayed)
    fn default() -> Self {
        Self {
            topic: "messages".to_string(),
            task_queue_max_items: 10_000,
            task_queue_max_parallelism: 4,
            delivery_window: Duration::from_millis(50),
            timer: TimerConfig::default(),
        }
    }
}
