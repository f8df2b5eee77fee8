//! Bounded task queue.
//!
//! - [`TaskQueueConfig`] capacity, parallelism and loop timeouts
//! - [`TaskQueue`] the queue and its supervised worker loop

mod config;
mod task_queue;

pub use config::TaskQueueConfig;
pub use task_queue::{DrainedCallback, Job, TaskQueue};
