//! Coalescing scheduled timer.
//!
//! - [`TimerConfig`] first run, minimum interval and immediacy window
//! - [`ScheduledTimer`] the timer itself

mod config;
mod scheduled;

pub use config::TimerConfig;
pub use scheduled::{ScheduledTimer, TimerCallback};
