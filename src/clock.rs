//! # Injectable clock.
//!
//! Every component that needs time receives a [`ClockRef`] at construction instead of
//! reading a process-wide clock. [`SystemClock`] is the default.
//!
//! ## Rules
//! - [`Clock::now`] is monotonic ([`tokio::time::Instant`]) and drives all scheduling.
//! - [`Clock::utc_now`] is wall-clock time, used only for reporting.
//! - [`SystemClock`] goes through `tokio::time`, so tests running with paused time
//!   (`#[tokio::test(start_paused = true)]`) get a fully deterministic clock.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Shared handle to a clock implementation.
pub type ClockRef = Arc<dyn Clock>;

/// Source of time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug + 'static {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time in UTC.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Blocks the calling thread for `duration`.
    ///
    /// Never call this from inside an async task.
    fn sleep(&self, duration: Duration);

    /// Suspends for `duration`, or until `token` is cancelled.
    async fn sleep_async(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), Cancelled>;
}

/// Real clock backed by `tokio::time` and `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    /// Returns the system clock as a shared [`ClockRef`].
    pub fn arc() -> ClockRef {
        Arc::new(SystemClock)
    }
}

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }

    async fn sleep_async(
        &self,
        duration: Duration,
        token: &CancellationToken,
    ) -> Result<(), Cancelled> {
        if token.is_cancelled() {
            return Err(Cancelled);
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = token.cancelled() => Err(Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_async_follows_paused_time() {
        let clock = SystemClock::arc();
        let token = CancellationToken::new();
        let start = clock.now();

        clock
            .sleep_async(Duration::from_millis(250), &token)
            .await
            .unwrap();

        let elapsed = clock.now() - start;
        assert!(elapsed >= Duration::from_millis(250));
        assert!(elapsed < Duration::from_millis(260));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_async_cancelled() {
        let clock = SystemClock::arc();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let res = clock.sleep_async(Duration::from_secs(60), &token).await;
        assert_eq!(res, Err(Cancelled));

        // Already cancelled tokens fail fast.
        let res = clock.sleep_async(Duration::from_secs(60), &token).await;
        assert_eq!(res, Err(Cancelled));
    }

    #[test]
    fn test_blocking_sleep() {
        let clock = SystemClock;
        let start = std::time::Instant::now();
        clock.sleep(Duration::from_millis(5));
        assert!(start.elapsed() >= Duration::from_millis(5));
    }
}
