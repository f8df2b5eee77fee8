//! # ScheduledTimer: coalescing maintenance timer.
//!
//! Runs one async callback at the earliest requested time. Requests for later times
//! collapse into the pending one, and a wake that arrives while the callback runs becomes
//! a single "run again" request instead of a second, concurrent execution.
//!
//! ## Architecture
//! ```text
//! schedule_next(at) ──► next.lock()
//!                         ├─ None (never)               → ignored
//!                         ├─ pending & at >= pending    → ignored (earliest wins)
//!                         └─ otherwise                  → next = max(at, now)
//!                                                          deadline.send(Some(next))
//!                                                                │
//! driver task ◄──────────── watch::Receiver ◄───────────────────┘
//!   loop {
//!     select! { changed → re-read, sleep(next - now) → fire, cancelled → exit }
//!     fire: next due? → next = None → spawn run()
//!   }
//!
//! run()
//!   ├─ running?                   → rerun = true, return
//!   ├─ lock.acquire() → re-check, running = true, last = now → release
//!   ├─ callback() ── Err / panic → logged, rerun = true
//!   ├─ sleep(min_interval)
//!   ├─ running = false
//!   └─ rerun || next <= now + window → schedule_next(now + window)
//!      otherwise                     → schedule_next(next)
//! ```
//!
//! ## Rules
//! - At most one callback execution is in flight.
//! - `next` only moves earlier while it is pending.
//! - Disposal is idempotent; afterwards every call is a no-op.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

use super::TimerConfig;
use crate::clock::ClockRef;
use crate::error::TaskError;
use crate::sync::AsyncLock;
use crate::util::panic_message;

/// Boxed timer callback.
///
/// Returns the next time it wants to run (`None` = no preference).
pub type TimerCallback =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Option<Instant>, TaskError>> + Send + Sync>;

struct TimerInner {
    callback: TimerCallback,
    clock: ClockRef,
    config: TimerConfig,
    next: Mutex<Option<Instant>>,
    last: Mutex<Option<Instant>>,
    running: AtomicBool,
    rerun: AtomicBool,
    lock: AsyncLock,
    deadline: watch::Sender<Option<Instant>>,
    token: CancellationToken,
}

impl TimerInner {
    fn schedule_next(&self, at: Option<Instant>) {
        let Some(at) = at else {
            trace!("timer request for never ignored");
            return;
        };
        if self.token.is_cancelled() {
            return;
        }

        let now = self.clock.now();
        let at = at.max(now);

        let mut next = self.next.lock();
        if let Some(pending) = *next {
            // A pending deadline has not fired yet, even once it is due.
            if at >= pending {
                trace!(
                    requested_in_ms = at.duration_since(now).as_millis() as u64,
                    pending_in_ms = pending.duration_since(now).as_millis() as u64,
                    "timer request coalesced"
                );
                return;
            }
        }
        *next = Some(at);
        self.deadline.send_replace(Some(at));
        trace!(
            due_in_ms = at.duration_since(now).as_millis() as u64,
            "timer armed"
        );
    }

    /// Disarms the timer if its deadline has passed; returns whether it should fire.
    fn take_due(&self) -> bool {
        let now = self.clock.now();
        let mut next = self.next.lock();
        match *next {
            Some(at) if at <= now => {
                *next = None;
                self.deadline.send_replace(None);
                true
            }
            _ => false,
        }
    }

    async fn run(self: Arc<Self>) {
        if self.running.load(Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            trace!("timer busy, rerun requested");
            return;
        }

        let Ok(mut guard) = self.lock.acquire(&self.token).await else {
            return;
        };
        if self.running.swap(true, Ordering::SeqCst) {
            self.rerun.store(true, Ordering::SeqCst);
            return;
        }
        *self.last.lock() = Some(self.clock.now());
        guard.release();

        let callback = Arc::clone(&self.callback);
        let outcome = AssertUnwindSafe(async move { callback().await })
            .catch_unwind()
            .await;
        let requested = match outcome {
            Ok(Ok(next)) => next,
            Ok(Err(err)) => {
                error!(error = %err, label = err.as_label(), "timer callback failed");
                self.rerun.store(true, Ordering::SeqCst);
                None
            }
            Err(panic) => {
                error!(panic = %panic_message(panic.as_ref()), "timer callback panicked");
                self.rerun.store(true, Ordering::SeqCst);
                None
            }
        };

        if let Some(pause) = self.config.min_interval_opt() {
            if self.clock.sleep_async(pause, &self.token).await.is_err() {
                self.running.store(false, Ordering::SeqCst);
                return;
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let rerun = self.rerun.swap(false, Ordering::SeqCst);

        let soon = self.clock.now() + self.config.immediacy_window;
        match requested {
            _ if rerun => self.schedule_next(Some(soon)),
            Some(at) if at <= soon => self.schedule_next(Some(soon)),
            other => self.schedule_next(other),
        }
    }
}

async fn drive(
    timer: Weak<TimerInner>,
    clock: ClockRef,
    mut deadline: watch::Receiver<Option<Instant>>,
    token: CancellationToken,
) {
    loop {
        let at = *deadline.borrow_and_update();
        match at {
            None => {
                tokio::select! {
                    _ = token.cancelled() => return,
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
            Some(at) => {
                let wait = at.saturating_duration_since(clock.now());
                tokio::select! {
                    slept = clock.sleep_async(wait, &token) => {
                        if slept.is_err() {
                            return;
                        }
                    }
                    changed = deadline.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        continue;
                    }
                }
            }
        }

        let Some(timer) = timer.upgrade() else {
            return;
        };
        if timer.take_due() {
            tokio::spawn(TimerInner::run(timer));
        }
    }
}

/// Coalescing scheduler for a single async callback.
///
/// Must be created inside a tokio runtime; the wake-up driver is a spawned task.
/// Dropping the timer disposes it.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use taskbus::{ScheduledTimer, SystemClock, TimerConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let timer = ScheduledTimer::new(
///     || async {
///         // periodic maintenance; ask to run again in 5s
///         Ok(Some(tokio::time::Instant::now() + Duration::from_secs(5)))
///     },
///     TimerConfig::default(),
///     SystemClock::arc(),
/// );
/// timer.schedule_now();
/// timer.dispose();
/// # }
/// ```
pub struct ScheduledTimer {
    inner: Arc<TimerInner>,
}

impl ScheduledTimer {
    /// Creates a timer around `callback`, arming it for `config.due_time` if set.
    pub fn new<F, Fut>(callback: F, config: TimerConfig, clock: ClockRef) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Instant>, TaskError>> + Send + 'static,
    {
        let callback: TimerCallback = Arc::new(move || callback().boxed());
        Self::with_callback(callback, config, clock)
    }

    /// Creates a timer from an already boxed callback.
    pub fn with_callback(callback: TimerCallback, config: TimerConfig, clock: ClockRef) -> Self {
        let (deadline, rx) = watch::channel(None);
        let token = CancellationToken::new();
        let due_time = config.due_time;

        let inner = Arc::new(TimerInner {
            callback,
            clock: Arc::clone(&clock),
            config,
            next: Mutex::new(None),
            last: Mutex::new(None),
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            lock: AsyncLock::new(),
            deadline,
            token: token.clone(),
        });

        tokio::spawn(drive(Arc::downgrade(&inner), clock, rx, token));

        if let Some(due) = due_time {
            inner.schedule_next(Some(inner.clock.now() + due));
        }
        Self { inner }
    }

    /// Requests a run at `at`.
    ///
    /// ### Rules
    /// - `None` means "never" and is ignored.
    /// - Times in the past run as soon as possible.
    /// - While a run is pending, a request for the same or a later time is ignored.
    pub fn schedule_next(&self, at: Option<Instant>) {
        self.inner.schedule_next(at);
    }

    /// Requests a run as soon as possible.
    pub fn schedule_now(&self) {
        self.inner.schedule_next(Some(self.inner.clock.now()));
    }

    /// Earliest pending run, if armed.
    pub fn next_run(&self) -> Option<Instant> {
        *self.inner.next.lock()
    }

    /// Start of the most recent run.
    pub fn last_run(&self) -> Option<Instant> {
        *self.inner.last.lock()
    }

    /// Returns `true` while the callback executes (including the minimum-interval pause).
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Stops the timer. A run already in progress finishes, but nothing new starts.
    pub fn dispose(&self) {
        if self.inner.token.is_cancelled() {
            return;
        }
        self.inner.token.cancel();
        *self.inner.next.lock() = None;
        trace!("timer disposed");
    }

    /// Returns `true` once [`dispose`](Self::dispose) was called.
    pub fn is_disposed(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

impl Drop for ScheduledTimer {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ScheduledTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTimer")
            .field("next", &self.next_run())
            .field("last", &self.last_run())
            .field("running", &self.is_running())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
