//! # AsyncAutoResetEvent: single-permit signal.
//!
//! ```text
//! set()  ──► waiters queued? ── yes ─► release exactly one (FIFO)
//!                             └─ no ──► permit = true (not additive)
//!
//! wait() ──► permit? ── yes ─► permit = false, return
//!                     └─ no ──► enqueue, await set() or cancellation
//! ```
//!
//! ## Rules
//! - The permit is never set while someone is waiting.
//! - One `set()` releases at most one waiter.
//! - A permit handed to a waiter that was dropped before observing it is restored.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;
use crate::sync::wait_queue::{self, WaitHost, WaitQueue, WaiterId};

struct EventState {
    set: bool,
    queue: WaitQueue<()>,
}

struct EventInner {
    state: Mutex<EventState>,
}

impl EventInner {
    fn set(&self) {
        let mut state = self.state.lock();
        if state.queue.dequeue(()).is_some() {
            state.set = true;
        }
        debug_assert!(!state.set || state.queue.is_empty());
    }
}

impl WaitHost<()> for EventInner {
    fn cancel_waiter(&self, id: WaiterId) -> bool {
        self.state.lock().queue.try_cancel(id)
    }

    fn reclaim(&self, _: ()) {
        self.set();
    }
}

/// Async auto-reset event.
///
/// Cloning yields another handle to the **same** event.
///
/// # Example
/// ```
/// use taskbus::AsyncAutoResetEvent;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let event = AsyncAutoResetEvent::new(false);
/// event.set();
/// event.set(); // not additive
///
/// event.wait(&CancellationToken::new()).await.unwrap();
/// assert!(!event.is_set());
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncAutoResetEvent {
    inner: Arc<EventInner>,
}

impl AsyncAutoResetEvent {
    /// Creates an event, optionally with the permit already set.
    pub fn new(set: bool) -> Self {
        Self {
            inner: Arc::new(EventInner {
                state: Mutex::new(EventState {
                    set,
                    queue: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Releases one waiter, or leaves the permit set if nobody waits.
    pub fn set(&self) {
        self.inner.set();
    }

    /// Returns `true` if a permit is pending.
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().set
    }

    /// Waits for the permit.
    ///
    /// A pending permit is consumed even when `token` is already cancelled.
    pub async fn wait(&self, token: &CancellationToken) -> Result<(), Cancelled> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();
            if state.set {
                state.set = false;
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(Cancelled);
            }
            state.queue.enqueue()
        };
        wait_queue::wait(self.inner.as_ref(), id, rx, token).await
    }

    /// Blocks the calling thread until the permit is obtained.
    pub fn wait_blocking(&self) -> Result<(), Cancelled> {
        let slot = {
            let mut state = self.inner.state.lock();
            if state.set {
                state.set = false;
                return Ok(());
            }
            state.queue.enqueue_blocking()
        };
        slot.wait()
    }

    /// Resolves every pending wait with [`Cancelled`]; returns how many there were.
    pub fn cancel_waiters(&self) -> usize {
        self.inner.state.lock().queue.cancel_all()
    }

    /// Number of callers currently waiting.
    pub fn waiters(&self) -> usize {
        self.inner.state.lock().queue.len()
    }
}

impl Default for AsyncAutoResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for AsyncAutoResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncAutoResetEvent")
            .field("set", &state.set)
            .field("waiters", &state.queue.len())
            .finish()
    }
}
