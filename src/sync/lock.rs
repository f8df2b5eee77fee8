//! # AsyncLock: non-reentrant async mutual exclusion.
//!
//! [`AsyncLock`] hands out one [`LockToken`] at a time. Waiters queue in FIFO order and
//! ownership moves straight from the releasing token to the next waiter.
//!
//! ## Architecture
//! ```text
//! acquire(token) ──► state.lock()
//!                      ├─ free  → taken = true → LockToken
//!                      └─ taken → WaitQueue.enqueue() ──► wait(..) ──► LockToken
//!
//! LockToken::release() ──► state.lock()
//!                            ├─ queue empty → taken = false
//!                            └─ otherwise   → dequeue(): next waiter owns the lock
//!                                             (never observable as free in between)
//! ```
//!
//! ## Rules
//! - **Not reentrant**: acquiring again while holding a token from the same task deadlocks.
//!   This is not detected.
//! - Releasing is idempotent; dropping a token releases it.
//! - A cancelled or dropped `acquire` never leaks ownership.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;
use crate::sync::wait_queue::{self, WaitHost, WaitQueue, WaiterId};

struct LockState {
    taken: bool,
    queue: WaitQueue<()>,
}

struct LockInner {
    state: Mutex<LockState>,
}

impl LockInner {
    fn release(&self) {
        let mut state = self.state.lock();
        if state.queue.dequeue(()).is_some() {
            state.taken = false;
        }
    }
}

impl WaitHost<()> for LockInner {
    fn cancel_waiter(&self, id: WaiterId) -> bool {
        self.state.lock().queue.try_cancel(id)
    }

    fn reclaim(&self, _: ()) {
        self.release();
    }
}

/// Async-compatible mutual exclusion lock.
///
/// Cloning yields another handle to the **same** lock.
///
/// # Example
/// ```
/// use taskbus::AsyncLock;
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let lock = AsyncLock::new();
/// let token = CancellationToken::new();
///
/// let guard = lock.acquire(&token).await.unwrap();
/// assert!(lock.is_locked());
/// drop(guard);
/// assert!(!lock.is_locked());
/// # }
/// ```
#[derive(Clone)]
pub struct AsyncLock {
    inner: Arc<LockInner>,
}

impl AsyncLock {
    /// Creates a new, free lock.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LockInner {
                state: Mutex::new(LockState {
                    taken: false,
                    queue: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Acquires the lock, waiting in FIFO order behind earlier callers.
    ///
    /// If the lock is free it is taken even when `token` is already cancelled.
    /// Otherwise a cancelled `token` resolves the wait with [`Cancelled`].
    pub async fn acquire(&self, token: &CancellationToken) -> Result<LockToken, Cancelled> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();
            if !state.taken {
                state.taken = true;
                return Ok(self.token());
            }
            if token.is_cancelled() {
                return Err(Cancelled);
            }
            state.queue.enqueue()
        };

        wait_queue::wait(self.inner.as_ref(), id, rx, token).await?;
        Ok(self.token())
    }

    /// Takes the lock only if it is free right now.
    pub fn try_acquire(&self) -> Option<LockToken> {
        let mut state = self.inner.state.lock();
        if state.taken {
            return None;
        }
        state.taken = true;
        Some(self.token())
    }

    /// Blocks the calling thread until the lock is acquired.
    ///
    /// The wait happens on a condition variable, not on the async path, so no runtime
    /// worker is needed to make progress. Do not call it from an async task on a
    /// current-thread runtime while another task of that runtime holds the lock.
    pub fn lock_blocking(&self) -> Result<LockToken, Cancelled> {
        let slot = {
            let mut state = self.inner.state.lock();
            if !state.taken {
                state.taken = true;
                return Ok(self.token());
            }
            state.queue.enqueue_blocking()
        };
        slot.wait()?;
        Ok(self.token())
    }

    /// Returns `true` while some token is outstanding.
    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().taken
    }

    /// Number of callers currently waiting.
    pub fn waiters(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    fn token(&self) -> LockToken {
        LockToken {
            inner: Some(Arc::clone(&self.inner)),
        }
    }
}

impl Default for AsyncLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncLock")
            .field("taken", &state.taken)
            .field("waiters", &state.queue.len())
            .finish()
    }
}

/// Exclusive ownership of an [`AsyncLock`].
///
/// Released by [`LockToken::release`] or on drop, whichever comes first.
#[must_use = "the lock is released as soon as the token is dropped"]
pub struct LockToken {
    inner: Option<Arc<LockInner>>,
}

impl LockToken {
    /// Releases the lock; later calls are no-ops.
    pub fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.release();
        }
    }

    /// Returns `true` until the token is released.
    pub fn is_held(&self) -> bool {
        self.inner.is_some()
    }
}

impl Drop for LockToken {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockToken")
            .field("held", &self.is_held())
            .finish()
    }
}
