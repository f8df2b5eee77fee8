//! # AsyncManualResetEvent: a gate that stays open.
//!
//! `set()` opens the gate and releases every waiter; it stays open until `reset()`.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;
use crate::sync::wait_queue::{self, WaitHost, WaitQueue, WaiterId};

struct GateState {
    set: bool,
    queue: WaitQueue<()>,
}

struct GateInner {
    state: Mutex<GateState>,
}

impl WaitHost<()> for GateInner {
    fn cancel_waiter(&self, id: WaiterId) -> bool {
        self.state.lock().queue.try_cancel(id)
    }

    // Waking does not consume anything.
    fn reclaim(&self, _: ()) {}
}

/// Async manual-reset event.
///
/// Cloning yields another handle to the **same** event.
#[derive(Clone)]
pub struct AsyncManualResetEvent {
    inner: Arc<GateInner>,
}

impl AsyncManualResetEvent {
    /// Creates an event in the given state.
    pub fn new(set: bool) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(GateState {
                    set,
                    queue: WaitQueue::new(),
                }),
            }),
        }
    }

    /// Opens the gate and releases all waiters.
    pub fn set(&self) {
        let mut state = self.inner.state.lock();
        state.set = true;
        state.queue.dequeue_all(());
    }

    /// Closes the gate; later waits suspend until the next [`set`](Self::set).
    pub fn reset(&self) {
        self.inner.state.lock().set = false;
    }

    /// Returns `true` while the gate is open.
    pub fn is_set(&self) -> bool {
        self.inner.state.lock().set
    }

    /// Waits until the gate is open.
    pub async fn wait(&self, token: &CancellationToken) -> Result<(), Cancelled> {
        let (id, rx) = {
            let mut state = self.inner.state.lock();
            if state.set {
                return Ok(());
            }
            if token.is_cancelled() {
                return Err(Cancelled);
            }
            state.queue.enqueue()
        };
        wait_queue::wait(self.inner.as_ref(), id, rx, token).await
    }
}

impl Default for AsyncManualResetEvent {
    fn default() -> Self {
        Self::new(false)
    }
}

impl fmt::Debug for AsyncManualResetEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("AsyncManualResetEvent")
            .field("set", &state.set)
            .field("waiters", &state.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_releases_everyone_and_stays_open() {
        let gate = AsyncManualResetEvent::new(false);
        let mut handles = Vec::new();
        for _ in 0..3 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                gate.wait(&CancellationToken::new()).await
            }));
        }
        tokio::task::yield_now().await;

        gate.set();
        for h in handles {
            assert_eq!(h.await.unwrap(), Ok(()));
        }
        assert!(gate.is_set());
        assert_eq!(gate.wait(&CancellationToken::new()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_reset_closes_gate() {
        let gate = AsyncManualResetEvent::new(true);
        gate.reset();
        assert!(!gate.is_set());

        let token = CancellationToken::new();
        let res = tokio::time::timeout(Duration::from_millis(20), gate.wait(&token)).await;
        assert!(res.is_err());

        token.cancel();
        assert_eq!(gate.wait(&token).await, Err(Cancelled));
    }
}
