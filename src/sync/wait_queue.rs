//! # FIFO queue of pending waiters.
//!
//! [`WaitQueue`] is the shared building block of the async primitives. It is **not**
//! synchronized: every call happens inside the owning primitive's mutex, which is held
//! only for a synchronous check-and-mutate, never across an `.await`.
//!
//! ## Architecture
//! ```text
//! primitive.mutex ──► WaitQueue
//!                       ├─ enqueue()          → (id, oneshot::Receiver)     async callers
//!                       ├─ enqueue_blocking() → Arc<BlockingSlot>           blocking callers
//!                       ├─ dequeue(v)         → oldest live waiter gets Ok(v)
//!                       ├─ dequeue_all(v)     → every waiter gets Ok(v)
//!                       ├─ try_cancel(id)     → waiter gets Err(Cancelled), removed
//!                       └─ cancel_all()       → every waiter gets Err(Cancelled)
//!
//! wait(host, id, rx, token)
//!   ├─ rx resolves           → value
//!   ├─ token fires           → host.cancel_waiter(id)
//!   │                            ├─ true  → Err(Cancelled)
//!   │                            └─ false → resolution won the race, take the value
//!   └─ future dropped early  → cancel, or host.reclaim(value) if already resolved
//! ```
//!
//! ## Rules
//! - Waiters are resolved strictly in FIFO order.
//! - A waiter is resolved at most once; removal is idempotent.
//! - A value handed to a waiter that is gone is passed on (dequeue) or reclaimed (wait guard),
//!   so lock ownership and event permits are never lost.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::Cancelled;

/// Identifier of one enqueued waiter (unique per queue).
pub(crate) type WaiterId = u64;

/// Outcome delivered to a waiter.
pub(crate) type WaitResult<T> = Result<T, Cancelled>;

/// Completion slot for callers that block a thread instead of awaiting.
pub(crate) struct BlockingSlot<T> {
    value: Mutex<Option<WaitResult<T>>>,
    ready: Condvar,
}

impl<T> BlockingSlot<T> {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn complete(&self, result: WaitResult<T>) {
        let mut value = self.value.lock();
        if value.is_none() {
            *value = Some(result);
            self.ready.notify_one();
        }
    }

    /// Blocks the current thread until the waiter is resolved.
    pub(crate) fn wait(&self) -> WaitResult<T> {
        let mut value = self.value.lock();
        loop {
            if let Some(result) = value.take() {
                return result;
            }
            self.ready.wait(&mut value);
        }
    }
}

enum Completion<T> {
    Async(oneshot::Sender<WaitResult<T>>),
    Blocking(Arc<BlockingSlot<T>>),
}

impl<T> Completion<T> {
    /// Hands `value` to the waiter; returns it back if the receiving side is gone.
    fn deliver(self, value: T) -> Option<T> {
        match self {
            Completion::Async(tx) => tx.send(Ok(value)).err().and_then(Result::ok),
            Completion::Blocking(slot) => {
                slot.complete(Ok(value));
                None
            }
        }
    }

    fn cancel(self) {
        match self {
            Completion::Async(tx) => {
                let _ = tx.send(Err(Cancelled));
            }
            Completion::Blocking(slot) => slot.complete(Err(Cancelled)),
        }
    }
}

struct Waiter<T> {
    id: WaiterId,
    completion: Completion<T>,
}

/// Ordered collection of pending waiters.
pub(crate) struct WaitQueue<T> {
    waiters: VecDeque<Waiter<T>>,
    last_id: WaiterId,
}

impl<T> WaitQueue<T> {
    pub(crate) fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            last_id: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    fn next_id(&mut self) -> WaiterId {
        self.last_id = self.last_id.wrapping_add(1);
        self.last_id
    }

    /// Appends an async waiter and returns its id and receiving end.
    pub(crate) fn enqueue(&mut self) -> (WaiterId, oneshot::Receiver<WaitResult<T>>) {
        let id = self.next_id();
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(Waiter {
            id,
            completion: Completion::Async(tx),
        });
        (id, rx)
    }

    /// Appends a blocking waiter.
    pub(crate) fn enqueue_blocking(&mut self) -> Arc<BlockingSlot<T>> {
        let id = self.next_id();
        let slot = Arc::new(BlockingSlot::new());
        self.waiters.push_back(Waiter {
            id,
            completion: Completion::Blocking(Arc::clone(&slot)),
        });
        slot
    }

    /// Resolves the oldest live waiter with `value`.
    ///
    /// Waiters whose receiver was dropped are discarded and the value moves on.
    /// Returns the value back when no waiter accepted it.
    pub(crate) fn dequeue(&mut self, value: T) -> Option<T> {
        let mut value = value;
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.completion.deliver(value) {
                None => return None,
                Some(back) => value = back,
            }
        }
        Some(value)
    }

    /// Resolves every waiter with a clone of `value`; returns how many were reached.
    pub(crate) fn dequeue_all(&mut self, value: T) -> usize
    where
        T: Clone,
    {
        let mut reached = 0;
        for waiter in self.waiters.drain(..) {
            if waiter.completion.deliver(value.clone()).is_none() {
                reached += 1;
            }
        }
        reached
    }

    /// Removes waiter `id` and resolves it as cancelled.
    ///
    /// Returns `false` if the waiter was already resolved (or never existed).
    pub(crate) fn try_cancel(&mut self, id: WaiterId) -> bool {
        match self.waiters.iter().position(|w| w.id == id) {
            Some(pos) => {
                if let Some(waiter) = self.waiters.remove(pos) {
                    waiter.completion.cancel();
                }
                true
            }
            None => false,
        }
    }

    /// Resolves every waiter as cancelled; returns how many there were.
    pub(crate) fn cancel_all(&mut self) -> usize {
        let count = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            waiter.completion.cancel();
        }
        count
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for WaitQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue")
            .field("len", &self.waiters.len())
            .finish()
    }
}

/// Owner of a [`WaitQueue`], seen from a waiting future.
pub(crate) trait WaitHost<T>: Send + Sync {
    /// Takes the owner's mutex and cancels waiter `id`.
    fn cancel_waiter(&self, id: WaiterId) -> bool;

    /// Gives back a value that was resolved to a waiter that went away unobserved.
    fn reclaim(&self, value: T);
}

struct PendingWait<'a, T, H: WaitHost<T> + ?Sized> {
    host: &'a H,
    id: WaiterId,
    rx: oneshot::Receiver<WaitResult<T>>,
    settled: bool,
}

impl<T, H: WaitHost<T> + ?Sized> PendingWait<'_, T, H> {
    fn settle_cancelled(&mut self) -> WaitResult<T> {
        self.settled = true;
        if self.host.cancel_waiter(self.id) {
            return Err(Cancelled);
        }
        // Resolution happened under the mutex first; the value is already in the channel.
        self.rx.try_recv().unwrap_or(Err(Cancelled))
    }
}

impl<T, H: WaitHost<T> + ?Sized> Drop for PendingWait<'_, T, H> {
    fn drop(&mut self) {
        if self.settled || self.host.cancel_waiter(self.id) {
            return;
        }
        if let Ok(Ok(value)) = self.rx.try_recv() {
            self.host.reclaim(value);
        }
    }
}

/// Awaits an enqueued waiter until it is resolved or `token` is cancelled.
pub(crate) async fn wait<T, H>(
    host: &H,
    id: WaiterId,
    rx: oneshot::Receiver<WaitResult<T>>,
    token: &CancellationToken,
) -> WaitResult<T>
where
    H: WaitHost<T> + ?Sized,
{
    let mut pending = PendingWait {
        host,
        id,
        rx,
        settled: false,
    };

    let received = tokio::select! {
        biased;
        res = &mut pending.rx => Some(res),
        _ = token.cancelled() => None,
    };

    match received {
        Some(res) => {
            pending.settled = true;
            res.unwrap_or(Err(Cancelled))
        }
        None => pending.settle_cancelled(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequeue_is_fifo() {
        let mut q = WaitQueue::<u32>::new();
        let (_, mut first) = q.enqueue();
        let (_, mut second) = q.enqueue();
        assert_eq!(q.len(), 2);

        assert_eq!(q.dequeue(1), None);
        assert_eq!(first.try_recv().unwrap(), Ok(1));
        assert!(second.try_recv().is_err());

        assert_eq!(q.dequeue(2), None);
        assert_eq!(second.try_recv().unwrap(), Ok(2));
        assert!(q.is_empty());
    }

    #[test]
    fn test_dequeue_skips_dropped_receivers() {
        let mut q = WaitQueue::<&str>::new();
        let (_, gone) = q.enqueue();
        let (_, mut alive) = q.enqueue();
        drop(gone);

        assert_eq!(q.dequeue("token"), None);
        assert_eq!(alive.try_recv().unwrap(), Ok("token"));
    }

    #[test]
    fn test_dequeue_returns_value_when_nobody_takes_it() {
        let mut q = WaitQueue::<u8>::new();
        assert_eq!(q.dequeue(7), Some(7));

        let (_, gone) = q.enqueue();
        drop(gone);
        assert_eq!(q.dequeue(8), Some(8));
        assert!(q.is_empty());
    }

    #[test]
    fn test_try_cancel_is_idempotent() {
        let mut q = WaitQueue::<()>::new();
        let (id, mut rx) = q.enqueue();

        assert!(q.try_cancel(id));
        assert_eq!(rx.try_recv().unwrap(), Err(Cancelled));
        assert!(!q.try_cancel(id));
        assert!(q.is_empty());
    }

    #[test]
    fn test_try_cancel_keeps_others_in_order() {
        let mut q = WaitQueue::<u8>::new();
        let (_, mut a) = q.enqueue();
        let (b_id, _b) = q.enqueue();
        let (_, mut c) = q.enqueue();

        assert!(q.try_cancel(b_id));
        q.dequeue(1);
        q.dequeue(2);
        assert_eq!(a.try_recv().unwrap(), Ok(1));
        assert_eq!(c.try_recv().unwrap(), Ok(2));
    }

    #[test]
    fn test_dequeue_all_and_cancel_all() {
        let mut q = WaitQueue::<u8>::new();
        let (_, mut a) = q.enqueue();
        let (_, mut b) = q.enqueue();
        assert_eq!(q.dequeue_all(9), 2);
        assert_eq!(a.try_recv().unwrap(), Ok(9));
        assert_eq!(b.try_recv().unwrap(), Ok(9));

        let (_, mut c) = q.enqueue();
        let slot = q.enqueue_blocking();
        assert_eq!(q.cancel_all(), 2);
        assert_eq!(c.try_recv().unwrap(), Err(Cancelled));
        assert_eq!(slot.wait(), Err(Cancelled));
        assert!(q.is_empty());
    }

    #[test]
    fn test_blocking_slot_wakes_other_thread() {
        let q = Arc::new(Mutex::new(WaitQueue::<u32>::new()));
        let slot = q.lock().enqueue_blocking();

        let waiter = std::thread::spawn(move || slot.wait());
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert_eq!(q.lock().dequeue(5), None);

        assert_eq!(waiter.join().unwrap(), Ok(5));
    }

    struct Host {
        queue: Mutex<WaitQueue<u32>>,
        reclaimed: Mutex<Vec<u32>>,
    }

    impl WaitHost<u32> for Host {
        fn cancel_waiter(&self, id: WaiterId) -> bool {
            self.queue.lock().try_cancel(id)
        }

        fn reclaim(&self, value: u32) {
            self.reclaimed.lock().push(value);
        }
    }

    fn host() -> Host {
        Host {
            queue: Mutex::new(WaitQueue::new()),
            reclaimed: Mutex::new(Vec::new()),
        }
    }

    #[tokio::test]
    async fn test_wait_resolves_with_value() {
        let host = host();
        let (id, rx) = host.queue.lock().enqueue();
        host.queue.lock().dequeue(3);

        let token = CancellationToken::new();
        assert_eq!(wait(&host, id, rx, &token).await, Ok(3));
        assert!(host.reclaimed.lock().is_empty());
    }

    #[tokio::test]
    async fn test_wait_cancelled_removes_waiter() {
        let host = host();
        let (id, rx) = host.queue.lock().enqueue();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(wait(&host, id, rx, &token).await, Err(Cancelled));
        assert!(host.queue.lock().is_empty());
    }

    #[tokio::test]
    async fn test_wait_prefers_value_over_cancellation() {
        let host = host();
        let (id, rx) = host.queue.lock().enqueue();
        host.queue.lock().dequeue(11);
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(wait(&host, id, rx, &token).await, Ok(11));
    }

    #[tokio::test]
    async fn test_dropped_wait_reclaims_resolved_value() {
        let host = host();
        let (id, rx) = host.queue.lock().enqueue();
        let token = CancellationToken::new();

        let mut fut = Box::pin(wait(&host, id, rx, &token));
        assert!(futures::poll!(&mut fut).is_pending());
        host.queue.lock().dequeue(42);
        drop(fut);

        assert_eq!(*host.reclaimed.lock(), vec![42]);
    }

    #[tokio::test]
    async fn test_dropped_wait_removes_unresolved_waiter() {
        let host = host();
        let (id, rx) = host.queue.lock().enqueue();
        let token = CancellationToken::new();
        {
            let fut = wait(&host, id, rx, &token);
            // Poll once so the guard is live, then drop.
            let _ = futures::poll!(Box::pin(fut));
        }
        assert!(host.queue.lock().is_empty());
        assert!(host.reclaimed.lock().is_empty());
    }
}
