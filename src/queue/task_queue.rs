//! # TaskQueue: bounded FIFO of async jobs with limited parallelism.
//!
//! ## Architecture
//! ```text
//! enqueue(job) ──► reserve(queued < max_items)? ── no ─► false (logged)
//!                      └─ yes ─► SegQueue.push ─► idle.set() ─► true
//!
//! supervisor task
//!   └─ loop { spawn(work_loop).await; panic / early exit → error!(fatal) → restart }
//!
//! work_loop
//!   loop {
//!     ├─► acquire slot (bounded by slot_timeout; timeout → re-check shutdown)
//!     ├─► pop job
//!     │     ├─ none → release slot, idle.wait() (bounded by idle_timeout)
//!     │     └─ job  → working += 1, spawn:
//!     │                 job(token) under catch_unwind
//!     │                 working -= 1, release slot, log outcome
//!     │                 queued == 0 && working == 0 → on_drained(), drained.set()
//!     └─► until shutdown
//!   }
//! ```
//!
//! ## Rules
//! - `queued() <= max_items` and `working() <= max_parallelism` at all times.
//! - A job is dequeued only while its slot is held.
//! - Job failures and panics are logged and never stop the loop.
//! - `shutdown()` drops pending jobs; running jobs observe their token and finish on their own.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_queue::SegQueue;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use super::TaskQueueConfig;
use crate::clock::ClockRef;
use crate::error::{Cancelled, TaskError};
use crate::sync::{AsyncAutoResetEvent, AsyncManualResetEvent};
use crate::util::panic_message;

/// A queued unit of work.
///
/// Receives the queue's shutdown token.
pub type Job =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<(), TaskError>> + Send>;

/// Called each time the queue runs empty.
pub type DrainedCallback = Arc<dyn Fn() + Send + Sync>;

struct QueueInner {
    config: TaskQueueConfig,
    clock: ClockRef,
    jobs: SegQueue<Job>,
    queued: AtomicUsize,
    working: AtomicUsize,
    slots: Arc<Semaphore>,
    idle: AsyncAutoResetEvent,
    drained: AsyncManualResetEvent,
    drain_gate: Mutex<()>,
    on_drained: Option<DrainedCallback>,
    started: AtomicBool,
    token: CancellationToken,
}

impl QueueInner {
    fn enqueue(&self, job: Job) -> bool {
        if self.token.is_cancelled() {
            warn!("task queue is shut down; job rejected");
            return false;
        }

        {
            let _gate = self.drain_gate.lock();
            let limit = self.config.max_items_limit();
            let reserved = self
                .queued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| match limit {
                    Some(max) if q >= max => None,
                    _ => Some(q + 1),
                });
            if reserved.is_err() {
                error!(
                    max_items = self.config.max_items,
                    "task queue is full; job rejected"
                );
                return false;
            }
            self.drained.reset();
        }

        self.jobs.push(job);
        self.idle.set();
        trace!(queued = self.queued.load(Ordering::SeqCst), "job enqueued");
        true
    }

    fn dequeue(&self) -> Option<Job> {
        let job = self.jobs.pop()?;
        self.working.fetch_add(1, Ordering::SeqCst);
        self.queued.fetch_sub(1, Ordering::SeqCst);
        Some(job)
    }

    fn check_drained(&self) {
        let drained = {
            let _gate = self.drain_gate.lock();
            let empty = self.queued.load(Ordering::SeqCst) == 0
                && self.working.load(Ordering::SeqCst) == 0;
            if empty {
                self.drained.set();
            }
            empty
        };
        if !drained {
            return;
        }
        trace!("task queue drained");
        if let Some(callback) = &self.on_drained {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback())) {
                error!(panic = %panic_message(panic.as_ref()), "drained callback panicked");
            }
        }
    }

    fn spawn_job(self: &Arc<Self>, job: Job, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(async move { job(token).await })
                .catch_unwind()
                .await;

            inner.working.fetch_sub(1, Ordering::SeqCst);
            drop(permit);

            match outcome {
                Ok(Ok(())) => trace!("job completed"),
                Ok(Err(err)) if err.is_canceled() => {
                    warn!(label = err.as_label(), "job cancelled");
                }
                Ok(Err(err)) => {
                    error!(error = %err, label = err.as_label(), "job failed");
                }
                Err(panic) => {
                    error!(panic = %panic_message(panic.as_ref()), "job panicked");
                }
            }
            inner.check_drained();
        });
    }

    async fn work_loop(self: Arc<Self>) {
        let token = self.token.clone();
        while !token.is_cancelled() {
            let permit = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.clock.sleep_async(self.config.slot_timeout, &token) => {
                    trace!("no free slot yet");
                    continue;
                }
            };

            let Some(job) = self.dequeue() else {
                drop(permit);
                tokio::select! {
                    _ = self.idle.wait(&token) => {}
                    _ = self.clock.sleep_async(self.config.idle_timeout, &token) => {}
                }
                continue;
            };
            self.spawn_job(job, permit);
        }
    }

    fn start_loop(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let res = tokio::spawn(Arc::clone(&inner).work_loop()).await;
                if inner.token.is_cancelled() {
                    break;
                }
                match res {
                    Err(err) if err.is_panic() => {
                        let panic = err.into_panic();
                        error!(
                            fatal = true,
                            panic = %panic_message(panic.as_ref()),
                            "task queue worker loop panicked; restarting"
                        );
                    }
                    _ => error!(
                        fatal = true,
                        "task queue worker loop exited unexpectedly; restarting"
                    ),
                }
            }
            trace!("task queue worker loop stopped");
        });
    }

    fn shutdown(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.token.cancel();

        let mut dropped = 0usize;
        while self.jobs.pop().is_some() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            dropped += 1;
        }
        self.idle.cancel_waiters();
        trace!(dropped, "task queue shut down");
        self.check_drained();
    }
}

/// Bounded queue of async jobs executed with limited parallelism.
///
/// Creating a queue with `auto_start = true` (the default) requires a tokio runtime.
/// Dropping the queue shuts it down.
///
/// # Example
/// ```
/// use taskbus::{SystemClock, TaskQueue, TaskQueueConfig};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let queue = TaskQueue::new(TaskQueueConfig::default(), SystemClock::arc());
/// assert!(queue.enqueue(|_token| async { Ok(()) }));
///
/// queue.wait_drained(&CancellationToken::new()).await.unwrap();
/// assert_eq!(queue.working(), 0);
/// # }
/// ```
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl TaskQueue {
    /// Creates a queue.
    pub fn new(config: TaskQueueConfig, clock: ClockRef) -> Self {
        Self::build(config, clock, None)
    }

    /// Creates a queue that calls `on_drained` each time it runs empty.
    pub fn with_on_drained(
        config: TaskQueueConfig,
        clock: ClockRef,
        on_drained: DrainedCallback,
    ) -> Self {
        Self::build(config, clock, Some(on_drained))
    }

    fn build(config: TaskQueueConfig, clock: ClockRef, on_drained: Option<DrainedCallback>) -> Self {
        let auto_start = config.auto_start;
        let inner = Arc::new(QueueInner {
            slots: Arc::new(Semaphore::new(config.max_parallelism_clamped())),
            config,
            clock,
            jobs: SegQueue::new(),
            queued: AtomicUsize::new(0),
            working: AtomicUsize::new(0),
            idle: AsyncAutoResetEvent::new(false),
            drained: AsyncManualResetEvent::new(true),
            drain_gate: Mutex::new(()),
            on_drained,
            started: AtomicBool::new(false),
            token: CancellationToken::new(),
        });
        if auto_start {
            inner.start_loop();
        }
        Self { inner }
    }

    /// Appends a job.
    ///
    /// Returns `false` (and logs at error level) when the queue is full, or when it was shut down.
    pub fn enqueue<F, Fut>(&self, job: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.inner.enqueue(Box::new(move |token| job(token).boxed()))
    }

    /// Appends an already boxed job.
    pub fn enqueue_boxed(&self, job: Job) -> bool {
        self.inner.enqueue(job)
    }

    /// Starts the worker loop and ties its lifetime to `parent`.
    ///
    /// ### Notes
    /// On a queue that was auto-started this only links `parent`.
    pub fn start(&self, parent: &CancellationToken) {
        let weak: Weak<QueueInner> = Arc::downgrade(&self.inner);
        let parent = parent.clone();
        let own = self.inner.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => {
                    if let Some(inner) = weak.upgrade() {
                        inner.shutdown();
                    }
                }
                _ = own.cancelled() => {}
            }
        });
        self.inner.start_loop();
    }

    /// Stops the loop and drops pending jobs. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Returns `true` once the queue was shut down.
    pub fn is_shutdown(&self) -> bool {
        self.inner.token.is_cancelled()
    }

    /// Number of jobs waiting to start.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Number of jobs running right now.
    pub fn working(&self) -> usize {
        self.inner.working.load(Ordering::SeqCst)
    }

    /// Waits until nothing is queued or running.
    pub async fn wait_drained(&self, token: &CancellationToken) -> Result<(), Cancelled> {
        self.inner.drained.wait(token).await
    }

    /// Effective configuration.
    pub fn config(&self) -> &TaskQueueConfig {
        &self.inner.config
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.inner.shutdown();
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("queued", &self.queued())
            .field("working", &self.working())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
