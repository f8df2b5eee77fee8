//! Async synchronization primitives.
//!
//! ## Contents
//! - [`AsyncLock`] / [`LockToken`] non-reentrant FIFO mutual exclusion
//! - [`AsyncAutoResetEvent`] single-permit signal
//! - [`AsyncManualResetEvent`] gate released for everyone until reset
//!
//! All of them are built on one internal FIFO wait queue guarded by the
//! primitive's own `parking_lot::Mutex`. Waits are cancellable through a
//! [`CancellationToken`](tokio_util::sync::CancellationToken); blocking variants
//! park the thread on a condition variable.

mod auto_reset;
mod lock;
mod manual_reset;
pub(crate) mod wait_queue;

pub use auto_reset::AsyncAutoResetEvent;
pub use lock::{AsyncLock, LockToken};
pub use manual_reset::AsyncManualResetEvent;
