//! # taskbus
//!
//! **Taskbus** is an in-process concurrency and messaging toolkit for tokio.
//!
//! It provides cancellable async synchronization primitives, a coalescing maintenance
//! timer, a bounded task queue and an in-memory publish/subscribe bus with delayed
//! delivery. Each layer is built on the one below it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  publisher                                             subscribers
//!      │                                                      ▲
//!      ▼                                                      │ handler(copy, token)
//! ┌──────────────────────────────────────────────────────────┴────────┐
//! │  InMemoryBus                                                       │
//! │  - TypeRegistry (names, upcast edges, routes)                      │
//! │  - subscribers: DashMap<Uuid, Subscriber> (pruned lazily)          │
//! │  - delayed:     DashMap<Uuid, DelayedMessage>                      │
//! └──────┬──────────────────────────────────────────────┬─────────────┘
//!        │ delay = 0: one job per subscriber            │ delay > 0
//!        ▼                                              ▼
//! ┌────────────────────────────┐          ┌────────────────────────────┐
//! │  TaskQueue                 │          │  ScheduledTimer            │
//! │  - SegQueue (max_items)    │          │  - earliest deadline wins  │
//! │  - Semaphore (parallelism) │          │  - never runs concurrently │
//! │  - supervised worker loop  │◄─────────│  - sweep: due → dispatch   │
//! └──────┬─────────────────────┘          └──────┬─────────────────────┘
//!        │                                       │
//!        ▼                                       ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  sync: AsyncLock · AsyncAutoResetEvent · AsyncManualResetEvent     │
//! │        (all on one FIFO WaitQueue, cancellable via CancellationToken)
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ### Delivery
//! ```text
//! publish(msg, delay)
//!   ├─ bus disposed             ─► BusError::Closed
//!   ├─ token cancelled          ─► BusError::Cancelled
//!   ├─ delay > 0                ─► DelayedMessage ─► timer.schedule_next(due)
//!   │                                 └─ sweep at due: entries within delivery_window
//!   │                                                  are dispatched together
//!   └─ dispatch
//!        ├─ cancelled subscribers ─► removed
//!        ├─ no route              ─► skipped
//!        └─ route found           ─► TaskQueue job:
//!                                      deep clone ─► upcast along route ─► handler
//!                                      errors / panics ─► logged, contained
//! ```
//!
//! ## Features
//! | Area               | Description                                                    | Key types / traits                                   |
//! |--------------------|----------------------------------------------------------------|------------------------------------------------------|
//! | **Sync**           | FIFO, cancellable lock and events, with blocking variants.     | [`AsyncLock`], [`AsyncAutoResetEvent`], [`AsyncManualResetEvent`] |
//! | **Timer**          | Coalescing scheduler for one maintenance callback.             | [`ScheduledTimer`], [`TimerConfig`]                  |
//! | **Queue**          | Bounded job queue with limited parallelism.                    | [`TaskQueue`], [`TaskQueueConfig`]                   |
//! | **Bus**            | Typed pub/sub with covariance and delayed delivery.            | [`MessageBus`], [`InMemoryBus`], [`BusBuilder`]      |
//! | **Cloning**        | Deep copies that keep sharing and cycles intact.               | [`DeepClone`], [`CloneContext`]                      |
//! | **Errors**         | Typed errors with stable log labels.                           | [`TaskError`], [`BusError`], [`Cancelled`]           |
//! | **Time**           | Injectable clock, deterministic under paused tokio time.       | [`Clock`], [`SystemClock`]                           |
//!
//! ## Logging
//! Everything is reported through [`tracing`]; install any subscriber to see it.
//! Nothing is printed when no subscriber is installed.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use taskbus::{deep_clone_via_clone, BusBuilder, MessageBus};
//!
//! #[derive(Clone, Debug)]
//! struct OrderPlaced { id: u64 }
//!
//! #[derive(Clone, Debug)]
//! struct Audit(String);
//!
//! deep_clone_via_clone!(OrderPlaced, Audit);
//!
//! impl From<OrderPlaced> for Audit {
//!     fn from(o: OrderPlaced) -> Self {
//!         Audit(format!("order {}", o.id))
//!     }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = BusBuilder::new()
//!         .topic("shop")
//!         .derive::<OrderPlaced, Audit>()
//!         .build();
//!
//!     let token = CancellationToken::new();
//!
//!     // Receives OrderPlaced directly.
//!     bus.subscribe(|order: OrderPlaced, _token| async move {
//!         println!("placed {}", order.id);
//!         Ok(())
//!     }, token.clone()).await?;
//!
//!     // Receives OrderPlaced converted into Audit.
//!     bus.subscribe(|audit: Audit, _token| async move {
//!         println!("audit: {}", audit.0);
//!         Ok(())
//!     }, token.clone()).await?;
//!
//!     bus.publish(OrderPlaced { id: 1 }).await?;
//!     bus.publish_delayed(OrderPlaced { id: 2 }, Duration::from_millis(20)).await?;
//!
//!     tokio::time::sleep(Duration::from_millis(100)).await;
//!     bus.wait_idle(&token).await?;
//!     bus.dispose();
//!     Ok(())
//! }
//! ```

mod bus;
mod clock;
mod clone;
mod error;
mod queue;
mod sync;
mod timer;
mod util;

// ---- Public re-exports ----

pub use bus::{
    AnyMessage, BusBuilder, BusConfig, Handler, HandlerFn, InMemoryBus, Message, MessageBus,
    MessageType, NullBus,
};
pub use clock::{Clock, ClockRef, SystemClock};
pub use clone::{CloneContext, DeepClone};
pub use error::{BusError, Cancelled, TaskError};
pub use queue::{DrainedCallback, Job, TaskQueue, TaskQueueConfig};
pub use sync::{AsyncAutoResetEvent, AsyncLock, AsyncManualResetEvent, LockToken};
pub use timer::{ScheduledTimer, TimerCallback, TimerConfig};
