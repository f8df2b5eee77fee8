//! # In-process publish/subscribe.
//!
//! [`MessageBus`] is the public contract; [`InMemoryBus`] implements it on top of the
//! [`TaskQueue`](crate::TaskQueue) (dispatch) and the [`ScheduledTimer`](crate::ScheduledTimer)
//! (delayed delivery). [`NullBus`] accepts everything and does nothing.
//!
//! ## Architecture
//! ```text
//! publish(msg, delay)
//!   ├─ delay > 0 → DelayedSet.insert ──► timer.schedule_next(due)
//!   │                                        │
//!   │              sweep (timer callback) ◄──┘
//!   │                 ├─ take entries due within delivery_window
//!   │                 ├─ dispatch each
//!   │                 └─ return earliest remaining due time
//!   │
//!   └─ delay = 0 → dispatch
//!                    ├─ prune cancelled subscribers
//!                    ├─ match by route (exact type or declared upcasts)
//!                    └─ one job per subscriber ──► TaskQueue
//!                                                    └─ deep clone → convert → handler
//! ```
//!
//! ## Rules
//! - Each subscriber receives its own deep copy of the payload.
//! - Handler errors and panics are logged; they never reach the publisher or siblings.
//! - Undelivered messages are lost when the bus is disposed.

mod config;
mod delayed;
mod memory;
mod message;
mod null;
mod subscriber;
mod types;

pub use config::BusConfig;
pub use memory::{BusBuilder, InMemoryBus};
pub use message::{AnyMessage, Message, MessageType};
pub use null::NullBus;
pub use subscriber::{Handler, HandlerFn};

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BusError, TaskError};

/// Publish/subscribe contract.
///
/// Subscriptions live until their token is cancelled; there is no explicit unsubscribe.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `message`, delivering it after `delay` (`Duration::ZERO` = now).
    async fn publish_with<T: Message>(
        &self,
        message: T,
        delay: Duration,
        token: &CancellationToken,
    ) -> Result<(), BusError>;

    /// Publishes `message` for immediate delivery.
    async fn publish<T: Message>(&self, message: T) -> Result<(), BusError> {
        self.publish_with(message, Duration::ZERO, &CancellationToken::new())
            .await
    }

    /// Publishes `message` for delivery after `delay`.
    async fn publish_delayed<T: Message>(&self, message: T, delay: Duration) -> Result<(), BusError> {
        self.publish_with(message, delay, &CancellationToken::new())
            .await
    }

    /// Registers `handler` for messages of type `T` and of every type upcastable to `T`.
    async fn subscribe_handler<T: Message, H: Handler<T>>(
        &self,
        handler: H,
        token: CancellationToken,
    ) -> Result<(), BusError>;

    /// Registers an async closure for messages of type `T`.
    async fn subscribe<T, F, Fut>(&self, handler: F, token: CancellationToken) -> Result<(), BusError>
    where
        T: Message,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.subscribe_handler(HandlerFn::new(handler), token).await
    }
}
