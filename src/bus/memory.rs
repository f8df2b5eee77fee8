//! # InMemoryBus: the in-process message bus.
//!
//! ## Rules
//! - Publishing after [`dispose`](InMemoryBus::dispose) fails with [`BusError::Closed`].
//! - A publish with no matching subscriber is a no-op.
//! - Cancelled subscribers are removed by the publish that finds them, before any handler runs.
//! - Dispatch jobs that do not fit into the queue are dropped (the queue logs it).

use std::any::TypeId;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};
use uuid::Uuid;

use super::config::BusConfig;
use super::delayed::{DelayedMessage, DelayedSet};
use super::message::{AnyMessage, Message, MessageType, short_name};
use super::subscriber::{Handler, Subscriber};
use super::types::{Route, TypeRegistry, Upcast};
use super::MessageBus;
use crate::clock::{ClockRef, SystemClock};
use crate::error::BusError;
use crate::queue::TaskQueue;
use crate::timer::ScheduledTimer;
use crate::util::panic_message;

// Delays that overflow `Instant` are clamped to roughly thirty years.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct BusInner {
    id: String,
    config: BusConfig,
    clock: ClockRef,
    types: TypeRegistry,
    subscribers: DashMap<Uuid, Arc<Subscriber>>,
    delayed: DelayedSet,
    queue: TaskQueue,
    timer: ScheduledTimer,
    sent: AtomicU64,
    sent_by_type: DashMap<TypeId, u64>,
    disposed: AtomicBool,
}

impl BusInner {
    fn check_open(&self, token: &CancellationToken) -> Result<(), BusError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if token.is_cancelled() {
            return Err(BusError::Cancelled);
        }
        Ok(())
    }

    fn publish(
        &self,
        message_type: MessageType,
        payload: Arc<dyn AnyMessage>,
        delay: Duration,
    ) {
        self.sent.fetch_add(1, Ordering::Relaxed);
        *self.sent_by_type.entry(message_type.id()).or_insert(0) += 1;

        if delay > Duration::ZERO {
            let now = self.clock.now();
            let send_at = now.checked_add(delay).unwrap_or(now + FAR_FUTURE);
            let send_time = chrono::Duration::from_std(delay)
                .ok()
                .and_then(|delay| self.clock.utc_now().checked_add_signed(delay))
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            trace!(
                bus = %self.id,
                message_type = %message_type,
                delay_ms = delay.as_millis() as u64,
                "message delayed"
            );
            self.delayed.insert(DelayedMessage {
                message_type,
                payload,
                send_at,
                send_time,
            });
            self.timer.schedule_next(Some(send_at));
            return;
        }

        self.dispatch(&message_type, payload);
    }

    fn dispatch(&self, message_type: &MessageType, payload: Arc<dyn AnyMessage>) {
        let mut cancelled = Vec::new();
        let mut targets: Vec<(Arc<Subscriber>, Route)> = Vec::new();
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if subscriber.is_cancelled() {
                cancelled.push(*entry.key());
                continue;
            }
            if let Some(route) = subscriber.route_for(&self.types, message_type.id()) {
                targets.push((Arc::clone(subscriber), route));
            }
        }

        for id in cancelled {
            if self.subscribers.remove(&id).is_some() {
                trace!(bus = %self.id, subscriber = %id, "cancelled subscriber removed");
            }
        }

        if targets.is_empty() {
            trace!(bus = %self.id, message_type = %message_type, "no subscribers");
            return;
        }

        for (subscriber, route) in targets {
            let payload = Arc::clone(&payload);
            let name = message_type.clone();
            let bus = self.id.clone();
            self.queue.enqueue(move |_| async move {
                if subscriber.is_cancelled() {
                    trace!(bus = %bus, subscriber = %subscriber.id(), "subscriber cancelled; skipped");
                    return Ok(());
                }

                let handled = AssertUnwindSafe(async {
                    let message = route.apply(payload.deep_clone_any());
                    subscriber.invoke(message).await
                })
                .catch_unwind()
                .await;

                match handled {
                    Ok(Ok(())) => trace!(
                        bus = %bus,
                        subscriber = %subscriber.id(),
                        message_type = %name,
                        "message handled"
                    ),
                    Ok(Err(err)) => warn!(
                        bus = %bus,
                        subscriber = %subscriber.id(),
                        message_type = %name,
                        error = %err,
                        label = err.as_label(),
                        "subscriber failed"
                    ),
                    Err(panic) => warn!(
                        bus = %bus,
                        subscriber = %subscriber.id(),
                        message_type = %name,
                        panic = %panic_message(panic.as_ref()),
                        "subscriber panicked"
                    ),
                }
                Ok(())
            });
        }
    }

    fn sweep(&self) -> Option<Instant> {
        let (due, next) = self
            .delayed
            .take_due(self.clock.now(), self.config.delivery_window);
        for message in due {
            trace!(
                bus = %self.id,
                message_type = %message.message_type,
                send_time = %message.send_time,
                "delayed message due"
            );
            self.dispatch(&message.message_type, message.payload);
        }
        next
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.subscribers.clear();
        self.delayed.clear();
        self.queue.shutdown();
        self.timer.dispose();
        trace!(bus = %self.id, "message bus disposed");
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// In-memory [`MessageBus`].
///
/// Cloning yields another handle to the **same** bus. Must be built inside a tokio runtime.
///
/// # Example
/// ```
/// use taskbus::{InMemoryBus, MessageBus};
/// use tokio_util::sync::CancellationToken;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = InMemoryBus::new();
/// let token = CancellationToken::new();
///
/// bus.subscribe(|greeting: String, _token| async move {
///     assert_eq!(greeting, "hello");
///     Ok(())
/// }, token.clone())
/// .await
/// .unwrap();
///
/// bus.publish("hello".to_string()).await.unwrap();
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<BusInner>,
}

impl InMemoryBus {
    /// Bus with default configuration.
    pub fn new() -> Self {
        BusBuilder::new().build()
    }

    /// Starts a [`BusBuilder`].
    pub fn builder() -> BusBuilder {
        BusBuilder::new()
    }

    /// Bus id: topic plus a random suffix.
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Effective configuration.
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    /// Category of `T` as this bus names it.
    pub fn message_type<T: Message>(&self) -> MessageType {
        self.inner.types.message_type::<T>()
    }

    /// Publishes `message` under an explicit category name.
    ///
    /// ### Rules
    /// - An empty name is a no-op.
    /// - The name must be known (mapped in the builder, or seen before) and must
    ///   belong to `T`.
    pub async fn publish_named<T: Message>(
        &self,
        name: &str,
        message: T,
        delay: Duration,
        token: &CancellationToken,
    ) -> Result<(), BusError> {
        if name.is_empty() {
            return Ok(());
        }
        self.inner.check_open(token)?;
        let message_type = self.inner.types.resolve_named::<T>(name)?;
        self.inner.publish(message_type, Arc::new(message), delay);
        Ok(())
    }

    /// Messages published since creation (or the last reset), delayed ones included.
    pub fn messages_sent(&self) -> u64 {
        self.inner.sent.load(Ordering::Relaxed)
    }

    /// Messages of type `T` published since creation (or the last reset).
    pub fn messages_sent_of<T: Message>(&self) -> u64 {
        self.inner
            .sent_by_type
            .get(&TypeId::of::<T>())
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Resets the published-message counters.
    pub fn reset_messages_sent(&self) {
        self.inner.sent.store(0, Ordering::Relaxed);
        self.inner.sent_by_type.clear();
    }

    /// Registered subscribers, including cancelled ones not yet pruned by a publish.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// Delayed messages waiting for their due time.
    pub fn delayed_count(&self) -> usize {
        self.inner.delayed.len()
    }

    /// Dispatch jobs that are queued or running.
    pub fn pending_dispatches(&self) -> usize {
        self.inner.queue.queued() + self.inner.queue.working()
    }

    /// Waits until no dispatch job is queued or running.
    pub async fn wait_idle(&self, token: &CancellationToken) -> Result<(), BusError> {
        self.inner.queue.wait_drained(token).await?;
        Ok(())
    }

    /// Drops all subscribers and delayed messages and stops dispatching. Idempotent.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Returns `true` once the bus was disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryBus")
            .field("id", &self.inner.id)
            .field("subscribers", &self.subscriber_count())
            .field("delayed", &self.delayed_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish_with<T: Message>(
        &self,
        message: T,
        delay: Duration,
        token: &CancellationToken,
    ) -> Result<(), BusError> {
        self.inner.check_open(token)?;
        let message_type = self.inner.types.message_type::<T>();
        self.inner.publish(message_type, Arc::new(message), delay);
        Ok(())
    }

    async fn subscribe_handler<T: Message, H: Handler<T>>(
        &self,
        handler: H,
        token: CancellationToken,
    ) -> Result<(), BusError> {
        self.inner.check_open(&token)?;
        let target = self.inner.types.message_type::<T>();
        let subscriber = Subscriber::new::<T, H>(target, handler, token);
        trace!(
            bus = %self.inner.id,
            subscriber = %subscriber.id(),
            message_type = %subscriber.target(),
            "subscribed"
        );
        self.inner
            .subscribers
            .insert(subscriber.id(), Arc::new(subscriber));
        Ok(())
    }
}

/// Builder for [`InMemoryBus`].
///
/// # Example
/// ```
/// use std::time::Duration;
/// use taskbus::{BusBuilder, BusConfig};
///
/// #[derive(Clone)]
/// struct OrderPlaced(u64);
/// #[derive(Clone)]
/// struct DomainEvent(String);
/// taskbus::deep_clone_via_clone!(OrderPlaced, DomainEvent);
///
/// impl From<OrderPlaced> for DomainEvent {
///     fn from(o: OrderPlaced) -> Self {
///         DomainEvent(format!("order {}", o.0))
///     }
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = BusBuilder::new()
///     .topic("orders")
///     .map_message_type_to_short_name::<OrderPlaced>()
///     .derive::<OrderPlaced, DomainEvent>()
///     .with_config(BusConfig {
///         delivery_window: Duration::from_millis(20),
///         ..BusConfig::default()
///     })
///     .build();
/// assert!(bus.id().starts_with("orders-"));
/// assert_eq!(bus.message_type::<OrderPlaced>().name(), "OrderPlaced");
/// # }
/// ```
pub struct BusBuilder {
    config: BusConfig,
    topic: Option<String>,
    clock: ClockRef,
    names: Vec<(TypeId, &'static str, Arc<str>)>,
    upcasts: Vec<Upcast>,
}

impl BusBuilder {
    /// Builder with default configuration and the system clock.
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            topic: None,
            clock: SystemClock::arc(),
            names: Vec::new(),
            upcasts: Vec::new(),
        }
    }

    /// Replaces the configuration.
    ///
    /// A topic set with [`topic`](Self::topic) still takes precedence.
    pub fn with_config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the bus topic.
    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Publishes and resolves `T` under `name` instead of its Rust type name.
    pub fn map_message_type<T: Message>(mut self, name: impl Into<Arc<str>>) -> Self {
        self.names.push((
            TypeId::of::<T>(),
            std::any::type_name::<T>(),
            name.into(),
        ));
        self
    }

    /// Maps `T` to the last segment of its type name (`app::orders::OrderPlaced` → `OrderPlaced`).
    pub fn map_message_type_to_short_name<T: Message>(self) -> Self {
        let name = short_name(std::any::type_name::<T>());
        self.map_message_type::<T>(name)
    }

    /// Declares `D` a specialization of `B`: subscribers of `B` also receive `D`,
    /// converted with `B::from`.
    pub fn derive<D: Message, B: Message + From<D>>(mut self) -> Self {
        self.upcasts.push(Upcast::new::<D, B>());
        self
    }

    /// Uses `clock` for delays and the maintenance timer.
    pub fn with_clock(mut self, clock: ClockRef) -> Self {
        self.clock = clock;
        self
    }

    /// Builds the bus. Must be called inside a tokio runtime.
    pub fn build(self) -> InMemoryBus {
        let BusBuilder {
            mut config,
            topic,
            clock,
            names,
            upcasts,
        } = self;
        if let Some(topic) = topic {
            config.topic = topic;
        }

        let suffix = Uuid::new_v4().simple().to_string();
        let id = format!("{}-{}", config.topic, &suffix[..8]);
        let queue = TaskQueue::new(config.task_queue(), Arc::clone(&clock));

        let inner = Arc::new_cyclic(|weak: &Weak<BusInner>| {
            let weak = weak.clone();
            let timer = ScheduledTimer::new(
                move || {
                    let bus = weak.upgrade();
                    async move { Ok(bus.and_then(|bus| bus.sweep())) }
                },
                config.timer.clone(),
                Arc::clone(&clock),
            );
            BusInner {
                id,
                config,
                clock,
                types: TypeRegistry::new(names, upcasts),
                subscribers: DashMap::new(),
                delayed: DelayedSet::default(),
                queue,
                timer,
                sent: AtomicU64::new(0),
                sent_by_type: DashMap::new(),
                disposed: AtomicBool::new(false),
            }
        });
        trace!(bus = %inner.id, "message bus created");
        InMemoryBus { inner }
    }
}

impl Default for BusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
