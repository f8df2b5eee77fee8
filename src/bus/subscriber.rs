//! # Subscribers and their handlers.
//!
//! A [`Handler`] is what users implement (or pass as a closure through [`HandlerFn`]).
//! The bus stores it type-erased inside a [`Subscriber`], together with the subscription's
//! cancellation token and a cache of conversion routes per observed message type.

use std::any::{Any, TypeId};
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::message::{Message, MessageType};
use super::types::{Route, TypeRegistry};
use crate::error::TaskError;

/// Receives messages of type `T`.
///
/// Each invocation gets its own deep copy of the message and the subscription's token.
/// An error is logged by the bus; it never reaches the publisher or other subscribers.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use taskbus::{Handler, TaskError};
/// use tokio_util::sync::CancellationToken;
///
/// struct Audit;
///
/// #[async_trait]
/// impl Handler<String> for Audit {
///     async fn handle(&self, message: String, _token: CancellationToken) -> Result<(), TaskError> {
///         if message.is_empty() {
///             return Err(TaskError::fail("empty audit entry"));
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Message>: Send + Sync + 'static {
    /// Handles one message.
    async fn handle(&self, message: T, token: CancellationToken) -> Result<(), TaskError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F> {
    f: F,
}

impl<F> HandlerFn<F> {
    /// Wraps `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<T, F, Fut> Handler<T> for HandlerFn<F>
where
    T: Message,
    F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
{
    async fn handle(&self, message: T, token: CancellationToken) -> Result<(), TaskError> {
        (self.f)(message, token).await
    }
}

/// Type-erased handler: downcasts the payload and forwards it.
pub(crate) trait ErasedHandler: Send + Sync {
    fn invoke(
        &self,
        message: Box<dyn Any + Send>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<(), TaskError>>;
}

struct Typed<T, H> {
    handler: Arc<H>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Message, H: Handler<T>> ErasedHandler for Typed<T, H> {
    fn invoke(
        &self,
        message: Box<dyn Any + Send>,
        token: CancellationToken,
    ) -> BoxFuture<'static, Result<(), TaskError>> {
        let handler = Arc::clone(&self.handler);
        async move {
            match message.downcast::<T>() {
                Ok(message) => handler.handle(*message, token).await,
                Err(_) => Err(TaskError::fail(format!(
                    "payload is not a {}",
                    std::any::type_name::<T>()
                ))),
            }
        }
        .boxed()
    }
}

/// One live subscription.
pub(crate) struct Subscriber {
    id: Uuid,
    target: MessageType,
    token: CancellationToken,
    handler: Arc<dyn ErasedHandler>,
    routes: DashMap<TypeId, Option<Route>>,
}

impl Subscriber {
    pub(crate) fn new<T: Message, H: Handler<T>>(
        target: MessageType,
        handler: H,
        token: CancellationToken,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            token,
            handler: Arc::new(Typed::<T, H> {
                handler: Arc::new(handler),
                _marker: PhantomData,
            }),
            routes: DashMap::new(),
        }
    }

    pub(crate) fn id(&self) -> Uuid {
        self.id
    }

    pub(crate) fn target(&self) -> &MessageType {
        &self.target
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Route from `observed` to this subscriber's type; cached after the first lookup.
    pub(crate) fn route_for(&self, registry: &TypeRegistry, observed: TypeId) -> Option<Route> {
        if let Some(cached) = self.routes.get(&observed) {
            return cached.value().clone();
        }
        let route = registry.route(observed, self.target.id());
        self.routes.insert(observed, route.clone());
        route
    }

    #[cfg(test)]
    pub(crate) fn cached_routes(&self) -> usize {
        self.routes.len()
    }

    pub(crate) fn invoke(
        &self,
        message: Box<dyn Any + Send>,
    ) -> BoxFuture<'static, Result<(), TaskError>> {
        self.handler.invoke(message, self.token.clone())
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("target", &self.target)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::types::Upcast;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq)]
    struct Specific(u8);
    #[derive(Clone, Debug, PartialEq)]
    struct General(u8);
    crate::deep_clone_via_clone!(Specific, General);

    impl From<Specific> for General {
        fn from(s: Specific) -> Self {
            General(s.0)
        }
    }

    #[tokio::test]
    async fn test_route_cache_and_invoke() {
        let registry = TypeRegistry::new(Vec::new(), vec![Upcast::new::<Specific, General>()]);
        let seen = Arc::new(AtomicUsize::new(0));
        let sub = {
            let seen = Arc::clone(&seen);
            Subscriber::new::<General, _>(
                registry.message_type::<General>(),
                HandlerFn::new(move |msg: General, _token: CancellationToken| {
                    let seen = Arc::clone(&seen);
                    async move {
                        seen.fetch_add(msg.0 as usize, Ordering::SeqCst);
                        Ok(())
                    }
                }),
                CancellationToken::new(),
            )
        };

        let route = sub
            .route_for(&registry, TypeId::of::<Specific>())
            .unwrap();
        assert!(sub.route_for(&registry, TypeId::of::<u64>()).is_none());
        assert_eq!(sub.cached_routes(), 2);

        sub.invoke(route.apply(Box::new(Specific(5)))).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_wrong_payload_is_a_failure() {
        let registry = TypeRegistry::new(Vec::new(), Vec::new());
        let sub = Subscriber::new::<General, _>(
            registry.message_type::<General>(),
            HandlerFn::new(|_: General, _: CancellationToken| async { Ok(()) }),
            CancellationToken::new(),
        );
        let err = sub.invoke(Box::new(7_u32)).await.unwrap_err();
        assert_eq!(err.as_label(), "task_failed");
    }
}
