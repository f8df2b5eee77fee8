//! Message payloads and their runtime type tags.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::clone::DeepClone;

/// Anything that can travel over the bus.
///
/// Blanket-implemented: a type only needs [`DeepClone`] (plus `Send + Sync + 'static`).
pub trait Message: DeepClone + Send + Sync + 'static {}

impl<T: DeepClone + Send + Sync + 'static> Message for T {}

/// Object-safe view of a [`Message`], used to store payloads of any type.
pub trait AnyMessage: Send + Sync + 'static {
    /// Borrow as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Deep copy, type-erased.
    fn deep_clone_any(&self) -> Box<dyn Any + Send>;

    /// Rust type name of the payload.
    fn type_name(&self) -> &'static str;
}

impl<T: Message> AnyMessage for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn deep_clone_any(&self) -> Box<dyn Any + Send> {
        Box::new(self.deep_clone())
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

impl fmt::Debug for dyn AnyMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyMessage")
            .field("type", &self.type_name())
            .finish()
    }
}

/// Runtime category of a message: its [`TypeId`] plus the name it is known by.
///
/// Equality and hashing only look at the type id.
#[derive(Clone)]
pub struct MessageType {
    id: TypeId,
    name: Arc<str>,
    type_name: &'static str,
}

impl MessageType {
    pub(crate) fn new(id: TypeId, name: Arc<str>, type_name: &'static str) -> Self {
        Self {
            id,
            name,
            type_name,
        }
    }

    /// Category of `T` under its default name ([`std::any::type_name`]).
    pub fn of<T: Message>() -> Self {
        let type_name = std::any::type_name::<T>();
        Self::new(TypeId::of::<T>(), Arc::from(type_name), type_name)
    }

    /// Type id of the payload.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Name this category is published and logged under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rust type name, regardless of any custom mapping.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for MessageType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MessageType {}

impl std::hash::Hash for MessageType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageType").field(&self.name).finish()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Last path segment of a type name, without generic arguments.
///
/// `my_app::orders::OrderPlaced` becomes `OrderPlaced`.
pub(crate) fn short_name(type_name: &str) -> &str {
    let base = type_name.split('<').next().unwrap_or(type_name);
    base.rsplit("::").next().unwrap_or(base)
}
