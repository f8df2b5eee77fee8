//! # Message type registry.
//!
//! Resolves names for message types and decides which subscriber types accept which
//! published types.
//!
//! ## Covariance without reflection
//! Specialization is declared explicitly with upcast edges (`Derived → Base`, backed by
//! `Base: From<Derived>`). A subscriber for `Base` accepts `Derived` when a chain of edges
//! leads from one to the other:
//!
//! ```text
//! published: PaymentCaptured ──► PaymentEvent ──► DomainEvent
//!                                     ▲                 ▲
//!                     subscriber<PaymentEvent>   subscriber<DomainEvent>
//! ```
//!
//! The chain (a [`Route`]) is found by breadth-first search, so the shortest conversion
//! wins. Subscribers cache the result per observed type.

use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use super::message::{Message, MessageType};
use crate::error::BusError;

/// One type-erased conversion step.
pub(crate) type ConvertFn = Arc<dyn Fn(Box<dyn Any + Send>) -> Box<dyn Any + Send> + Send + Sync>;

/// Declared specialization `from → to`.
#[derive(Clone)]
pub(crate) struct Upcast {
    from: TypeId,
    to: TypeId,
    convert: ConvertFn,
}

impl Upcast {
    pub(crate) fn new<D: Message, B: Message + From<D>>() -> Self {
        Self {
            from: TypeId::of::<D>(),
            to: TypeId::of::<B>(),
            convert: Arc::new(|value: Box<dyn Any + Send>| match value.downcast::<D>() {
                Ok(derived) => Box::new(B::from(*derived)) as Box<dyn Any + Send>,
                Err(other) => other,
            }),
        }
    }
}

/// Conversion chain from a published type to a subscriber's type.
///
/// Empty for an exact match.
#[derive(Clone)]
pub(crate) struct Route {
    steps: Arc<[ConvertFn]>,
}

impl Route {
    pub(crate) fn identity() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.steps.len()
    }

    pub(crate) fn apply(&self, value: Box<dyn Any + Send>) -> Box<dyn Any + Send> {
        self.steps.iter().fold(value, |value, step| step(value))
    }
}

impl Default for Route {
    fn default() -> Self {
        Self {
            steps: Arc::from(Vec::new()),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("steps", &self.len()).finish()
    }
}

/// Names and specializations known to one bus.
pub(crate) struct TypeRegistry {
    names: HashMap<TypeId, Arc<str>>,
    by_name: DashMap<Arc<str>, (TypeId, &'static str)>,
    upcasts: HashMap<TypeId, Vec<Upcast>>,
}

impl TypeRegistry {
    pub(crate) fn new(
        names: Vec<(TypeId, &'static str, Arc<str>)>,
        upcasts: Vec<Upcast>,
    ) -> Self {
        let by_name = DashMap::new();
        let mut mapped = HashMap::new();
        for (id, type_name, name) in names {
            by_name.insert(Arc::clone(&name), (id, type_name));
            mapped.insert(id, name);
        }

        let mut edges: HashMap<TypeId, Vec<Upcast>> = HashMap::new();
        for upcast in upcasts {
            edges.entry(upcast.from).or_default().push(upcast);
        }

        Self {
            names: mapped,
            by_name,
            upcasts: edges,
        }
    }

    /// Category of `T`, registering its name for lookups by name.
    pub(crate) fn message_type<T: Message>(&self) -> MessageType {
        let id = TypeId::of::<T>();
        let type_name = std::any::type_name::<T>();
        let name = self
            .names
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Arc::from(type_name));
        if !self.by_name.contains_key(&name) {
            self.by_name.insert(Arc::clone(&name), (id, type_name));
        }
        MessageType::new(id, name, type_name)
    }

    /// Category registered under `name`, checked against the payload type `T`.
    pub(crate) fn resolve_named<T: Message>(&self, name: &str) -> Result<MessageType, BusError> {
        let (id, type_name) = match self.by_name.get(name) {
            Some(entry) => *entry.value(),
            None => {
                return Err(BusError::UnknownMessageType {
                    name: name.to_string(),
                });
            }
        };
        if id != TypeId::of::<T>() {
            return Err(BusError::TypeMismatch {
                name: name.to_string(),
                expected: type_name,
                found: std::any::type_name::<T>(),
            });
        }
        Ok(self.message_type::<T>())
    }

    /// Shortest conversion chain turning `from` into `to`, if any.
    pub(crate) fn route(&self, from: TypeId, to: TypeId) -> Option<Route> {
        if from == to {
            return Some(Route::identity());
        }

        let mut visited = HashSet::from([from]);
        let mut queue = VecDeque::from([from]);
        let mut came_from: HashMap<TypeId, (TypeId, ConvertFn)> = HashMap::new();

        while let Some(current) = queue.pop_front() {
            for edge in self.upcasts.get(&current).into_iter().flatten() {
                if !visited.insert(edge.to) {
                    continue;
                }
                came_from.insert(edge.to, (current, Arc::clone(&edge.convert)));
                if edge.to == to {
                    let mut steps = Vec::new();
                    let mut at = to;
                    while let Some((prev, convert)) = came_from.get(&at) {
                        steps.push(Arc::clone(convert));
                        at = *prev;
                    }
                    steps.reverse();
                    return Some(Route {
                        steps: Arc::from(steps),
                    });
                }
                queue.push_back(edge.to);
            }
        }
        None
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("names", &self.by_name.len())
            .field("upcasts", &self.upcasts.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Captured(u32);
    #[derive(Clone, Debug, PartialEq)]
    struct Payment(u32);
    #[derive(Clone, Debug, PartialEq)]
    struct Domain(String);
    crate::deep_clone_via_clone!(Captured, Payment, Domain);

    impl From<Captured> for Payment {
        fn from(c: Captured) -> Self {
            Payment(c.0)
        }
    }

    impl From<Payment> for Domain {
        fn from(p: Payment) -> Self {
            Domain(format!("payment {}", p.0))
        }
    }

    fn registry() -> TypeRegistry {
        TypeRegistry::new(
            vec![(
                TypeId::of::<Payment>(),
                std::any::type_name::<Payment>(),
                Arc::from("payment"),
            )],
            vec![
                Upcast::new::<Captured, Payment>(),
                Upcast::new::<Payment, Domain>(),
            ],
        )
    }

    #[test]
    fn test_transitive_route_converts() {
        let registry = registry();
        let route = registry
            .route(TypeId::of::<Captured>(), TypeId::of::<Domain>())
            .unwrap();
        assert_eq!(route.len(), 2);

        let out = route.apply(Box::new(Captured(9)));
        assert_eq!(out.downcast_ref::<Domain>(), Some(&Domain("payment 9".into())));
    }

    #[test]
    fn test_no_route_towards_specialization() {
        let registry = registry();
        assert!(registry
            .route(TypeId::of::<Domain>(), TypeId::of::<Captured>())
            .is_none());
        assert_eq!(
            registry
                .route(TypeId::of::<Payment>(), TypeId::of::<Payment>())
                .map(|r| r.len()),
            Some(0)
        );
    }

    #[test]
    fn test_named_resolution() {
        let registry = registry();
        assert_eq!(registry.message_type::<Payment>().name(), "payment");

        assert!(registry.resolve_named::<Payment>("payment").is_ok());
        assert_eq!(
            registry.resolve_named::<Payment>("nope").unwrap_err().as_label(),
            "bus_unknown_message_type"
        );
        assert_eq!(
            registry.resolve_named::<Captured>("payment").unwrap_err().as_label(),
            "bus_type_mismatch"
        );

        // Default names become resolvable once the type was seen.
        let captured = registry.message_type::<Captured>();
        assert!(registry.resolve_named::<Captured>(captured.name()).is_ok());
    }
}
