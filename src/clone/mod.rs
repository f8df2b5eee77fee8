//! # Deep cloning of message payloads.
//!
//! The bus hands every subscriber its own copy of a message, so that one handler
//! mutating shared state inside the payload (`Arc<Mutex<_>>`, ...) can never be seen by
//! another handler. [`Clone`] is not enough for that: cloning an `Arc` shares the
//! allocation. [`DeepClone`] copies through `Arc` boundaries instead.
//!
//! ## Architecture
//! ```text
//! value.deep_clone()
//!   └─► deep_clone_with(&mut CloneContext)
//!         ├─ plain values   → Clone (deep_clone_via_clone!)
//!         ├─ containers     → element-wise deep_clone_with
//!         └─ Arc<T>         → seen-map lookup by allocation address
//!                               ├─ hit  → Arc::clone(copy)       (sharing preserved)
//!                               └─ miss → T::deep_clone_arc(..)  (copy, then remember)
//!                                           Mutex/RwLock: remember an empty shell first,
//!                                           fill it afterwards (cycles terminate)
//! ```
//!
//! ## Rules
//! - Two `Arc`s pointing at one allocation in the source point at one allocation in the copy.
//! - Nothing in the copy is shared with the source, except immutable `Arc<str>`.
//! - Reference cycles are supported only through `Arc<Mutex<T>>` / `Arc<RwLock<T>>`
//!   with `T: Default` (the shell); any other cycle cannot be built safely anyway.
//!
//! ## Example
//! ```
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use taskbus::{CloneContext, DeepClone};
//!
//! #[derive(Debug, Default)]
//! struct Order {
//!     id: u64,
//!     lines: Arc<Mutex<Vec<String>>>,
//! }
//!
//! impl DeepClone for Order {
//!     fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
//!         Order {
//!             id: self.id,
//!             lines: self.lines.deep_clone_with(cx),
//!         }
//!     }
//! }
//!
//! let order = Order { id: 1, lines: Arc::new(Mutex::new(vec!["a".into()])) };
//! let copy = order.deep_clone();
//! copy.lines.lock().push("b".into());
//! assert_eq!(order.lines.lock().len(), 1);
//! ```

mod impls;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity-keyed memory of copies made during one deep clone.
///
/// Keys are `(allocation address, type)`; values are the copied `Arc`s.
#[derive(Default)]
pub struct CloneContext {
    seen: HashMap<(usize, TypeId), Box<dyn Any>>,
}

impl CloneContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the copy already made for `source`, if any.
    pub fn lookup<T: 'static>(&self, source: &Arc<T>) -> Option<Arc<T>> {
        self.seen
            .get(&Self::key(source))
            .and_then(|copy| copy.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Records `copy` as the copy of `source`.
    pub fn remember<T: 'static>(&mut self, source: &Arc<T>, copy: &Arc<T>) {
        self.seen.insert(Self::key(source), Box::new(Arc::clone(copy)));
    }

    /// Number of distinct `Arc` allocations copied so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if no `Arc` was copied yet.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn key<T: 'static>(source: &Arc<T>) -> (usize, TypeId) {
        (Arc::as_ptr(source) as *const () as usize, TypeId::of::<T>())
    }
}

impl fmt::Debug for CloneContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneContext")
            .field("seen", &self.seen.len())
            .finish()
    }
}

/// A value that can be copied without sharing anything with the original.
///
/// Implement [`deep_clone_with`](Self::deep_clone_with) by deep-cloning every field
/// with the same context. Plain `Clone` types can use [`deep_clone_via_clone!`](crate::deep_clone_via_clone).
pub trait DeepClone: Sized {
    /// Copies `self`, recording shared allocations in `cx`.
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self;

    /// Copies `self` with a fresh context.
    fn deep_clone(&self) -> Self {
        self.deep_clone_with(&mut CloneContext::new())
    }

    /// Copies a value that lives behind an `Arc` which `cx` has not seen yet.
    ///
    /// The default copies the value, then records the copy. Interior-mutable wrappers
    /// override it to record an empty shell **before** descending, which is what lets
    /// cycles terminate.
    fn deep_clone_arc(source: &Arc<Self>, cx: &mut CloneContext) -> Arc<Self>
    where
        Self: 'static,
    {
        let copy = Arc::new(source.as_ref().deep_clone_with(cx));
        cx.remember(source, &copy);
        copy
    }
}

/// Implements [`DeepClone`] through [`Clone`] for types that own no shared state.
///
/// ```
/// use taskbus::{deep_clone_via_clone, DeepClone};
///
/// #[derive(Clone, Debug, PartialEq)]
/// enum Priority { Low, High }
///
/// deep_clone_via_clone!(Priority);
/// assert_eq!(Priority::High.deep_clone(), Priority::High);
/// ```
#[macro_export]
macro_rules! deep_clone_via_clone {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::DeepClone for $ty {
                #[inline]
                fn deep_clone_with(&self, _cx: &mut $crate::CloneContext) -> Self {
                    ::std::clone::Clone::clone(self)
                }
            }
        )+
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct Node {
        name: String,
        next: Option<Arc<Mutex<Node>>>,
    }

    impl DeepClone for Node {
        fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
            Node {
                name: self.name.deep_clone_with(cx),
                next: self.next.deep_clone_with(cx),
            }
        }
    }

    #[test]
    fn test_nested_containers_are_independent() {
        let mut source: HashMap<String, Vec<Arc<Mutex<u32>>>> = HashMap::new();
        source.insert("a".into(), vec![Arc::new(Mutex::new(1))]);

        let copy = source.deep_clone();
        *copy["a"][0].lock() = 99;

        assert_eq!(*source["a"][0].lock(), 1);
        assert_eq!(*copy["a"][0].lock(), 99);
    }

    #[test]
    fn test_shared_arc_stays_shared_within_copy() {
        let shared = Arc::new(Mutex::new(String::from("x")));
        let source = (Arc::clone(&shared), Arc::clone(&shared), 7_u8);

        let mut cx = CloneContext::new();
        let copy = source.deep_clone_with(&mut cx);

        assert!(Arc::ptr_eq(&copy.0, &copy.1));
        assert!(!Arc::ptr_eq(&copy.0, &shared));
        assert_eq!(cx.len(), 1);

        copy.0.lock().push('y');
        assert_eq!(*copy.1.lock(), "xy");
        assert_eq!(*shared.lock(), "x");
    }

    #[test]
    fn test_cycle_through_mutex_is_reproduced() {
        let a = Arc::new(Mutex::new(Node {
            name: "a".into(),
            next: None,
        }));
        let b = Arc::new(Mutex::new(Node {
            name: "b".into(),
            next: Some(Arc::clone(&a)),
        }));
        a.lock().next = Some(Arc::clone(&b));

        let copy_a = a.deep_clone();
        assert!(!Arc::ptr_eq(&copy_a, &a));

        let copy_b = copy_a.lock().next.clone().unwrap();
        assert_eq!(copy_b.lock().name, "b");
        assert!(!Arc::ptr_eq(&copy_b, &b));

        let back = copy_b.lock().next.clone().unwrap();
        assert!(Arc::ptr_eq(&back, &copy_a));

        // Break both cycles so the test does not leak.
        a.lock().next = None;
        copy_a.lock().next = None;
    }

    #[test]
    fn test_via_clone_macro() {
        #[derive(Clone, Debug, PartialEq)]
        struct Plain(u32, String);
        deep_clone_via_clone!(Plain);

        let p = Plain(3, "x".into());
        assert_eq!(p.deep_clone(), p);
    }
}
