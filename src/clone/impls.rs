use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use super::{CloneContext, DeepClone};
use crate::deep_clone_via_clone;

deep_clone_via_clone!(
    (),
    bool,
    char,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    f32,
    f64,
    String,
    &'static str,
    Duration,
    std::time::Instant,
    std::time::SystemTime,
    tokio::time::Instant,
    chrono::DateTime<chrono::Utc>,
    uuid::Uuid,
);

// Immutable, so sharing is indistinguishable from copying.
impl DeepClone for Arc<str> {
    fn deep_clone_with(&self, _cx: &mut CloneContext) -> Self {
        Arc::clone(self)
    }
}

impl<T: DeepClone + 'static> DeepClone for Arc<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        match cx.lookup(self) {
            Some(copy) => copy,
            None => T::deep_clone_arc(self, cx),
        }
    }
}

impl<T: DeepClone> DeepClone for Box<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        Box::new(self.as_ref().deep_clone_with(cx))
    }
}

impl<T: DeepClone> DeepClone for Option<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        self.as_ref().map(|v| v.deep_clone_with(cx))
    }
}

impl<T: DeepClone, E: DeepClone> DeepClone for Result<T, E> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        match self {
            Ok(v) => Ok(v.deep_clone_with(cx)),
            Err(e) => Err(e.deep_clone_with(cx)),
        }
    }
}

impl<T: DeepClone> DeepClone for Vec<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        self.iter().map(|v| v.deep_clone_with(cx)).collect()
    }
}

impl<T: DeepClone> DeepClone for VecDeque<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        self.iter().map(|v| v.deep_clone_with(cx)).collect()
    }
}

impl<K, V, S> DeepClone for HashMap<K, V, S>
where
    K: DeepClone + Eq + Hash,
    V: DeepClone,
    S: BuildHasher + Clone,
{
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        let mut copy = HashMap::with_capacity_and_hasher(self.len(), self.hasher().clone());
        for (k, v) in self {
            copy.insert(k.deep_clone_with(cx), v.deep_clone_with(cx));
        }
        copy
    }
}

impl<T, S> DeepClone for HashSet<T, S>
where
    T: DeepClone + Eq + Hash,
    S: BuildHasher + Clone,
{
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        let mut copy = HashSet::with_capacity_and_hasher(self.len(), self.hasher().clone());
        for v in self {
            copy.insert(v.deep_clone_with(cx));
        }
        copy
    }
}

impl<K: DeepClone + Ord, V: DeepClone> DeepClone for BTreeMap<K, V> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        self.iter()
            .map(|(k, v)| (k.deep_clone_with(cx), v.deep_clone_with(cx)))
            .collect()
    }
}

impl<T: DeepClone + Ord> DeepClone for BTreeSet<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        self.iter().map(|v| v.deep_clone_with(cx)).collect()
    }
}

macro_rules! deep_clone_tuple {
    ($($name:ident),+) => {
        impl<$($name: DeepClone),+> DeepClone for ($($name,)+) {
            #[allow(non_snake_case)]
            fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
                let ($($name,)+) = self;
                ($($name.deep_clone_with(cx),)+)
            }
        }
    };
}

deep_clone_tuple!(A);
deep_clone_tuple!(A, B);
deep_clone_tuple!(A, B, C);
deep_clone_tuple!(A, B, C, D);
deep_clone_tuple!(A, B, C, D, E);
deep_clone_tuple!(A, B, C, D, E, F);

impl<T: DeepClone + Default + 'static> DeepClone for parking_lot::Mutex<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        parking_lot::Mutex::new(self.lock().deep_clone_with(cx))
    }

    fn deep_clone_arc(source: &Arc<Self>, cx: &mut CloneContext) -> Arc<Self> {
        let shell = Arc::new(parking_lot::Mutex::new(T::default()));
        cx.remember(source, &shell);
        let value = source.lock().deep_clone_with(cx);
        *shell.lock() = value;
        shell
    }
}

impl<T: DeepClone + Default + 'static> DeepClone for parking_lot::RwLock<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        parking_lot::RwLock::new(self.read().deep_clone_with(cx))
    }

    fn deep_clone_arc(source: &Arc<Self>, cx: &mut CloneContext) -> Arc<Self> {
        let shell = Arc::new(parking_lot::RwLock::new(T::default()));
        cx.remember(source, &shell);
        let value = source.read().deep_clone_with(cx);
        *shell.write() = value;
        shell
    }
}

// A poisoned source is still copied: the data is as consistent as the panicking
// writer left it, and the copy starts unpoisoned.
impl<T: DeepClone + Default + 'static> DeepClone for std::sync::Mutex<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        let guard = self.lock().unwrap_or_else(PoisonError::into_inner);
        std::sync::Mutex::new(guard.deep_clone_with(cx))
    }

    fn deep_clone_arc(source: &Arc<Self>, cx: &mut CloneContext) -> Arc<Self> {
        let shell = Arc::new(std::sync::Mutex::new(T::default()));
        cx.remember(source, &shell);
        let value = source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .deep_clone_with(cx);
        *shell.lock().unwrap_or_else(PoisonError::into_inner) = value;
        shell
    }
}

impl<T: DeepClone + Default + 'static> DeepClone for std::sync::RwLock<T> {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        let guard = self.read().unwrap_or_else(PoisonError::into_inner);
        std::sync::RwLock::new(guard.deep_clone_with(cx))
    }

    fn deep_clone_arc(source: &Arc<Self>, cx: &mut CloneContext) -> Arc<Self> {
        let shell = Arc::new(std::sync::RwLock::new(T::default()));
        cx.remember(source, &shell);
        let value = source
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .deep_clone_with(cx);
        *shell.write().unwrap_or_else(PoisonError::into_inner) = value;
        shell
    }
}
