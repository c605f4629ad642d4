//! Typed, insertion-ordered attribute bag attached to every exchange.
//!
//! Keys are tokens minted once (typically in a `static`) with
//! [`AttrKey::new`]. Two keys created with the same name are still distinct,
//! so independent filters cannot clobber each other's state by accident. The
//! value type is carried by the key and checked at the access site.
use std::{
    any::Any,
    fmt,
    marker::PhantomData,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// A unique, typed key into [`Attrs`].
pub struct AttrKey<T> {
    id: u64,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttrKey<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            id: NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed),
            name,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttrKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttrKey<T> {}

impl<T> PartialEq for AttrKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for AttrKey<T> {}

impl<T> fmt::Debug for AttrKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AttrKey({}#{})", self.name, self.id)
    }
}

/// Object-safe view of a stored value.
trait AttrValue: Any + fmt::Debug {
    fn clone_box(&self) -> Box<dyn AttrValue>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn into_any(self: Box<Self>) -> Box<dyn Any>;
}

impl<T> AttrValue for T
where
    T: Any + Clone + fmt::Debug,
{
    fn clone_box(&self) -> Box<dyn AttrValue> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any> {
        self
    }
}

struct Entry {
    id: u64,
    name: &'static str,
    value: Box<dyn AttrValue>,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            name: self.name,
            value: self.value.clone_box(),
        }
    }
}

/// Insertion-ordered attribute storage.
#[derive(Clone, Default)]
pub struct Attrs {
    entries: Vec<Entry>,
}

impl Attrs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `value` under `key`, replacing (in place) any previous value.
    pub fn put<T>(&mut self, key: &AttrKey<T>, value: T)
    where
        T: Any + Clone + fmt::Debug,
    {
        match self.entries.iter_mut().find(|e| e.id == key.id) {
            Some(entry) => entry.value = Box::new(value),
            None => self.entries.push(Entry {
                id: key.id,
                name: key.name,
                value: Box::new(value),
            }),
        }
    }

    pub fn get<T: Any>(&self, key: &AttrKey<T>) -> Option<&T> {
        self.entries
            .iter()
            .find(|e| e.id == key.id)
            .and_then(|e| e.value.as_any().downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &AttrKey<T>) -> Option<&mut T> {
        self.entries
            .iter_mut()
            .find(|e| e.id == key.id)
            .and_then(|e| e.value.as_any_mut().downcast_mut::<T>())
    }

    pub fn get_or_default<T>(&self, key: &AttrKey<T>, default: T) -> T
    where
        T: Any + Clone,
    {
        self.get(key).cloned().unwrap_or(default)
    }

    pub fn remove<T: Any>(&mut self, key: &AttrKey<T>) -> Option<T> {
        let pos = self.entries.iter().position(|e| e.id == key.id)?;
        let entry = self.entries.remove(pos);
        entry.value.into_any().downcast::<T>().ok().map(|boxed| *boxed)
    }

    pub fn contains<T>(&self, key: &AttrKey<T>) -> bool {
        self.entries.iter().any(|e| e.id == key.id)
    }

    /// Key ids in insertion order.
    pub fn key_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(key id, key name, rendered value)` for every entry, in insertion order.
    pub(crate) fn rendered(&self) -> Vec<(u64, &'static str, String)> {
        self.entries
            .iter()
            .map(|e| (e.id, e.name, format!("{:?}", e.value)))
            .collect()
    }
}

impl fmt::Debug for Attrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|e| (e.name, &e.value)))
            .finish()
    }
}
