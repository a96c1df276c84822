//! Type-safe heterogeneous attribute storage.
//!
//! An [`Attribute<T>`] is a `(name, type)` pair used as a map key. Two
//! attributes are equal when both the name and the value type match, while the
//! hash only covers the name. Independently constructed attributes with the
//! same name and type therefore address the same slot:
//!
//! ```rust,ignore
//! use ember_core::{Attribute, AttributeMap};
//!
//! let map = AttributeMap::new();
//! map.put(&Attribute::<u32>::new("count"), 1)?;
//!
//! let again = Attribute::<u32>::new("count");
//! assert_eq!(map.get(&again)?.as_deref(), Some(&1));
//! ```
//!
//! Values are stored type-erased and cast back on read. A stored value that
//! does not match the requested type is reported as
//! [`AttributeError::TypeMismatch`] instead of being coerced.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{AttributeError, AttributeResult};

/// A type-erased attribute value.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

// ============================================================================
// AttributeKey
// ============================================================================

/// The type-erased identity of an [`Attribute`].
#[derive(Clone)]
pub struct AttributeKey {
    name: Cow<'static, str>,
    type_id: TypeId,
    type_name: &'static str,
}

impl AttributeKey {
    /// Creates the key for a value of type `T` stored under `name`.
    pub fn of<T: 'static>(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns the attribute name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the declared value type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl PartialEq for AttributeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for AttributeKey {}

impl Hash for AttributeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Debug for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name)
    }
}

// ============================================================================
// Attribute<T>
// ============================================================================

/// A typed key into an [`AttributeMap`].
pub struct Attribute<T> {
    key: AttributeKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Attribute<T> {
    /// Creates an attribute named `name` holding values of type `T`.
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            key: AttributeKey::of::<T>(name),
            _marker: PhantomData,
        }
    }

    /// Returns the attribute name.
    pub fn name(&self) -> &str {
        self.key.name()
    }

    /// Returns the type-erased key.
    pub fn key(&self) -> &AttributeKey {
        &self.key
    }
}

impl<T> Clone for Attribute<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> PartialEq for Attribute<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Attribute<T> {}

impl<T> Hash for Attribute<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for Attribute<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Attribute").field(&self.key).finish()
    }
}

// ============================================================================
// AttributeMap
// ============================================================================

/// An internally synchronized map from attributes to values.
///
/// Reads take a shared lock and writes an exclusive one, so the map can be
/// shared across tasks without external locking. Closures passed to the
/// `compute_*` and `merge` operations run while the write lock is held and
/// must not access the same map.
#[derive(Default)]
pub struct AttributeMap {
    entries: RwLock<HashMap<AttributeKey, ErasedValue>>,
}

impl AttributeMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored for `attribute`, if any.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        attribute: &Attribute<T>,
    ) -> AttributeResult<Option<Arc<T>>> {
        let entries = self.entries.read();
        entries
            .get(&attribute.key)
            .map(|value| cast(&attribute.key, value.clone()))
            .transpose()
    }

    /// Returns `true` if a value is stored for `attribute`.
    pub fn contains<T: Send + Sync + 'static>(&self, attribute: &Attribute<T>) -> bool {
        self.entries.read().contains_key(&attribute.key)
    }

    /// Stores `value`, returning the previous value.
    pub fn put<T: Send + Sync + 'static>(
        &self,
        attribute: &Attribute<T>,
        value: T,
    ) -> AttributeResult<Option<Arc<T>>> {
        let previous = self
            .entries
            .write()
            .insert(attribute.key.clone(), Arc::new(value));
        previous.map(|v| cast(&attribute.key, v)).transpose()
    }

    /// Removes and returns the value stored for `attribute`.
    pub fn remove<T: Send + Sync + 'static>(
        &self,
        attribute: &Attribute<T>,
    ) -> AttributeResult<Option<Arc<T>>> {
        let previous = self.entries.write().remove(&attribute.key);
        previous.map(|v| cast(&attribute.key, v)).transpose()
    }

    /// Returns the stored value, computing and storing one first if absent.
    pub fn compute_if_absent<T, F>(&self, attribute: &Attribute<T>, f: F) -> AttributeResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let mut entries = self.entries.write();
        if let Some(existing) = entries.get(&attribute.key) {
            return cast(&attribute.key, existing.clone());
        }
        let value = Arc::new(f());
        entries.insert(attribute.key.clone(), value.clone());
        Ok(value)
    }

    /// Replaces a present value with `f(old)`; `None` removes the entry.
    ///
    /// Returns the new value, or `None` if nothing was stored afterwards.
    pub fn compute_if_present<T, F>(
        &self,
        attribute: &Attribute<T>,
        f: F,
    ) -> AttributeResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> Option<T>,
    {
        let mut entries = self.entries.write();
        let Some(existing) = entries.get(&attribute.key) else {
            return Ok(None);
        };
        let old = cast(&attribute.key, existing.clone())?;
        Ok(replace(&mut entries, &attribute.key, f(&old)))
    }

    /// Combines `value` with the present value via `combiner`.
    ///
    /// When nothing is stored this behaves like [`put`](Self::put). A combiner
    /// returning `None` removes the entry.
    pub fn merge<T, F>(
        &self,
        attribute: &Attribute<T>,
        value: T,
        combiner: F,
    ) -> AttributeResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T, T) -> Option<T>,
    {
        let mut entries = self.entries.write();
        let merged = match entries.get(&attribute.key) {
            Some(existing) => {
                let old = cast(&attribute.key, existing.clone())?;
                combiner(&old, value)
            }
            None => Some(value),
        };
        Ok(replace(&mut entries, &attribute.key, merged))
    }

    /// Stores an already type-erased value under `key`.
    ///
    /// The value is not checked against the key's declared type; a mismatch
    /// surfaces on the next typed read.
    pub fn put_erased(&self, key: AttributeKey, value: ErasedValue) -> Option<ErasedValue> {
        self.entries.write().insert(key, value)
    }

    /// Returns the keys currently stored.
    pub fn keys(&self) -> Vec<AttributeKey> {
        self.entries.read().keys().cloned().collect()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for AttributeMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.read().keys()).finish()
    }
}

fn cast<T: Send + Sync + 'static>(key: &AttributeKey, value: ErasedValue) -> AttributeResult<Arc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| AttributeError::type_mismatch(key.name(), std::any::type_name::<T>()))
}

fn replace<T: Send + Sync + 'static>(
    entries: &mut HashMap<AttributeKey, ErasedValue>,
    key: &AttributeKey,
    value: Option<T>,
) -> Option<Arc<T>> {
    match value {
        Some(value) => {
            let value = Arc::new(value);
            entries.insert(key.clone(), value.clone());
            Some(value)
        }
        None => {
            entries.remove(key);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_attributes_share_state() {
        let map = AttributeMap::new();
        map.put(&Attribute::<String>::new("greeting"), "hi".to_string())
            .unwrap();

        let same = Attribute::<String>::new("greeting");
        assert_eq!(map.get(&same).unwrap().as_deref(), Some(&"hi".to_string()));
    }

    #[test]
    fn test_same_name_different_type_is_distinct() {
        let map = AttributeMap::new();
        let as_int = Attribute::<i64>::new("value");
        let as_text = Attribute::<String>::new("value");

        map.put(&as_int, 7).unwrap();
        map.put(&as_text, "seven".to_string()).unwrap();

        assert_ne!(as_int.key(), as_text.key());
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&as_int).unwrap().as_deref(), Some(&7));
    }

    #[test]
    fn test_put_returns_previous() {
        let map = AttributeMap::new();
        let attr = Attribute::<u8>::new("n");
        assert!(map.put(&attr, 1).unwrap().is_none());
        assert_eq!(map.put(&attr, 2).unwrap().as_deref(), Some(&1));
        assert_eq!(map.remove(&attr).unwrap().as_deref(), Some(&2));
        assert!(!map.contains(&attr));
    }

    #[test]
    fn test_compute_if_absent_only_computes_once() {
        let map = AttributeMap::new();
        let attr = Attribute::<Vec<u32>>::new("list");
        let first = map.compute_if_absent(&attr, || vec![1]).unwrap();
        let second = map.compute_if_absent(&attr, || vec![2]).unwrap();
        assert_eq!(*first, vec![1]);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_compute_if_present_can_remove() {
        let map = AttributeMap::new();
        let attr = Attribute::<u32>::new("hits");

        assert!(map.compute_if_present(&attr, |v| Some(v + 1)).unwrap().is_none());
        assert!(!map.contains(&attr));

        map.put(&attr, 1).unwrap();
        let updated = map.compute_if_present(&attr, |v| Some(v + 1)).unwrap();
        assert_eq!(updated.as_deref(), Some(&2));

        assert!(map.compute_if_present(&attr, |_| None).unwrap().is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn test_merge_behaves_like_put_when_absent() {
        let map = AttributeMap::new();
        let attr = Attribute::<u32>::new("total");

        let merged = map.merge(&attr, 5, |old, new| Some(old + new)).unwrap();
        assert_eq!(merged.as_deref(), Some(&5));

        let merged = map.merge(&attr, 3, |old, new| Some(old + new)).unwrap();
        assert_eq!(merged.as_deref(), Some(&8));
    }

    #[test]
    fn test_type_mismatch_is_reported() {
        let map = AttributeMap::new();
        let attr = Attribute::<u32>::new("port");
        map.put_erased(attr.key().clone(), Arc::new("not a number"));

        let err = map.get(&attr).unwrap_err();
        assert!(matches!(err, AttributeError::TypeMismatch { ref name, .. } if name == "port"));
        assert!(map.merge(&attr, 1, |a, b| Some(a + b)).is_err());
    }
}
