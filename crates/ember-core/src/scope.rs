//! Scoped attribute context.
//!
//! A [`ScopedContext`] is created for every pushed event and gives access to
//! three [`AttributeMap`]s:
//!
//! | Scope | Lifetime | Backing store |
//! |---|---|---|
//! | [`Scope::Global`] | whole process | shared singleton owned by the manager |
//! | [`Scope::Instant`] | one event | allocated lazily on first write, dropped with the context |
//! | [`Scope::Session`] | whole process | shared singleton backing continuous sessions |
//!
//! Reads from an Instant scope that was never written do not allocate.

use std::fmt;
use std::sync::{Arc, OnceLock};

use tracing::trace;

use crate::attribute::{Attribute, AttributeMap};
use crate::error::AttributeResult;

/// The named scopes of a [`ScopedContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Process-lifetime storage shared by every event.
    Global,
    /// Storage private to the event currently being processed.
    Instant,
    /// Long-lived storage shared by continuous sessions.
    Session,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Global => "global",
            Self::Instant => "instant",
            Self::Session => "session",
        })
    }
}

/// Three-scope attribute context for one event.
pub struct ScopedContext {
    global: Arc<AttributeMap>,
    session: Arc<AttributeMap>,
    instant: OnceLock<AttributeMap>,
}

impl ScopedContext {
    /// Creates a context over the given long-lived stores.
    pub fn new(global: Arc<AttributeMap>, session: Arc<AttributeMap>) -> Self {
        Self {
            global,
            session,
            instant: OnceLock::new(),
        }
    }

    /// Creates a context with fresh, unshared stores.
    pub fn detached() -> Self {
        Self::new(Arc::default(), Arc::default())
    }

    /// Returns the store backing `scope`, if it exists yet.
    ///
    /// The Instant store is only returned once something has been written.
    pub fn store(&self, scope: Scope) -> Option<&AttributeMap> {
        match scope {
            Scope::Global => Some(self.global.as_ref()),
            Scope::Session => Some(self.session.as_ref()),
            Scope::Instant => self.instant.get(),
        }
    }

    fn store_mut(&self, scope: Scope) -> &AttributeMap {
        match scope {
            Scope::Global => self.global.as_ref(),
            Scope::Session => self.session.as_ref(),
            Scope::Instant => self.instant.get_or_init(|| {
                trace!("Allocating instant scope store");
                AttributeMap::new()
            }),
        }
    }

    /// Returns `true` if the Instant store has been allocated.
    pub fn has_instant(&self) -> bool {
        self.instant.get().is_some()
    }

    /// Reads `attribute` from `scope`.
    pub fn get<T: Send + Sync + 'static>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
    ) -> AttributeResult<Option<Arc<T>>> {
        match self.store(scope) {
            Some(store) => store.get(attribute),
            None => Ok(None),
        }
    }

    /// Returns `true` if `scope` holds a value for `attribute`.
    pub fn contains<T: Send + Sync + 'static>(&self, scope: Scope, attribute: &Attribute<T>) -> bool {
        self.store(scope).is_some_and(|s| s.contains(attribute))
    }

    /// Writes `value` into `scope`, returning the previous value.
    pub fn put<T: Send + Sync + 'static>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
        value: T,
    ) -> AttributeResult<Option<Arc<T>>> {
        self.store_mut(scope).put(attribute, value)
    }

    /// Removes `attribute` from `scope`.
    pub fn remove<T: Send + Sync + 'static>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
    ) -> AttributeResult<Option<Arc<T>>> {
        match self.store(scope) {
            Some(store) => store.remove(attribute),
            None => Ok(None),
        }
    }

    /// See [`AttributeMap::compute_if_absent`].
    pub fn compute_if_absent<T, F>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
        f: F,
    ) -> AttributeResult<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.store_mut(scope).compute_if_absent(attribute, f)
    }

    /// See [`AttributeMap::compute_if_present`].
    pub fn compute_if_present<T, F>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
        f: F,
    ) -> AttributeResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T) -> Option<T>,
    {
        match self.store(scope) {
            Some(store) => store.compute_if_present(attribute, f),
            None => Ok(None),
        }
    }

    /// See [`AttributeMap::merge`].
    pub fn merge<T, F>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
        value: T,
        combiner: F,
    ) -> AttributeResult<Option<Arc<T>>>
    where
        T: Send + Sync + 'static,
        F: FnOnce(&T, T) -> Option<T>,
    {
        self.store_mut(scope).merge(attribute, value, combiner)
    }
}

impl fmt::Debug for ScopedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedContext")
            .field("global", &self.global.len())
            .field("session", &self.session.len())
            .field("instant", &self.instant.get().map(AttributeMap::len))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instant_is_lazy() {
        let ctx = ScopedContext::detached();
        let attr = Attribute::<u32>::new("seen");

        assert!(ctx.get(Scope::Instant, &attr).unwrap().is_none());
        assert!(ctx.remove(Scope::Instant, &attr).unwrap().is_none());
        assert!(!ctx.has_instant());

        ctx.put(Scope::Instant, &attr, 1).unwrap();
        assert!(ctx.has_instant());
        assert_eq!(ctx.get(Scope::Instant, &attr).unwrap().as_deref(), Some(&1));
    }

    #[test]
    fn test_global_survives_across_contexts() {
        let global = Arc::new(AttributeMap::new());
        let session = Arc::new(AttributeMap::new());
        let attr = Attribute::<String>::new("owner");

        let first = ScopedContext::new(global.clone(), session.clone());
        first.put(Scope::Global, &attr, "ember".to_string()).unwrap();
        first.put(Scope::Instant, &attr, "one-shot".to_string()).unwrap();
        drop(first);

        let second = ScopedContext::new(global, session);
        assert_eq!(
            second.get(Scope::Global, &attr).unwrap().as_deref().map(String::as_str),
            Some("ember")
        );
        assert!(second.get(Scope::Instant, &attr).unwrap().is_none());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let ctx = ScopedContext::detached();
        let attr = Attribute::<u8>::new("level");
        ctx.put(Scope::Session, &attr, 3).unwrap();

        assert!(ctx.contains(Scope::Session, &attr));
        assert!(!ctx.contains(Scope::Global, &attr));
        assert!(!ctx.contains(Scope::Instant, &attr));
    }
}
