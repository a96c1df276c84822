//! Listener registry and kind resolution.
//!
//! The registry owns every registered listener (wrapped in its
//! [`ListenerInvoker`]) and caches, per concrete event kind, the ordered list
//! of listeners that apply to it.
//!
//! # Ordering
//!
//! A resolved list is sorted by `(is_async, priority)`: sync listeners come
//! before async ones, then ascending priority. The sort is stable, so equal
//! keys keep registration order.
//!
//! # Cache invalidation
//!
//! Any write (register or unregister) clears the whole cache. A kind's list
//! depends on the whole hierarchy, so clearing only the affected kind would
//! leave stale entries for its subkinds.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use ember_core::EventKind;

use crate::error::{RegistrationError, RegistrationResult};
use crate::invoker::ListenerInvoker;
use crate::listener::EventListener;

/// An ordered, shareable list of resolved listeners.
pub type ResolvedListeners = Arc<[Arc<ListenerInvoker>]>;

#[derive(Default)]
struct RegistryState {
    /// Registration order.
    listeners: Vec<Arc<ListenerInvoker>>,
    cache: HashMap<EventKind, ResolvedListeners>,
}

impl RegistryState {
    fn invalidate(&mut self) {
        if !self.cache.is_empty() {
            trace!(entries = self.cache.len(), "Clearing resolution cache");
            self.cache.clear();
        }
    }
}

/// Owns registered listeners and resolves them per event kind.
#[derive(Default)]
pub struct ListenerRegistry {
    state: RwLock<RegistryState>,
    scans: AtomicUsize,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `invoker`.
    ///
    /// Fails without modifying the registry if the ID is already taken.
    pub fn register(&self, invoker: Arc<ListenerInvoker>) -> RegistrationResult<()> {
        let mut state = self.state.write();
        if state.listeners.iter().any(|l| l.id() == invoker.id()) {
            return Err(RegistrationError::DuplicateId {
                id: invoker.id().to_string(),
            });
        }
        info!(
            listener = %invoker.id(),
            priority = invoker.priority(),
            is_async = invoker.is_async(),
            "Listener registered"
        );
        state.listeners.push(invoker);
        state.invalidate();
        Ok(())
    }

    /// Removes the listener with the given ID.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn EventListener>> {
        let mut state = self.state.write();
        let pos = state.listeners.iter().position(|l| l.id() == id)?;
        let removed = state.listeners.remove(pos);
        state.invalidate();
        info!(listener = %id, "Listener unregistered");
        Some(Arc::clone(removed.listener()))
    }

    /// Removes every listener for which `predicate` returns `true`.
    pub fn unregister_by<P>(&self, predicate: P) -> Vec<Arc<dyn EventListener>>
    where
        P: Fn(&dyn EventListener) -> bool,
    {
        let mut state = self.state.write();
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.listeners)
            .into_iter()
            .partition(|l| predicate(l.listener().as_ref()));
        state.listeners = kept;
        if removed.is_empty() {
            return Vec::new();
        }
        state.invalidate();
        for invoker in &removed {
            info!(listener = %invoker.id(), "Listener unregistered");
        }
        removed.iter().map(|l| Arc::clone(l.listener())).collect()
    }

    /// Removes `invoker` if it is still registered.
    fn unregister_exact(&self, invoker: &Weak<ListenerInvoker>) -> Option<Arc<dyn EventListener>> {
        let mut state = self.state.write();
        let pos = state
            .listeners
            .iter()
            .position(|l| Arc::as_ptr(l) == invoker.as_ptr())?;
        let removed = state.listeners.remove(pos);
        state.invalidate();
        info!(listener = %removed.id(), "Listener unregistered");
        Some(Arc::clone(removed.listener()))
    }

    fn is_registered(&self, invoker: &Weak<ListenerInvoker>) -> bool {
        self.state
            .read()
            .listeners
            .iter()
            .any(|l| Arc::as_ptr(l) == invoker.as_ptr())
    }

    /// Returns the listener with the given ID.
    pub fn get(&self, id: &str) -> Option<Arc<dyn EventListener>> {
        self.state
            .read()
            .listeners
            .iter()
            .find(|l| l.id() == id)
            .map(|l| Arc::clone(l.listener()))
    }

    /// Returns the ordered listeners that apply to `kind`.
    pub fn resolve(&self, kind: &EventKind) -> ResolvedListeners {
        if let Some(hit) = self.state.read().cache.get(kind) {
            return Arc::clone(hit);
        }

        let mut state = self.state.write();
        if let Some(hit) = state.cache.get(kind) {
            return Arc::clone(hit);
        }

        self.scans.fetch_add(1, Ordering::Relaxed);
        let mut resolved: Vec<Arc<ListenerInvoker>> = state
            .listeners
            .iter()
            .filter(|l| l.listener().is_target(kind))
            .cloned()
            .collect();
        resolved.sort_by_key(|l| (l.is_async(), l.priority()));
        debug!(kind = %kind, listeners = resolved.len(), "Resolved listeners");

        let resolved: ResolvedListeners = resolved.into();
        state.cache.insert(kind.clone(), Arc::clone(&resolved));
        resolved
    }

    /// Returns `true` if any listener applies to `kind`.
    pub fn contains(&self, kind: &EventKind) -> bool {
        !self.resolve(kind).is_empty()
    }

    /// Returns the registered IDs in registration order.
    pub fn ids(&self) -> Vec<String> {
        self.state
            .read()
            .listeners
            .iter()
            .map(|l| l.id().to_string())
            .collect()
    }

    /// Returns the number of registered listeners.
    pub fn len(&self) -> usize {
        self.state.read().listeners.len()
    }

    /// Returns `true` if no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of full scans performed by [`resolve`](Self::resolve).
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &state.listeners.len())
            .field("cached_kinds", &state.cache.len())
            .finish()
    }
}

// =============================================================================
// ListenerHandle
// =============================================================================

/// Returned by registration; disposes its listener on request.
///
/// The handle tracks the registration it came from, not just the ID: once
/// disposed, it never touches a later listener registered under the same ID.
/// Dropping the handle does **not** unregister the listener.
#[derive(Clone)]
pub struct ListenerHandle {
    id: String,
    invoker: Weak<ListenerInvoker>,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub(crate) fn new(invoker: &Arc<ListenerInvoker>, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id: invoker.id().to_string(),
            invoker: Arc::downgrade(invoker),
            registry: Arc::downgrade(registry),
        }
    }

    /// Returns the listener's ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns `true` while the listener is still registered.
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|r| r.is_registered(&self.invoker))
    }

    /// Unregisters the listener. Returns `None` if it is already gone.
    pub fn dispose(&self) -> Option<Arc<dyn EventListener>> {
        self.registry.upgrade()?.unregister_exact(&self.invoker)
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
