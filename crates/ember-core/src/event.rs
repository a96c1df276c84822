//! Event system for the Ember framework.
//!
//! This module provides the core event infrastructure:
//!
//! - [`EventKind`] - Hierarchical event type identifier
//! - [`Event`] - Base trait for all events
//! - [`BoxedEvent`] - Type-erased, cheaply cloneable event container
//!
//! # Kind Hierarchy
//!
//! Every event exposes a kind. Kinds form a directed acyclic hierarchy where a
//! kind may declare any number of parents. A listener that targets a parent
//! kind is applicable to every event whose kind *is-a* that parent:
//!
//! ```rust,ignore
//! use ember_core::EventKind;
//!
//! let event = EventKind::root("Event");
//! let message = EventKind::new("MessageEvent", [&event]);
//! let friend = EventKind::new("FriendMessageEvent", [&message]);
//!
//! assert!(friend.is_subkind_of(&event));
//! assert!(!event.is_subkind_of(&friend));
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

// ============================================================================
// Event Kind
// ============================================================================

struct KindNode {
    name: Cow<'static, str>,
    parents: Vec<EventKind>,
}

/// A hierarchical event type identifier.
///
/// Kinds are compared and hashed by name, so two kinds constructed
/// independently under the same name are the same kind. Cloning is cheap.
#[derive(Clone)]
pub struct EventKind {
    node: Arc<KindNode>,
}

impl EventKind {
    /// Creates a kind without parents.
    pub fn root(name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(name, [])
    }

    /// Creates a kind that is a direct subkind of every kind in `parents`.
    pub fn new<'a>(
        name: impl Into<Cow<'static, str>>,
        parents: impl IntoIterator<Item = &'a EventKind>,
    ) -> Self {
        Self {
            node: Arc::new(KindNode {
                name: name.into(),
                parents: parents.into_iter().cloned().collect(),
            }),
        }
    }

    /// Returns the kind's name.
    pub fn name(&self) -> &str {
        &self.node.name
    }

    /// Returns the direct parents of this kind.
    pub fn parents(&self) -> &[EventKind] {
        &self.node.parents
    }

    /// Returns `true` if `self` is `other` or transitively derives from it.
    pub fn is_subkind_of(&self, other: &EventKind) -> bool {
        if self == other {
            return true;
        }
        let mut visited: HashSet<&str> = HashSet::new();
        let mut stack: Vec<&EventKind> = self.node.parents.iter().collect();
        while let Some(kind) = stack.pop() {
            if kind == other {
                return true;
            }
            if visited.insert(kind.name()) {
                stack.extend(kind.node.parents.iter());
            }
        }
        false
    }

    /// Returns this kind followed by every ancestor, each visited once.
    pub fn lineage(&self) -> Vec<EventKind> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();
        let mut stack = vec![self.clone()];
        while let Some(kind) = stack.pop() {
            if !seen.insert(kind.name().to_string()) {
                continue;
            }
            stack.extend(kind.node.parents.iter().rev().cloned());
            out.push(kind);
        }
        out
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.node, &other.node) || self.node.name == other.node.name
    }
}

impl Eq for EventKind {}

impl Hash for EventKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.node.name.hash(state);
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventKind")
            .field("name", &self.name())
            .field(
                "parents",
                &self.parents().iter().map(EventKind::name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

// ============================================================================
// Core Event Trait
// ============================================================================

/// The base trait for all events dispatched through Ember.
///
/// The dispatch core only relies on the event's [`kind`](Event::kind) and,
/// for message-bearing events, its plain text. Everything else is reached by
/// downcasting through [`as_any`](Event::as_any).
pub trait Event: Any + Send + Sync {
    /// Returns the hierarchical kind of this event.
    fn kind(&self) -> &EventKind;

    /// Returns the event's identifier, if the source platform provides one.
    fn id(&self) -> Option<&str> {
        None
    }

    /// Returns the plain text content of a message-bearing event.
    fn plain_text(&self) -> Option<&str> {
        None
    }

    /// Returns a reference to self as `Any` for downcasting.
    fn as_any(&self) -> &dyn Any;
}

// ============================================================================
// Boxed Event
// ============================================================================

/// A type-erased container for events that supports runtime downcasting.
///
/// `BoxedEvent` implements `Deref<Target = dyn Event>`, so trait methods can be
/// called directly:
///
/// ```rust,ignore
/// let event: BoxedEvent = /* ... */;
/// let kind = event.kind();
/// let text = event.plain_text();
/// ```
#[derive(Clone)]
pub struct BoxedEvent {
    inner: Arc<dyn Event>,
}

impl BoxedEvent {
    /// Creates a new `BoxedEvent` from any type implementing `Event`.
    pub fn new<E: Event + 'static>(event: E) -> Self {
        Self {
            inner: Arc::new(event),
        }
    }

    /// Returns the inner `Arc<dyn Event>`.
    pub fn inner(&self) -> &Arc<dyn Event> {
        &self.inner
    }

    /// Attempts to downcast to a concrete event type.
    pub fn downcast_ref<E: Event + 'static>(&self) -> Option<&E> {
        self.inner.as_any().downcast_ref()
    }

    /// Returns `true` if the event's kind is-a `kind`.
    pub fn is(&self, kind: &EventKind) -> bool {
        self.inner.kind().is_subkind_of(kind)
    }
}

impl From<Arc<dyn Event>> for BoxedEvent {
    fn from(inner: Arc<dyn Event>) -> Self {
        Self { inner }
    }
}

impl std::ops::Deref for BoxedEvent {
    type Target = dyn Event;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl fmt::Debug for BoxedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoxedEvent")
            .field("kind", &self.kind().name())
            .field("id", &self.id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping {
        kind: EventKind,
    }

    impl Event for Ping {
        fn kind(&self) -> &EventKind {
            &self.kind
        }

        fn plain_text(&self) -> Option<&str> {
            Some("ping")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn test_subkind_is_reflexive_and_transitive() {
        let root = EventKind::root("Event");
        let message = EventKind::new("MessageEvent", [&root]);
        let group = EventKind::new("GroupMessageEvent", [&message]);

        assert!(root.is_subkind_of(&root));
        assert!(group.is_subkind_of(&message));
        assert!(group.is_subkind_of(&root));
        assert!(!message.is_subkind_of(&group));
    }

    #[test]
    fn test_multiple_parents() {
        let root = EventKind::root("Event");
        let message = EventKind::new("MessageEvent", [&root]);
        let member = EventKind::new("MemberEvent", [&root]);
        let member_message = EventKind::new("MemberMessageEvent", [&message, &member]);

        assert!(member_message.is_subkind_of(&member));
        assert!(member_message.is_subkind_of(&message));

        let names: Vec<String> = member_message
            .lineage()
            .iter()
            .map(|k| k.name().to_string())
            .collect();
        assert_eq!(names.first().map(String::as_str), Some("MemberMessageEvent"));
        assert_eq!(names.iter().filter(|n| *n == "Event").count(), 1);
        assert_eq!(names.len(), 4);
    }

    #[test]
    fn test_kinds_compare_by_name() {
        let a = EventKind::root("Notice");
        let b = EventKind::root("Notice");
        assert_eq!(a, b);
        assert_ne!(a, EventKind::root("Request"));
    }

    #[test]
    fn test_boxed_event_downcast() {
        let kind = EventKind::root("Ping");
        let event = BoxedEvent::new(Ping { kind: kind.clone() });

        assert!(event.is(&kind));
        assert_eq!(event.plain_text(), Some("ping"));
        assert!(event.downcast_ref::<Ping>().is_some());
    }
}
