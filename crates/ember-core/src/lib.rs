//! # Ember Core
//!
//! Foundation types for the Ember event dispatch framework.
//!
//! This crate has no knowledge of listeners or dispatch; it provides the
//! vocabulary the dispatch engine in `ember-framework` is built on:
//!
//! - **Event System**: hierarchical kinds and type-erased events ([`EventKind`], [`Event`], [`BoxedEvent`])
//! - **Attribute Store**: typed heterogeneous storage ([`Attribute`], [`AttributeMap`])
//! - **Scoped Context**: global / instant / session scopes ([`ScopedContext`], [`Scope`])
//! - **Results**: listener outcomes and reactive payloads ([`EventResult`], [`Reactive`])
//!
//! ## Example
//!
//! ```rust,ignore
//! use ember_core::{Event, EventKind, BoxedEvent};
//! use std::any::Any;
//!
//! struct TextMessage {
//!     kind: EventKind,
//!     text: String,
//! }
//!
//! impl Event for TextMessage {
//!     fn kind(&self) -> &EventKind {
//!         &self.kind
//!     }
//!
//!     fn plain_text(&self) -> Option<&str> {
//!         Some(&self.text)
//!     }
//!
//!     fn as_any(&self) -> &dyn Any {
//!         self
//!     }
//! }
//!
//! let message = EventKind::new("MessageEvent", [&EventKind::root("Event")]);
//! let event = BoxedEvent::new(TextMessage { kind: message, text: "hi".into() });
//! ```

pub mod attribute;
pub mod error;
pub mod event;
pub mod result;
pub mod scope;

pub use attribute::{Attribute, AttributeKey, AttributeMap, ErasedValue};
pub use error::{AttributeError, AttributeResult, BoxError};
pub use event::{BoxedEvent, Event, EventKind};
pub use result::{AsyncResult, Content, EventResult, Reactive, ReactiveKind};
pub use scope::{Scope, ScopedContext};

/// Prelude for common imports.
pub mod prelude {
    pub use super::attribute::{Attribute, AttributeMap};
    pub use super::event::{BoxedEvent, Event, EventKind};
    pub use super::result::{EventResult, Reactive};
    pub use super::scope::Scope;
}
