//! # Ember Framework
//!
//! The event dispatch engine of Ember.
//!
//! ## Architecture
//!
//! ```text
//! push(event)
//!   ├─► ContinuousSessions::offer ── consumed? ──► ProcessingResult (empty)
//!   └─► ListenerRegistry::resolve(kind)
//!         └─► process interceptors ─► for each listener:
//!               Default interceptors ─► match ─► AfterMatch interceptors ─► invoke
//!               ─► ResultNormalizer ─► append / truncate
//! ```
//!
//! - **Listeners**: [`EventListener`], [`FnListener`], [`ServiceListener`]
//! - **Interceptors**: [`ProcessingInterceptor`], [`ListenerInterceptor`] at a [`ListenerPoint`]
//! - **Registry**: [`ListenerRegistry`] with a per-kind resolution cache
//! - **Sessions**: [`ContinuousSessions`], "wait for the next matching event"
//! - **Normalization**: [`ResultNormalizer`] for [`Reactive`](ember_core::Reactive) payloads
//! - **Dispatch**: [`EventListenerManager`] and its [`ProcessingResult`]

pub mod context;
pub mod error;
pub mod interceptor;
pub mod invoker;
pub mod listener;
pub mod manager;
pub mod normalizer;
pub mod registry;
pub mod session;

// Implementing the listener and interceptor traits requires `#[async_trait]`.
pub use async_trait::async_trait;

pub use context::{ListenerContext, ProcessingContext};
pub use error::{
    BuildError, DispatchError, DispatchResult, ListenerError, RegistrationError,
    RegistrationResult, SessionError, SessionResult, SharedError,
};
pub use interceptor::{
    FnListenerInterceptor, FnProcessingInterceptor, InterceptorSet, Invocation,
    ListenerInterceptor, ListenerInvocation, ListenerPoint, ProcessingInterceptor,
    ProcessingInvocation,
};
pub use invoker::{ExceptionHandler, ListenerInvoker};
pub use listener::{
    EventListener, FnListener, FnListenerBuilder, IntoListenerResult, ServiceListener,
};
pub use manager::{EventListenerManager, EventListenerManagerBuilder, ProcessingResult};
pub use normalizer::{
    FnMaterializer, Materialized, Materializer, ResultNormalizer, ResultNormalizerBuilder,
};
pub use registry::{ListenerHandle, ListenerRegistry, ResolvedListeners};
pub use session::{ContinuousSessions, SessionProvider, SessionReceiver};
