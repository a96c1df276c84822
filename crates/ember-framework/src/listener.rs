//! Event listeners.
//!
//! A listener is the unit of event-handling logic. It exposes:
//!
//! - a unique string ID,
//! - a priority (lower runs first),
//! - an async flag (async listeners run in their own task),
//! - a set of target kinds (empty matches every kind),
//! - a match predicate and an invoke operation.
//!
//! Listeners can be written by implementing [`EventListener`] directly, built
//! from closures with [`FnListener::builder`], or adapted from a
//! `tower::Service` with [`ServiceListener`].
//!
//! ```rust,ignore
//! let greet = FnListener::builder("greet")
//!     .priority(5)
//!     .on(message_kind.clone())
//!     .matcher(|ctx| async move { ctx.plain_text() == Some("hello") })
//!     .handle(|_ctx| async move { EventResult::of("hi!") });
//!
//! manager.register(greet)?;
//! ```

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tower::{Service, ServiceExt};

use ember_core::{BoxError, EventKind, EventResult, Reactive};

use crate::context::ListenerContext;

// ============================================================================
// EventListener
// ============================================================================

/// A registered unit of event-handling logic.
#[async_trait]
pub trait EventListener: Send + Sync + 'static {
    /// Returns the listener's unique ID.
    fn id(&self) -> &str;

    /// Ordering key; lower runs first.
    fn priority(&self) -> i32 {
        0
    }

    /// Returns `true` if invocations run detached in their own task.
    fn is_async(&self) -> bool {
        false
    }

    /// Kinds this listener applies to. Empty means every kind.
    fn target_kinds(&self) -> &[EventKind] {
        &[]
    }

    /// Returns `true` if this listener applies to events of `kind`.
    fn is_target(&self, kind: &EventKind) -> bool {
        let targets = self.target_kinds();
        targets.is_empty() || targets.iter().any(|t| kind.is_subkind_of(t))
    }

    /// Tests whether this listener wants the event.
    async fn matches(&self, _ctx: Arc<ListenerContext>) -> bool {
        true
    }

    /// Handles the event.
    async fn invoke(&self, ctx: Arc<ListenerContext>) -> Result<EventResult, BoxError>;
}

impl fmt::Debug for dyn EventListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListener")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("is_async", &self.is_async())
            .finish()
    }
}

// ============================================================================
// IntoListenerResult
// ============================================================================

/// Types a closure listener may return.
pub trait IntoListenerResult: Send + 'static {
    /// Converts into the listener outcome.
    fn into_listener_result(self) -> Result<EventResult, BoxError>;
}

impl IntoListenerResult for EventResult {
    fn into_listener_result(self) -> Result<EventResult, BoxError> {
        Ok(self)
    }
}

/// `()` contributes an empty value.
impl IntoListenerResult for () {
    fn into_listener_result(self) -> Result<EventResult, BoxError> {
        Ok(EventResult::empty())
    }
}

impl IntoListenerResult for Reactive {
    fn into_listener_result(self) -> Result<EventResult, BoxError> {
        Ok(EventResult::reactive(self))
    }
}

impl<T, E> IntoListenerResult for Result<T, E>
where
    T: IntoListenerResult,
    E: Into<BoxError> + Send + 'static,
{
    fn into_listener_result(self) -> Result<EventResult, BoxError> {
        self.map_err(Into::<BoxError>::into)?.into_listener_result()
    }
}

// ============================================================================
// FnListener
// ============================================================================

type MatchFn = Arc<dyn Fn(Arc<ListenerContext>) -> BoxFuture<'static, bool> + Send + Sync>;
type HandleFn =
    Arc<dyn Fn(Arc<ListenerContext>) -> BoxFuture<'static, Result<EventResult, BoxError>> + Send + Sync>;

/// A listener built from closures.
pub struct FnListener {
    id: String,
    priority: i32,
    is_async: bool,
    kinds: Vec<EventKind>,
    matcher: Option<MatchFn>,
    handler: HandleFn,
}

impl FnListener {
    /// Starts building a listener with the given ID.
    pub fn builder(id: impl Into<String>) -> FnListenerBuilder {
        FnListenerBuilder {
            id: id.into(),
            priority: 0,
            is_async: false,
            kinds: Vec::new(),
            matcher: None,
        }
    }
}

#[async_trait]
impl EventListener for FnListener {
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn target_kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    async fn matches(&self, ctx: Arc<ListenerContext>) -> bool {
        match &self.matcher {
            Some(matcher) => matcher(ctx).await,
            None => true,
        }
    }

    async fn invoke(&self, ctx: Arc<ListenerContext>) -> Result<EventResult, BoxError> {
        (self.handler)(ctx).await
    }
}

impl fmt::Debug for FnListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnListener")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("is_async", &self.is_async)
            .field("kinds", &self.kinds)
            .finish_non_exhaustive()
    }
}

/// Builder for [`FnListener`].
pub struct FnListenerBuilder {
    id: String,
    priority: i32,
    is_async: bool,
    kinds: Vec<EventKind>,
    matcher: Option<MatchFn>,
}

impl FnListenerBuilder {
    /// Sets the priority (lower runs first).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Runs invocations detached in their own task.
    pub fn is_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Adds a target kind.
    pub fn on(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Sets the match predicate.
    pub fn matcher<F, Fut>(mut self, matcher: F) -> Self
    where
        F: Fn(Arc<ListenerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.matcher = Some(Arc::new(move |ctx: Arc<ListenerContext>| matcher(ctx).boxed()));
        self
    }

    /// Sets the handler and finishes the listener.
    pub fn handle<F, Fut, R>(self, handler: F) -> FnListener
    where
        F: Fn(Arc<ListenerContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoListenerResult,
    {
        FnListener {
            id: self.id,
            priority: self.priority,
            is_async: self.is_async,
            kinds: self.kinds,
            matcher: self.matcher,
            handler: Arc::new(move |ctx: Arc<ListenerContext>| {
                handler(ctx).map(R::into_listener_result).boxed()
            }),
        }
    }
}

// ============================================================================
// ServiceListener
// ============================================================================

/// Adapts a `tower::Service` into a listener.
///
/// Every invocation clones the service and drives it with `oneshot`, so
/// services with readiness back-pressure work unchanged.
///
/// ```rust,ignore
/// let svc = tower::service_fn(|ctx: Arc<ListenerContext>| async move {
///     Ok::<_, BoxError>(EventResult::of(ctx.plain_text().unwrap_or_default().len()))
/// });
/// manager.register(ServiceListener::new("length", svc).priority(3))?;
/// ```
#[derive(Clone)]
pub struct ServiceListener<S> {
    id: String,
    priority: i32,
    is_async: bool,
    kinds: Vec<EventKind>,
    service: S,
}

impl<S> ServiceListener<S> {
    /// Wraps `service` under `id`.
    pub fn new(id: impl Into<String>, service: S) -> Self {
        Self {
            id: id.into(),
            priority: 0,
            is_async: false,
            kinds: Vec::new(),
            service,
        }
    }

    /// Sets the priority (lower runs first).
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Runs invocations detached in their own task.
    pub fn is_async(mut self, is_async: bool) -> Self {
        self.is_async = is_async;
        self
    }

    /// Adds a target kind.
    pub fn on(mut self, kind: EventKind) -> Self {
        self.kinds.push(kind);
        self
    }
}

#[async_trait]
impl<S> EventListener for ServiceListener<S>
where
    S: Service<Arc<ListenerContext>, Response = EventResult> + Clone + Send + Sync + 'static,
    S::Error: Into<BoxError>,
    S::Future: Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn is_async(&self) -> bool {
        self.is_async
    }

    fn target_kinds(&self) -> &[EventKind] {
        &self.kinds
    }

    async fn invoke(&self, ctx: Arc<ListenerContext>) -> Result<EventResult, BoxError> {
        self.service.clone().oneshot(ctx).await.map_err(Into::into)
    }
}
