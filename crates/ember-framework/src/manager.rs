//! Event listener manager.
//!
//! [`EventListenerManager`] is the top-level orchestrator. On each pushed
//! event it:
//!
//! 1. Resolves the applicable listeners (cached per kind).
//! 2. Returns early if neither a listener nor a pending session can use the
//!    event.
//! 3. Builds a [`ProcessingContext`] with a fresh instant scope.
//! 4. Offers the event to pending continuous sessions; if one of them settles
//!    off it, dispatch stops there.
//! 5. Runs the whole-process interceptor chain around the listener loop.
//!
//! # Listener loop
//!
//! - Sync listeners run inline, in resolved order. Their results are appended
//!   in invocation order; a truncated result stops the loop.
//! - Async listeners are started in the same order on the manager's runtime.
//!   Their results are appended as they complete; await
//!   [`ProcessingResult::wait_async`] to observe them.
//! - Invalid results are not appended.
//!
//! # Example
//!
//! ```rust,ignore
//! let manager = EventListenerManager::builder()
//!     .process_interceptor("timing", Timing)
//!     .listener(greet)
//!     .build()?;
//!
//! let result = manager.push(BoxedEvent::new(message)).await?;
//! result.wait_async().await;
//! for reply in result.contents::<String>() { /* ... */ }
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::MutexGuard;
use tokio::runtime::Handle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span, info, trace};

use ember_core::{AttributeMap, BoxError, BoxedEvent, EventKind, EventResult, ScopedContext};

use crate::context::{ProcessingContext, ResultList};
use crate::error::{BuildError, DispatchError, DispatchResult, RegistrationResult};
use crate::interceptor::{InterceptorSet, ListenerInterceptor, Next, ProcessingInterceptor};
use crate::invoker::{ExceptionHandler, InvokerEnv, ListenerInvoker};
use crate::listener::EventListener;
use crate::normalizer::ResultNormalizer;
use crate::registry::{ListenerHandle, ListenerRegistry};
use crate::session::ContinuousSessions;

type ProcessChain = Next<Arc<ProcessingContext>, Result<(), BoxError>>;

// =============================================================================
// ProcessingResult
// =============================================================================

/// The aggregate outcome of one pushed event.
pub struct ProcessingResult {
    results: ResultList,
    pending: TaskTracker,
    consumed: bool,
}

impl ProcessingResult {
    /// A result without any listener output.
    pub fn empty() -> Self {
        Self {
            results: ResultList::default(),
            pending: TaskTracker::new(),
            consumed: false,
        }
    }

    fn consumed() -> Self {
        Self {
            consumed: true,
            ..Self::empty()
        }
    }

    fn from_context(ctx: &ProcessingContext) -> Self {
        ctx.pending().close();
        Self {
            results: Arc::clone(ctx.results()),
            pending: ctx.pending().clone(),
            consumed: false,
        }
    }

    /// Returns `true` if a continuous session consumed the event.
    pub fn is_consumed_by_session(&self) -> bool {
        self.consumed
    }

    /// Locks and returns the results appended so far.
    pub fn results(&self) -> MutexGuard<'_, Vec<EventResult>> {
        self.results.lock()
    }

    /// Returns the number of results appended so far.
    pub fn len(&self) -> usize {
        self.results.lock().len()
    }

    /// Returns `true` if no result has been appended.
    pub fn is_empty(&self) -> bool {
        self.results.lock().is_empty()
    }

    /// Returns clones of every result content of type `T`, in append order.
    pub fn contents<T: Any + Clone>(&self) -> Vec<T> {
        self.results
            .lock()
            .iter()
            .filter_map(|r| r.content_as::<T>().cloned())
            .collect()
    }

    /// Returns the number of async listeners still running.
    pub fn pending_async(&self) -> usize {
        self.pending.len()
    }

    /// Waits until every async listener of this event has completed.
    pub async fn wait_async(&self) {
        self.pending.wait().await;
    }

    /// Takes the results appended so far.
    pub fn into_results(self) -> Vec<EventResult> {
        std::mem::take(&mut *self.results.lock())
    }
}

impl fmt::Debug for ProcessingResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingResult")
            .field("results", &self.len())
            .field("pending_async", &self.pending_async())
            .field("consumed", &self.consumed)
            .finish()
    }
}

// =============================================================================
// EventListenerManager
// =============================================================================

/// Registers listeners and dispatches events to them.
pub struct EventListenerManager {
    registry: Arc<ListenerRegistry>,
    sessions: Arc<ContinuousSessions>,
    process_chain: ProcessChain,
    env: InvokerEnv,
    global: Arc<AttributeMap>,
    session_store: Arc<AttributeMap>,
    _scope_watch: DropGuard,
}

impl EventListenerManager {
    /// Starts configuring a manager.
    pub fn builder() -> EventListenerManagerBuilder {
        EventListenerManagerBuilder::default()
    }

    /// Registers `listener`.
    pub fn register(&self, listener: impl EventListener) -> RegistrationResult<ListenerHandle> {
        self.register_arc(Arc::new(listener))
    }

    /// Registers an already shared listener.
    pub fn register_arc(&self, listener: Arc<dyn EventListener>) -> RegistrationResult<ListenerHandle> {
        let invoker = Arc::new(ListenerInvoker::new(listener, &self.env));
        self.registry.register(Arc::clone(&invoker))?;
        Ok(ListenerHandle::new(&invoker, &self.registry))
    }

    /// Removes the listener with the given ID.
    pub fn unregister(&self, id: &str) -> Option<Arc<dyn EventListener>> {
        self.registry.unregister(id)
    }

    /// Removes every listener for which `predicate` returns `true`.
    pub fn unregister_by<P>(&self, predicate: P) -> Vec<Arc<dyn EventListener>>
    where
        P: Fn(&dyn EventListener) -> bool,
    {
        self.registry.unregister_by(predicate)
    }

    /// Returns `true` if any registered listener applies to `kind`.
    pub fn contains(&self, kind: &EventKind) -> bool {
        self.registry.contains(kind)
    }

    /// Returns `true` if pushing an event of `kind` could reach anything,
    /// a listener or a pending session.
    pub fn is_processable(&self, kind: &EventKind) -> bool {
        self.contains(kind) || self.sessions.has_waiters_for(kind)
    }

    /// Returns the listener registry.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Returns the continuous-session manager.
    pub fn sessions(&self) -> &Arc<ContinuousSessions> {
        &self.sessions
    }

    /// Returns the process-lifetime attribute store.
    pub fn global_scope(&self) -> &Arc<AttributeMap> {
        &self.global
    }

    /// Returns the attribute store shared by continuous sessions.
    pub fn session_scope(&self) -> &Arc<AttributeMap> {
        &self.session_store
    }

    /// Returns the runtime async listeners are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.env.runtime
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.env.shutdown.is_cancelled()
    }

    /// Dispatches one event.
    ///
    /// Listener faults never surface here. An `Err` means a whole-process
    /// interceptor failed, the exception handler failed, or the manager is shut down.
    pub async fn push(&self, event: BoxedEvent) -> DispatchResult<ProcessingResult> {
        if self.is_shut_down() {
            return Err(DispatchError::Closed);
        }
        let span = debug_span!("push", kind = %event.kind());
        self.dispatch(event).instrument(span).await
    }

    async fn dispatch(&self, event: BoxedEvent) -> DispatchResult<ProcessingResult> {
        let kind = event.kind().clone();
        let listeners = self.registry.resolve(&kind);
        let has_waiters = self.sessions.has_waiters_for(&kind);
        if listeners.is_empty() && !has_waiters {
            trace!("No listener or session for event");
            return Ok(ProcessingResult::empty());
        }

        let ctx = Arc::new(ProcessingContext::new(
            event,
            ScopedContext::new(Arc::clone(&self.global), Arc::clone(&self.session_store)),
            listeners,
            Arc::clone(&self.sessions),
        ));

        if has_waiters && self.sessions.offer(&ctx).await {
            debug!("Event consumed by a continuous session");
            return Ok(ProcessingResult::consumed());
        }

        (self.process_chain)(Arc::clone(&ctx))
            .await
            .map_err(DispatchError::from_chain)?;
        Ok(ProcessingResult::from_context(&ctx))
    }

    /// Runs every resolved listener of one event.
    async fn run_listeners(ctx: Arc<ProcessingContext>) -> Result<(), BoxError> {
        for invoker in ctx.invokers().iter() {
            let result = invoker.invoke(&ctx).await?;
            match result {
                EventResult::Invalid => {}
                EventResult::Async(task) => ctx.collect(task),
                value => {
                    let truncated = value.is_truncated();
                    ctx.append(value);
                    if truncated {
                        debug!(listener = %invoker.id(), "Result truncated, skipping remaining listeners");
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Cancels every async listener and pending session, then waits for
    /// in-flight listener tasks to finish.
    pub async fn shutdown(&self) {
        info!("Shutting down event listener manager");
        self.env.shutdown.cancel();
        self.sessions.cancel_all();
        self.env.tasks.close();
        self.env.tasks.wait().await;
    }
}

impl fmt::Debug for EventListenerManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListenerManager")
            .field("registry", &self.registry)
            .field("sessions", &self.sessions)
            .field("normalizer", &self.env.normalizer)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configuration consumed when building an [`EventListenerManager`].
#[derive(Default)]
pub struct EventListenerManagerBuilder {
    process_interceptors: InterceptorSet<dyn ProcessingInterceptor>,
    listener_interceptors: InterceptorSet<dyn ListenerInterceptor>,
    listeners: Vec<Arc<dyn EventListener>>,
    handler: Option<Arc<dyn ExceptionHandler>>,
    runtime: Option<Handle>,
    normalizer: Option<ResultNormalizer>,
    shutdown: Option<CancellationToken>,
    global: Option<Arc<AttributeMap>>,
}

impl EventListenerManagerBuilder {
    /// Adds a whole-process interceptor. Reusing an ID replaces the earlier one.
    pub fn process_interceptor(
        mut self,
        id: impl Into<String>,
        interceptor: impl ProcessingInterceptor,
    ) -> Self {
        self.process_interceptors.insert(id, Arc::new(interceptor));
        self
    }

    /// Adds a per-listener interceptor. Reusing an ID replaces the earlier one.
    pub fn listener_interceptor(
        mut self,
        id: impl Into<String>,
        interceptor: impl ListenerInterceptor,
    ) -> Self {
        self.listener_interceptors.insert(id, Arc::new(interceptor));
        self
    }

    /// Adds an initial listener.
    pub fn listener(mut self, listener: impl EventListener) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Sets the process-wide exception handler.
    pub fn exception_handler(mut self, handler: impl ExceptionHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Sets the runtime async listeners are spawned on.
    ///
    /// Defaults to the runtime current at [`build`](Self::build) time.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Sets the result normalizer. Defaults to [`ResultNormalizer::detect`].
    pub fn normalizer(mut self, normalizer: ResultNormalizer) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// Links the manager's lifetime to an outer cancellation token.
    pub fn shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Shares an existing global attribute store.
    pub fn global_scope(mut self, global: Arc<AttributeMap>) -> Self {
        self.global = Some(global);
        self
    }

    /// Builds the manager and registers the initial listeners.
    pub fn build(self) -> Result<EventListenerManager, BuildError> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => Handle::try_current()?,
        };
        let shutdown = self
            .shutdown
            .map(|parent| parent.child_token())
            .unwrap_or_default();

        let env = InvokerEnv {
            links: self.listener_interceptors.links(),
            normalizer: Arc::new(self.normalizer.unwrap_or_else(ResultNormalizer::detect)),
            handler: self.handler,
            runtime,
            tasks: TaskTracker::new(),
            shutdown: shutdown.clone(),
        };

        let terminal: ProcessChain = Arc::new(
            |ctx: Arc<ProcessingContext>| -> BoxFuture<'static, Result<(), BoxError>> {
                Box::pin(EventListenerManager::run_listeners(ctx))
            },
        );
        let process_chain = self.process_interceptors.chain(terminal);

        let sessions = Arc::new(ContinuousSessions::new(shutdown.child_token()));
        let scope_watch = sessions.watch_scope(&env.tasks, &env.runtime);

        let manager = EventListenerManager {
            registry: Arc::new(ListenerRegistry::new()),
            sessions,
            process_chain,
            env,
            global: self.global.unwrap_or_default(),
            session_store: Arc::default(),
            _scope_watch: scope_watch,
        };
        for listener in self.listeners {
            manager.register_arc(listener)?;
        }
        debug!(
            process_interceptors = self.process_interceptors.len(),
            listener_interceptors = self.listener_interceptors.len(),
            listeners = manager.registry.len(),
            "Event listener manager built"
        );
        Ok(manager)
    }
}
