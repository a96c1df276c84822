//! Processing contexts.
//!
//! Two context types model how one event travels through the dispatcher:
//!
//! - [`ProcessingContext`]: the **shared** context for one pushed event. A
//!   single `Arc<ProcessingContext>` is created per event and handed to the
//!   whole-process interceptors, to every continuous-session selector and to
//!   every listener. It holds the event, its [`ScopedContext`], the resolved
//!   listener list and the result accumulator.
//!
//! - [`ListenerContext`]: the context handed to one listener and its
//!   per-listener interceptors, combining the shared `Arc<ProcessingContext>`
//!   with the listener being invoked.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::task::TaskTracker;
use tracing::error;

use ember_core::{
    AsyncResult, Attribute, AttributeResult, BoxedEvent, EventKind, EventResult, Scope,
    ScopedContext,
};

use crate::invoker::ListenerInvoker;
use crate::listener::EventListener;
use crate::session::ContinuousSessions;

/// Results accumulated for one event.
pub(crate) type ResultList = Arc<Mutex<Vec<EventResult>>>;

// =============================================================================
// ProcessingContext
// =============================================================================

/// The shared context for one pushed event.
pub struct ProcessingContext {
    event: BoxedEvent,
    scope: ScopedContext,
    listeners: Arc<[Arc<ListenerInvoker>]>,
    sessions: Arc<ContinuousSessions>,
    results: ResultList,
    /// Collectors for async results of this event.
    pending: TaskTracker,
}

impl ProcessingContext {
    pub(crate) fn new(
        event: BoxedEvent,
        scope: ScopedContext,
        listeners: Arc<[Arc<ListenerInvoker>]>,
        sessions: Arc<ContinuousSessions>,
    ) -> Self {
        Self {
            event,
            scope,
            listeners,
            sessions,
            results: ResultList::default(),
            pending: TaskTracker::new(),
        }
    }

    /// Returns the event being processed.
    pub fn event(&self) -> &BoxedEvent {
        &self.event
    }

    /// Returns the kind of the event being processed.
    pub fn kind(&self) -> &EventKind {
        self.event.kind()
    }

    /// Returns the event downcast to `E`.
    pub fn event_as<E: ember_core::Event>(&self) -> Option<&E> {
        self.event.downcast_ref::<E>()
    }

    /// Returns the event's plain text, if it is message-bearing.
    pub fn plain_text(&self) -> Option<&str> {
        self.event.plain_text()
    }

    /// Returns the scoped attribute context of this event.
    pub fn scope(&self) -> &ScopedContext {
        &self.scope
    }

    /// Shorthand for [`ScopedContext::get`].
    pub fn attribute<T: Send + Sync + 'static>(
        &self,
        scope: Scope,
        attribute: &Attribute<T>,
    ) -> AttributeResult<Option<Arc<T>>> {
        self.scope.get(scope, attribute)
    }

    /// Returns the continuous-session manager.
    pub fn sessions(&self) -> &Arc<ContinuousSessions> {
        &self.sessions
    }

    /// Returns the listeners resolved for this event, in invocation order.
    pub fn listeners(&self) -> impl Iterator<Item = &Arc<dyn EventListener>> {
        self.listeners.iter().map(|i| i.listener())
    }

    /// Returns the number of results appended so far.
    pub fn result_count(&self) -> usize {
        self.results.lock().len()
    }

    pub(crate) fn invokers(&self) -> &Arc<[Arc<ListenerInvoker>]> {
        &self.listeners
    }

    pub(crate) fn results(&self) -> &ResultList {
        &self.results
    }

    pub(crate) fn pending(&self) -> &TaskTracker {
        &self.pending
    }

    pub(crate) fn append(&self, result: EventResult) {
        self.results.lock().push(result);
    }

    /// Appends the async result's value once its task completes.
    pub(crate) fn collect(&self, result: AsyncResult) {
        let results = Arc::clone(&self.results);
        let kind = self.kind().clone();
        self.pending.spawn(async move {
            match result.join().await {
                Ok(EventResult::Invalid) => {}
                Ok(value) => results.lock().push(value),
                Err(e) if e.is_cancelled() => {}
                Err(e) => error!(kind = %kind, "Async listener task failed: {e}"),
            }
        });
    }
}

impl fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("event", &self.event)
            .field("listeners", &self.listeners.len())
            .field("results", &self.result_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// ListenerContext
// =============================================================================

/// The context handed to one listener.
pub struct ListenerContext {
    processing: Arc<ProcessingContext>,
    listener: Arc<dyn EventListener>,
}

impl ListenerContext {
    pub(crate) fn new(processing: Arc<ProcessingContext>, listener: Arc<dyn EventListener>) -> Self {
        Self {
            processing,
            listener,
        }
    }

    /// Returns the shared processing context.
    pub fn processing(&self) -> &Arc<ProcessingContext> {
        &self.processing
    }

    /// Returns the listener being invoked.
    pub fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }

    /// Returns the event being processed.
    pub fn event(&self) -> &BoxedEvent {
        self.processing.event()
    }

    /// Returns the event downcast to `E`.
    pub fn event_as<E: ember_core::Event>(&self) -> Option<&E> {
        self.processing.event_as::<E>()
    }

    /// Returns the event's plain text, if it is message-bearing.
    pub fn plain_text(&self) -> Option<&str> {
        self.processing.plain_text()
    }

    /// Returns the scoped attribute context of this event.
    pub fn scope(&self) -> &ScopedContext {
        self.processing.scope()
    }

    /// Returns the continuous-session manager.
    pub fn sessions(&self) -> &Arc<ContinuousSessions> {
        self.processing.sessions()
    }
}

impl fmt::Debug for ListenerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerContext")
            .field("listener", &self.listener.id())
            .field("event", self.processing.event())
            .finish()
    }
}
