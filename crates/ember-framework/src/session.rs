//! Continuous sessions.
//!
//! A continuous session lets a caller suspend until a *future* event satisfies
//! a selector. This is how multi-step conversations are written:
//!
//! ```rust,ignore
//! let age: u32 = ctx
//!     .sessions()
//!     .wait_on(message_kind, "ask-age", |event, provider| async move {
//!         if let Some(age) = event.plain_text().and_then(|t| t.parse().ok()) {
//!             provider.push(age);
//!         }
//!         Ok(())
//!     })
//!     .await?;
//! ```
//!
//! # Waiter lifecycle
//!
//! ```text
//! start() ──► Pending ──► Resolved   (provider.push)
//!                     ──► Failed     (provider.push_error)
//!                     ──► Cancelled  (cancel, caller dropped `wait`, shutdown)
//!                     ──► Replaced   (a new waiter registered under the same ID)
//! ```
//!
//! Every terminal transition happens exactly once: the first writer wins and
//! later writes are ignored. On the terminal transition the waiter is removed
//! from the manager and its completion callbacks run.
//!
//! # Precedence
//!
//! Every pushed event is offered to every pending waiter before ordinary
//! dispatch. If any selector settles its waiter off that event, the event is
//! *consumed*: no ordinary listener sees it.
//!
//! No timeout is built in; race the wait against a deadline instead, e.g.
//! with `tokio::time::timeout`. The waiter is cancelled when the timed-out
//! future is dropped.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

use ember_core::{BoxError, EventKind};

use crate::context::ProcessingContext;
use crate::error::{SessionError, SessionResult};

type Outcome<T> = Option<SessionResult<T>>;
type Callback<T> = Box<dyn FnOnce(&SessionResult<T>) + Send>;
type Selector<T> =
    Arc<dyn Fn(Arc<ProcessingContext>, SessionProvider<T>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

// =============================================================================
// Slot: shared state of one waiter
// =============================================================================

struct Slot<T> {
    id: String,
    state: watch::Sender<Outcome<T>>,
    token: CancellationToken,
    callbacks: Mutex<Vec<Callback<T>>>,
}

impl<T: Clone + Send + Sync + 'static> Slot<T> {
    fn new(id: String, token: CancellationToken) -> Self {
        Self {
            id,
            state: watch::Sender::new(None),
            token,
            callbacks: Mutex::new(Vec::new()),
        }
    }

    fn is_pending(&self) -> bool {
        self.state.borrow().is_none()
    }

    /// First writer wins. Returns `true` if this call settled the waiter.
    fn complete(&self, outcome: SessionResult<T>) -> bool {
        let mut outcome = Some(outcome);
        let won = self.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = outcome.take();
            true
        });
        if !won {
            return false;
        }

        self.token.cancel();
        let callbacks = std::mem::take(&mut *self.callbacks.lock());
        let settled = self.state.borrow().clone();
        if let Some(settled) = settled {
            match &settled {
                Ok(_) => debug!(session = %self.id, "Session resolved"),
                Err(e) => debug!(session = %self.id, "Session ended: {e}"),
            }
            for callback in callbacks {
                callback(&settled);
            }
        }
        true
    }

    fn on_complete(&self, callback: Callback<T>) {
        {
            let mut callbacks = self.callbacks.lock();
            if self.is_pending() {
                callbacks.push(callback);
                return;
            }
        }
        let settled = self.state.borrow().clone();
        if let Some(settled) = settled {
            callback(&settled);
        }
    }

    fn cancelled(&self) -> SessionError {
        SessionError::Cancelled {
            id: self.id.clone(),
        }
    }

    async fn recv(&self) -> SessionResult<T> {
        let mut rx = self.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(outcome) = current {
                return outcome;
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Err(self.cancelled());
                    }
                }
                _ = self.token.cancelled() => {
                    self.complete(Err(self.cancelled()));
                }
            }
        }
    }
}

// =============================================================================
// Provider / Receiver
// =============================================================================

/// The settling side of a waiter, handed to selectors.
pub struct SessionProvider<T> {
    slot: Arc<Slot<T>>,
    settled: Arc<AtomicBool>,
}

impl<T> Clone for SessionProvider<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
            settled: Arc::clone(&self.settled),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SessionProvider<T> {
    fn new(slot: Arc<Slot<T>>) -> Self {
        Self {
            slot,
            settled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Returns the waiter's ID.
    pub fn id(&self) -> &str {
        &self.slot.id
    }

    /// Returns `true` while the waiter has not been settled.
    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// Resolves the waiter with `value`. Returns `false` if it was already settled.
    pub fn push(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Fails the waiter with `error`. Returns `false` if it was already settled.
    pub fn push_error(&self, error: impl Into<BoxError>) -> bool {
        let source: BoxError = error.into();
        self.settle(Err(SessionError::Failed {
            id: self.slot.id.clone(),
            source: source.into(),
        }))
    }

    /// Cancels the waiter. Returns `false` if it was already settled.
    pub fn cancel(&self) -> bool {
        self.slot.complete(Err(self.slot.cancelled()))
    }

    /// Registers a callback run once the waiter is settled.
    pub fn on_complete(&self, callback: impl FnOnce(&SessionResult<T>) + Send + 'static) {
        self.slot.on_complete(Box::new(callback));
    }

    fn settle(&self, outcome: SessionResult<T>) -> bool {
        let won = self.slot.complete(outcome);
        if won {
            self.settled.store(true, Ordering::Release);
        }
        won
    }
}

impl<T> fmt::Debug for SessionProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionProvider")
            .field("id", &self.slot.id)
            .finish()
    }
}

/// The observing side of a waiter.
pub struct SessionReceiver<T> {
    slot: Arc<Slot<T>>,
}

impl<T> Clone for SessionReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SessionReceiver<T> {
    /// Returns the waiter's ID.
    pub fn id(&self) -> &str {
        &self.slot.id
    }

    /// Returns `true` while the waiter has not been settled.
    pub fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    /// Waits until the waiter is settled.
    ///
    /// Dropping this future leaves the waiter pending; use
    /// [`ContinuousSessions::wait`] for cancel-on-drop behavior.
    pub async fn recv(&self) -> SessionResult<T> {
        self.slot.recv().await
    }

    /// Cancels the waiter, both for receivers and for the provider side.
    pub fn cancel(&self) -> bool {
        self.slot.complete(Err(self.slot.cancelled()))
    }

    /// Registers a callback run once the waiter is settled.
    pub fn on_complete(&self, callback: impl FnOnce(&SessionResult<T>) + Send + 'static) {
        self.slot.on_complete(Box::new(callback));
    }
}

impl<T> fmt::Debug for SessionReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionReceiver")
            .field("id", &self.slot.id)
            .finish()
    }
}

/// Cancels a waiter when the owning `wait` future is dropped early.
struct CancelOnDrop<T: Clone + Send + Sync + 'static> {
    slot: Arc<Slot<T>>,
}

impl<T: Clone + Send + Sync + 'static> Drop for CancelOnDrop<T> {
    fn drop(&mut self) {
        if self.slot.is_pending() {
            trace!(session = %self.slot.id, "Wait dropped before completion");
            self.slot.complete(Err(self.slot.cancelled()));
        }
    }
}

// =============================================================================
// Type-erased waiter
// =============================================================================

trait ErasedWaiter: Send + Sync {
    fn id(&self) -> &str;
    fn accepts(&self, kind: &EventKind) -> bool;
    fn is_pending(&self) -> bool;
    fn cancel_with(&self, error: SessionError) -> bool;
    /// Offers the event; resolves `true` if the selector settled the waiter.
    fn offer(self: Arc<Self>, ctx: Arc<ProcessingContext>) -> BoxFuture<'static, bool>;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

struct Waiter<T> {
    slot: Arc<Slot<T>>,
    kind: Option<EventKind>,
    selector: Selector<T>,
}

impl<T: Clone + Send + Sync + 'static> ErasedWaiter for Waiter<T> {
    fn id(&self) -> &str {
        &self.slot.id
    }

    fn accepts(&self, kind: &EventKind) -> bool {
        self.kind.as_ref().is_none_or(|k| kind.is_subkind_of(k))
    }

    fn is_pending(&self) -> bool {
        self.slot.is_pending()
    }

    fn cancel_with(&self, error: SessionError) -> bool {
        self.slot.complete(Err(error))
    }

    fn offer(self: Arc<Self>, ctx: Arc<ProcessingContext>) -> BoxFuture<'static, bool> {
        Box::pin(async move {
            let provider = SessionProvider::new(Arc::clone(&self.slot));
            let settled = Arc::clone(&provider.settled);
            if let Err(e) = (self.selector)(ctx, provider).await {
                error!(session = %self.slot.id, "Session selector failed: {e}");
            }
            settled.load(Ordering::Acquire)
        })
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// =============================================================================
// ContinuousSessions
// =============================================================================

struct Entry {
    serial: u64,
    waiter: Arc<dyn ErasedWaiter>,
}

type WaiterMap = Mutex<HashMap<String, Entry>>;

/// Keyed registry of pending waiters.
pub struct ContinuousSessions {
    waiters: Arc<WaiterMap>,
    serial: AtomicU64,
    token: CancellationToken,
}

impl ContinuousSessions {
    /// Creates a manager whose waiters are cancelled with `token`.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            waiters: Arc::default(),
            serial: AtomicU64::new(0),
            token,
        }
    }

    /// Cancels every waiter as soon as the scope token is cancelled, even if
    /// nobody is polling a receiver.
    ///
    /// The watch task stops when the returned guard is dropped.
    pub(crate) fn watch_scope(self: &Arc<Self>, tasks: &TaskTracker, runtime: &Handle) -> DropGuard {
        let stop = CancellationToken::new();
        let guard = stop.clone().drop_guard();
        let scope = self.token.clone();
        let sessions = Arc::downgrade(self);
        tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = scope.cancelled() => {
                        if let Some(sessions) = sessions.upgrade() {
                            debug!(pending = sessions.len(), "Scope cancelled, cancelling sessions");
                            sessions.cancel_all();
                        }
                    }
                    _ = stop.cancelled() => {}
                }
            },
            runtime,
        );
        guard
    }

    /// Returns `true` once the scope token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a fresh waiter ID.
    pub fn next_id(&self) -> String {
        format!("session-{}", self.serial.fetch_add(1, Ordering::Relaxed))
    }

    fn register<T, F, Fut>(&self, kind: Option<EventKind>, id: String, selector: F) -> SessionReceiver<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<ProcessingContext>, SessionProvider<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let slot = Arc::new(Slot::new(id.clone(), self.token.child_token()));

        let map: Weak<WaiterMap> = Arc::downgrade(&self.waiters);
        let key = id.clone();
        slot.on_complete(Box::new(move |_| {
            if let Some(map) = map.upgrade() {
                let mut map = map.lock();
                if map.get(&key).is_some_and(|e| e.serial == serial) {
                    map.remove(&key);
                }
            }
        }));

        let waiter = Arc::new(Waiter {
            slot: Arc::clone(&slot),
            kind,
            selector: Arc::new(
                move |ctx: Arc<ProcessingContext>,
                      provider: SessionProvider<T>|
                      -> BoxFuture<'static, Result<(), BoxError>> {
                    Box::pin(selector(ctx, provider))
                },
            ),
        });

        let replaced = self.waiters.lock().insert(
            id.clone(),
            Entry {
                serial,
                waiter: waiter as Arc<dyn ErasedWaiter>,
            },
        );
        if let Some(old) = replaced {
            debug!(session = %id, "Replacing pending waiter");
            old.waiter.cancel_with(SessionError::Replaced { id: id.clone() });
        }
        if self.token.is_cancelled() {
            slot.complete(Err(slot.cancelled()));
            return SessionReceiver { slot };
        }
        trace!(session = %id, "Waiter registered");

        SessionReceiver { slot }
    }

    /// Registers a waiter for every kind and returns its receiver without suspending.
    pub fn start<T, F, Fut>(&self, id: impl Into<String>, selector: F) -> SessionReceiver<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<ProcessingContext>, SessionProvider<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register(None, id.into(), selector)
    }

    /// Registers a waiter restricted to events whose kind is-a `kind`.
    pub fn start_on<T, F, Fut>(
        &self,
        kind: EventKind,
        id: impl Into<String>,
        selector: F,
    ) -> SessionReceiver<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<ProcessingContext>, SessionProvider<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.register(Some(kind), id.into(), selector)
    }

    /// Registers a waiter and suspends until it is settled.
    ///
    /// Dropping the returned future cancels the waiter.
    pub async fn wait<T, F, Fut>(&self, id: impl Into<String>, selector: F) -> SessionResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<ProcessingContext>, SessionProvider<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let receiver = self.start(id, selector);
        Self::suspend(receiver).await
    }

    /// [`wait`](Self::wait) restricted to events whose kind is-a `kind`.
    pub async fn wait_on<T, F, Fut>(
        &self,
        kind: EventKind,
        id: impl Into<String>,
        selector: F,
    ) -> SessionResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(Arc<ProcessingContext>, SessionProvider<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let receiver = self.start_on(kind, id, selector);
        Self::suspend(receiver).await
    }

    async fn suspend<T: Clone + Send + Sync + 'static>(receiver: SessionReceiver<T>) -> SessionResult<T> {
        let _guard = CancelOnDrop {
            slot: Arc::clone(&receiver.slot),
        };
        receiver.recv().await
    }

    fn find<T: Clone + Send + Sync + 'static>(&self, id: &str) -> Option<Arc<Slot<T>>> {
        let waiter = Arc::clone(&self.waiters.lock().get(id)?.waiter);
        let waiter = waiter.into_any().downcast::<Waiter<T>>().ok()?;
        Some(Arc::clone(&waiter.slot))
    }

    /// Returns the provider of the pending waiter `id`, if its value type is `T`.
    pub fn get_provider<T: Clone + Send + Sync + 'static>(&self, id: &str) -> Option<SessionProvider<T>> {
        self.find(id).map(SessionProvider::new)
    }

    /// Returns a receiver of the pending waiter `id`, if its value type is `T`.
    pub fn get_receiver<T: Clone + Send + Sync + 'static>(&self, id: &str) -> Option<SessionReceiver<T>> {
        self.find(id).map(|slot| SessionReceiver { slot })
    }

    /// Returns `true` if a waiter is pending under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.waiters.lock().contains_key(id)
    }

    /// Cancels the waiter `id`.
    pub fn cancel(&self, id: &str) -> bool {
        let waiter = match self.waiters.lock().get(id) {
            Some(entry) => Arc::clone(&entry.waiter),
            None => return false,
        };
        waiter.cancel_with(SessionError::Cancelled { id: id.to_string() })
    }

    /// Cancels every pending waiter.
    pub fn cancel_all(&self) {
        let waiters: Vec<_> = self
            .waiters
            .lock()
            .values()
            .map(|e| Arc::clone(&e.waiter))
            .collect();
        for waiter in waiters {
            waiter.cancel_with(SessionError::Cancelled {
                id: waiter.id().to_string(),
            });
        }
    }

    /// Returns the number of pending waiters.
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    /// Returns `true` if no waiter is pending.
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Returns `true` if a pending waiter could accept an event of `kind`.
    pub fn has_waiters_for(&self, kind: &EventKind) -> bool {
        !self.token.is_cancelled()
            && self
                .waiters
                .lock()
                .values()
                .any(|e| e.waiter.is_pending() && e.waiter.accepts(kind))
    }

    /// Offers the event to every pending waiter that accepts its kind.
    ///
    /// Returns `true` if any selector settled its waiter off this event.
    pub async fn offer(&self, ctx: &Arc<ProcessingContext>) -> bool {
        let kind = ctx.kind().clone();
        let candidates: Vec<Arc<dyn ErasedWaiter>> = self
            .waiters
            .lock()
            .values()
            .filter(|e| e.waiter.is_pending() && e.waiter.accepts(&kind))
            .map(|e| Arc::clone(&e.waiter))
            .collect();

        let mut consumed = false;
        for waiter in candidates {
            if waiter.offer(Arc::clone(ctx)).await {
                consumed = true;
            }
        }
        consumed
    }
}

impl fmt::Debug for ContinuousSessions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContinuousSessions")
            .field("pending", &self.waiters.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_first_writer_wins() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        let receiver = sessions.start::<u32, _, _>("s", |_, _| async { Ok(()) });
        let provider = sessions.get_provider::<u32>("s").unwrap();

        assert!(provider.push(1));
        assert!(!provider.push(2));
        assert!(!provider.push_error("late"));
        assert_eq!(receiver.recv().await.unwrap(), 1);
        assert!(!sessions.contains("s"));
    }

    #[tokio::test]
    async fn test_wrong_type_lookup_is_none() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        let _receiver = sessions.start::<u32, _, _>("typed", |_, _| async { Ok(()) });
        assert!(sessions.get_provider::<String>("typed").is_none());
        assert!(sessions.get_receiver::<u32>("typed").is_some());
    }

    #[tokio::test]
    async fn test_replacement_cancels_old_waiter() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        let old = sessions.start::<u32, _, _>("dup", |_, _| async { Ok(()) });
        let new = sessions.start::<u32, _, _>("dup", |_, _| async { Ok(()) });

        assert!(matches!(old.recv().await, Err(SessionError::Replaced { .. })));
        assert!(new.is_pending());
        assert!(sessions.contains("dup"));
    }

    #[tokio::test]
    async fn test_callbacks_run_once() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        let receiver = sessions.start::<u32, _, _>("cb", |_, _| async { Ok(()) });
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&calls);
        receiver.on_complete(move |outcome| {
            assert!(outcome.is_err());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(receiver.cancel());
        assert!(!receiver.cancel());
        assert!(!sessions.cancel("cb"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&calls);
        receiver.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropping_wait_cancels() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        let mut wait = tokio_test::task::spawn(sessions.wait::<u32, _, _>("drop-me", |_, _| async { Ok(()) }));
        tokio_test::assert_pending!(wait.poll());
        assert!(sessions.contains("drop-me"));

        drop(wait);
        assert!(!sessions.contains("drop-me"));
    }

    #[tokio::test]
    async fn test_parent_token_cancels_waiters() {
        let token = CancellationToken::new();
        let sessions = ContinuousSessions::new(token.clone());
        let receiver = sessions.start::<u32, _, _>("root", |_, _| async { Ok(()) });

        token.cancel();
        assert!(matches!(receiver.recv().await, Err(SessionError::Cancelled { .. })));
        assert!(sessions.is_empty());
    }

    #[tokio::test]
    async fn test_register_after_cancel_settles_immediately() {
        let token = CancellationToken::new();
        let sessions = ContinuousSessions::new(token.clone());
        token.cancel();

        let receiver = sessions.start::<u32, _, _>("late", |_, _| async { Ok(()) });
        assert!(!receiver.is_pending());
        assert!(sessions.is_empty());
        assert!(!sessions.has_waiters_for(&EventKind::root("Tick")));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let sessions = ContinuousSessions::new(CancellationToken::new());
        assert_ne!(sessions.next_id(), sessions.next_id());
    }
}
