//! Interceptor chains.
//!
//! An interceptor wraps a step of event processing. It receives an
//! [`Invocation`] and decides whether to continue by calling
//! [`proceed`](Invocation::proceed); returning without proceeding
//! short-circuits the chain with the interceptor's own value.
//!
//! Two kinds of interceptors exist:
//!
//! - [`ProcessingInterceptor`] wraps the whole listener loop of one event.
//! - [`ListenerInterceptor`] wraps one listener, at one of two
//!   [`ListenerPoint`]s: [`Default`](ListenerPoint::Default) around the match
//!   test and [`AfterMatch`](ListenerPoint::AfterMatch) around the invoke only.
//!
//! Chains are composed right-to-left into a single function once, when the
//! manager (or a listener invoker) is built, not walked per event.
//!
//! ```rust,ignore
//! struct Timing;
//!
//! #[async_trait]
//! impl ProcessingInterceptor for Timing {
//!     async fn intercept(&self, invocation: ProcessingInvocation) -> Result<(), BoxError> {
//!         let start = Instant::now();
//!         let result = invocation.proceed().await;
//!         debug!(elapsed = ?start.elapsed(), "Event processed");
//!         result
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use ember_core::{BoxError, EventResult};

use crate::context::{ListenerContext, ProcessingContext};

/// A composed chain: one call runs every interceptor and the terminal step.
pub type Next<C, R> = Arc<dyn Fn(C) -> BoxFuture<'static, R> + Send + Sync>;

/// One link of a chain before composition.
type Link<C, R> = Arc<dyn Fn(Invocation<C, R>) -> BoxFuture<'static, R> + Send + Sync>;

// =============================================================================
// Invocation
// =============================================================================

/// The state handed to an interceptor: the context plus the rest of the chain.
pub struct Invocation<C, R> {
    context: C,
    next: Next<C, R>,
}

impl<C, R> Invocation<C, R> {
    /// Returns the context of this invocation.
    pub fn context(&self) -> &C {
        &self.context
    }

    /// Runs the rest of the chain.
    pub fn proceed(self) -> BoxFuture<'static, R> {
        (self.next)(self.context)
    }

    /// Runs the rest of the chain with a substitute context.
    pub fn proceed_with(self, context: C) -> BoxFuture<'static, R> {
        (self.next)(context)
    }
}

impl<C: fmt::Debug, R> fmt::Debug for Invocation<C, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Composes `links` around `terminal`, first link outermost.
///
/// An empty list yields `terminal` itself.
pub(crate) fn compose<C, R>(links: Vec<Link<C, R>>, terminal: Next<C, R>) -> Next<C, R>
where
    C: Send + 'static,
    R: Send + 'static,
{
    links.into_iter().rev().fold(terminal, |next, link| -> Next<C, R> {
        Arc::new(move |context: C| {
            link(Invocation {
                context,
                next: Arc::clone(&next),
            })
        })
    })
}

// =============================================================================
// Interceptor traits
// =============================================================================

/// Invocation of a [`ProcessingInterceptor`].
pub type ProcessingInvocation = Invocation<Arc<ProcessingContext>, Result<(), BoxError>>;

/// Invocation of a [`ListenerInterceptor`].
pub type ListenerInvocation = Invocation<Arc<ListenerContext>, Result<EventResult, BoxError>>;

/// Wraps the whole listener loop of one event.
///
/// An `Err` escaping this chain is returned from `push` as a batch-level
/// failure.
#[async_trait]
pub trait ProcessingInterceptor: Send + Sync + 'static {
    /// Ordering key; lower runs outermost.
    fn priority(&self) -> i32 {
        0
    }

    /// Intercepts one event's listener loop.
    async fn intercept(&self, invocation: ProcessingInvocation) -> Result<(), BoxError>;
}

/// Where a [`ListenerInterceptor`] attaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ListenerPoint {
    /// Around the match test (and everything after it).
    #[default]
    Default,
    /// Around the invoke only; skipped when the match test fails.
    AfterMatch,
}

/// Wraps one listener's match/invoke step.
#[async_trait]
pub trait ListenerInterceptor: Send + Sync + 'static {
    /// The point this interceptor attaches to.
    fn point(&self) -> ListenerPoint {
        ListenerPoint::Default
    }

    /// Ordering key; lower runs outermost.
    fn priority(&self) -> i32 {
        0
    }

    /// Intercepts one listener invocation.
    async fn intercept(&self, invocation: ListenerInvocation) -> Result<EventResult, BoxError>;
}

// =============================================================================
// Closure adapters
// =============================================================================

/// A [`ProcessingInterceptor`] backed by a closure.
pub struct FnProcessingInterceptor<F> {
    priority: i32,
    f: F,
}

impl<F, Fut> FnProcessingInterceptor<F>
where
    F: Fn(ProcessingInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    /// Wraps `f`, ordered among process interceptors by `priority`.
    pub fn new(priority: i32, f: F) -> Self {
        Self { priority, f }
    }
}

#[async_trait]
impl<F, Fut> ProcessingInterceptor for FnProcessingInterceptor<F>
where
    F: Fn(ProcessingInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    fn priority(&self) -> i32 {
        self.priority
    }

    async fn intercept(&self, invocation: ProcessingInvocation) -> Result<(), BoxError> {
        (self.f)(invocation).await
    }
}

/// A [`ListenerInterceptor`] backed by a closure.
pub struct FnListenerInterceptor<F> {
    point: ListenerPoint,
    priority: i32,
    f: F,
}

impl<F, Fut> FnListenerInterceptor<F>
where
    F: Fn(ListenerInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EventResult, BoxError>> + Send + 'static,
{
    /// Wraps `f` at `point`, ordered among that point's interceptors by `priority`.
    pub fn new(point: ListenerPoint, priority: i32, f: F) -> Self {
        Self { point, priority, f }
    }
}

#[async_trait]
impl<F, Fut> ListenerInterceptor for FnListenerInterceptor<F>
where
    F: Fn(ListenerInvocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<EventResult, BoxError>> + Send + 'static,
{
    fn point(&self) -> ListenerPoint {
        self.point
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn intercept(&self, invocation: ListenerInvocation) -> Result<EventResult, BoxError> {
        (self.f)(invocation).await
    }
}

// =============================================================================
// Registry
// =============================================================================

/// An ID-keyed, priority-ordered set of interceptors.
///
/// Inserting under an existing ID replaces the earlier interceptor in place.
pub struct InterceptorSet<T: ?Sized> {
    entries: Vec<(String, Arc<T>)>,
    index: HashMap<String, usize>,
}

impl<T: ?Sized> Default for InterceptorSet<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<T: ?Sized> InterceptorSet<T> {
    /// Inserts `interceptor` under `id`.
    pub fn insert(&mut self, id: impl Into<String>, interceptor: Arc<T>) {
        let id = id.into();
        match self.index.get(&id) {
            Some(&pos) => {
                warn!(interceptor = %id, "Duplicate interceptor ID, replacing earlier entry");
                self.entries[pos].1 = interceptor;
            }
            None => {
                self.index.insert(id.clone(), self.entries.len());
                self.entries.push((id, interceptor));
            }
        }
    }

    /// Returns the number of interceptors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the IDs in insertion order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    /// Returns the interceptors stably sorted by `priority`.
    fn sorted_by(&self, priority: impl Fn(&T) -> i32) -> Vec<Arc<T>> {
        let mut sorted: Vec<Arc<T>> = self.entries.iter().map(|(_, i)| Arc::clone(i)).collect();
        sorted.sort_by_key(|i| priority(&**i));
        sorted
    }
}

impl<T: ?Sized> fmt::Debug for InterceptorSet<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}

impl InterceptorSet<dyn ProcessingInterceptor> {
    /// Builds the whole-process chain around `terminal`.
    pub(crate) fn chain(
        &self,
        terminal: Next<Arc<ProcessingContext>, Result<(), BoxError>>,
    ) -> Next<Arc<ProcessingContext>, Result<(), BoxError>> {
        let links = self
            .sorted_by(|i| i.priority())
            .into_iter()
            .map(|interceptor| -> Link<_, _> {
                Arc::new(
                    move |invocation: ProcessingInvocation| -> BoxFuture<'static, Result<(), BoxError>> {
                        let interceptor = Arc::clone(&interceptor);
                        Box::pin(async move { interceptor.intercept(invocation).await })
                    },
                )
            })
            .collect();
        compose(links, terminal)
    }
}

/// Per-listener links, grouped by point.
#[derive(Clone, Default)]
pub(crate) struct ListenerLinks {
    pub(crate) default: Vec<Link<Arc<ListenerContext>, Result<EventResult, BoxError>>>,
    pub(crate) after_match: Vec<Link<Arc<ListenerContext>, Result<EventResult, BoxError>>>,
}

impl InterceptorSet<dyn ListenerInterceptor> {
    /// Groups the interceptors by point, each group sorted by priority.
    pub(crate) fn links(&self) -> ListenerLinks {
        let mut links = ListenerLinks::default();
        for interceptor in self.sorted_by(|i| i.priority()) {
            let point = interceptor.point();
            let link: Link<_, _> = Arc::new(
                move |invocation: ListenerInvocation| -> BoxFuture<'static, Result<EventResult, BoxError>> {
                    let interceptor = Arc::clone(&interceptor);
                    Box::pin(async move { interceptor.intercept(invocation).await })
                },
            );
            match point {
                ListenerPoint::Default => links.default.push(link),
                ListenerPoint::AfterMatch => links.after_match.push(link),
            }
        }
        links
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn link(log: &Log, name: &'static str, proceed: bool) -> Link<u32, u32> {
        let log = Arc::clone(log);
        Arc::new(move |invocation: Invocation<u32, u32>| -> BoxFuture<'static, u32> {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push(format!("{name}:before"));
                if !proceed {
                    return 0;
                }
                let value = invocation.proceed().await;
                log.lock().push(format!("{name}:after"));
                value + 1
            })
        })
    }

    fn terminal(log: &Log) -> Next<u32, u32> {
        let log = Arc::clone(log);
        Arc::new(move |context: u32| -> BoxFuture<'static, u32> {
            let log = Arc::clone(&log);
            Box::pin(async move {
                log.lock().push("terminal".into());
                context * 10
            })
        })
    }

    #[tokio::test]
    async fn test_chain_runs_in_order() {
        let log = Log::default();
        let chain = compose(
            vec![link(&log, "a", true), link(&log, "b", true)],
            terminal(&log),
        );

        assert_eq!(chain(4).await, 42);
        assert_eq!(
            *log.lock(),
            ["a:before", "b:before", "terminal", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn test_chain_short_circuits() {
        let log = Log::default();
        let chain = compose(
            vec![link(&log, "a", true), link(&log, "b", false)],
            terminal(&log),
        );

        assert_eq!(chain(4).await, 1);
        assert!(!log.lock().iter().any(|e| e == "terminal"));
    }

    #[tokio::test]
    async fn test_empty_chain_is_terminal() {
        let log = Log::default();
        let chain = compose(Vec::new(), terminal(&log));
        assert_eq!(chain(3).await, 30);
    }

    struct Named(i32);

    #[async_trait]
    impl ProcessingInterceptor for Named {
        fn priority(&self) -> i32 {
            self.0
        }

        async fn intercept(&self, invocation: ProcessingInvocation) -> Result<(), BoxError> {
            invocation.proceed().await
        }
    }

    #[test]
    fn test_set_replaces_duplicate_ids() {
        let mut set: InterceptorSet<dyn ProcessingInterceptor> = InterceptorSet::default();
        set.insert("auth", Arc::new(Named(5)));
        set.insert("timing", Arc::new(Named(1)));
        set.insert("auth", Arc::new(Named(0)));

        assert_eq!(set.len(), 2);
        assert_eq!(set.ids().collect::<Vec<_>>(), ["auth", "timing"]);
        let priorities: Vec<i32> = set.sorted_by(|i| i.priority()).iter().map(|i| i.priority()).collect();
        assert_eq!(priorities, [0, 1]);
    }
}
