//! Listener invokers.
//!
//! A [`ListenerInvoker`] is built once per registered listener. It captures the
//! listener's per-listener interceptor chains, composed at construction time:
//!
//! ```text
//! Default chain ─► match ─┬─ no ──► Invalid
//!                         └─ yes ─► AfterMatch chain ─► invoke ─► normalize
//! ```
//!
//! For async listeners the part after a successful match is spawned on the
//! manager's runtime and an [`EventResult::Async`] is returned immediately.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span, error};

use ember_core::{AsyncResult, BoxError, EventResult};

use crate::context::{ListenerContext, ProcessingContext};
use crate::error::{DispatchError, ListenerError};
use crate::interceptor::{ListenerLinks, Next, compose};
use crate::listener::EventListener;
use crate::normalizer::ResultNormalizer;

type Outcome = Result<EventResult, BoxError>;
type Step = Next<Arc<ListenerContext>, Outcome>;

// =============================================================================
// ExceptionHandler
// =============================================================================

/// Process-wide handler given first refusal on every listener fault.
///
/// Returning `Ok(Some(result))` substitutes `result` for the failed invocation.
/// Returning `Ok(None)` lets the fault be logged and treated as invalid.
/// Returning `Err` aborts the current event; the error is returned from
/// `push` with the original fault attached.
#[async_trait]
pub trait ExceptionHandler: Send + Sync + 'static {
    /// Handles one listener fault.
    async fn handle(
        &self,
        ctx: Arc<ListenerContext>,
        error: &ListenerError,
    ) -> Result<Option<EventResult>, BoxError>;
}

#[async_trait]
impl<F> ExceptionHandler for F
where
    F: Fn(&ListenerError) -> Result<Option<EventResult>, BoxError> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        _ctx: Arc<ListenerContext>,
        error: &ListenerError,
    ) -> Result<Option<EventResult>, BoxError> {
        self(error)
    }
}

async fn recover(
    handler: Option<&Arc<dyn ExceptionHandler>>,
    ctx: Arc<ListenerContext>,
    error: ListenerError,
) -> Result<EventResult, DispatchError> {
    if let Some(handler) = handler {
        match handler.handle(ctx, &error).await {
            Ok(Some(result)) => {
                debug!(listener = %error.id, "Exception handler substituted a result");
                return Ok(result);
            }
            Ok(None) => {}
            Err(source) => {
                return Err(DispatchError::Handler {
                    source,
                    original: error,
                });
            }
        }
    }
    error!(listener = %error.id, "Listener failed: {}", error.source);
    Ok(EventResult::Invalid)
}

// =============================================================================
// Environment
// =============================================================================

/// Everything an invoker needs from its manager.
#[derive(Clone)]
pub(crate) struct InvokerEnv {
    pub(crate) links: ListenerLinks,
    pub(crate) normalizer: Arc<ResultNormalizer>,
    pub(crate) handler: Option<Arc<dyn ExceptionHandler>>,
    pub(crate) runtime: Handle,
    pub(crate) tasks: TaskTracker,
    pub(crate) shutdown: CancellationToken,
}

// =============================================================================
// ListenerInvoker
// =============================================================================

/// A listener wrapped with its composed interceptor chains.
pub struct ListenerInvoker {
    listener: Arc<dyn EventListener>,
    chain: Step,
    handler: Option<Arc<dyn ExceptionHandler>>,
}

impl ListenerInvoker {
    pub(crate) fn new(listener: Arc<dyn EventListener>, env: &InvokerEnv) -> Self {
        let invoke: Step = Arc::new(|ctx: Arc<ListenerContext>| -> BoxFuture<'static, Outcome> {
            Box::pin(async move {
                let listener = Arc::clone(ctx.listener());
                listener.invoke(ctx).await
            })
        });
        let after_match = compose(env.links.after_match.clone(), invoke);

        let normalizer = Arc::clone(&env.normalizer);
        let settle: Step = Arc::new(move |ctx: Arc<ListenerContext>| -> BoxFuture<'static, Outcome> {
            let after_match = Arc::clone(&after_match);
            let normalizer = Arc::clone(&normalizer);
            Box::pin(async move {
                let result = after_match(ctx).await?;
                normalizer.normalize(result).await
            })
        });

        let terminal = if listener.is_async() {
            Self::detached(settle, env)
        } else {
            Self::inline(settle)
        };

        Self {
            chain: compose(env.links.default.clone(), terminal),
            handler: env.handler.clone(),
            listener,
        }
    }

    /// Match, then run `settle` on the current task.
    fn inline(settle: Step) -> Step {
        Arc::new(move |ctx: Arc<ListenerContext>| -> BoxFuture<'static, Outcome> {
            let settle = Arc::clone(&settle);
            Box::pin(async move {
                if !ctx.listener().matches(Arc::clone(&ctx)).await {
                    return Ok(EventResult::Invalid);
                }
                settle(ctx).await
            })
        })
    }

    /// Match, then spawn `settle` on the manager's runtime.
    fn detached(settle: Step, env: &InvokerEnv) -> Step {
        let env = env.clone();
        Arc::new(move |ctx: Arc<ListenerContext>| -> BoxFuture<'static, Outcome> {
            let settle = Arc::clone(&settle);
            let env = env.clone();
            Box::pin(async move {
                if !ctx.listener().matches(Arc::clone(&ctx)).await {
                    return Ok(EventResult::Invalid);
                }

                let id = ctx.listener().id().to_string();
                let span = debug_span!("async_listener", listener = %id);
                let handler = env.handler.clone();
                let shutdown = env.shutdown.clone();
                let task = async move {
                    let outcome = tokio::select! {
                        _ = shutdown.cancelled() => {
                            debug!("Async listener cancelled by shutdown");
                            return EventResult::Invalid;
                        }
                        outcome = settle(Arc::clone(&ctx)) => outcome,
                    };
                    let error = match outcome {
                        Ok(result) => return result,
                        Err(source) => ListenerError { id, source },
                    };
                    match recover(handler.as_ref(), ctx, error).await {
                        Ok(result) => result,
                        Err(e) => {
                            error!("{e}");
                            EventResult::Invalid
                        }
                    }
                };

                let handle = env.tasks.spawn_on(task.instrument(span), &env.runtime);
                Ok(EventResult::Async(AsyncResult::new(handle)))
            })
        })
    }

    /// Returns the wrapped listener.
    pub fn listener(&self) -> &Arc<dyn EventListener> {
        &self.listener
    }

    /// Returns the listener's ID.
    pub fn id(&self) -> &str {
        self.listener.id()
    }

    /// Returns the listener's priority.
    pub fn priority(&self) -> i32 {
        self.listener.priority()
    }

    /// Returns `true` if the listener runs detached.
    pub fn is_async(&self) -> bool {
        self.listener.is_async()
    }

    /// Runs the listener for one event.
    ///
    /// Listener faults are recovered here; only a failing exception handler
    /// produces an `Err`.
    pub(crate) async fn invoke(
        &self,
        processing: &Arc<ProcessingContext>,
    ) -> Result<EventResult, DispatchError> {
        let ctx = Arc::new(ListenerContext::new(
            Arc::clone(processing),
            Arc::clone(&self.listener),
        ));
        match (self.chain)(Arc::clone(&ctx)).await {
            Ok(result) => Ok(result),
            Err(source) => {
                let error = ListenerError {
                    id: self.id().to_string(),
                    source,
                };
                recover(self.handler.as_ref(), ctx, error).await
            }
        }
    }
}

impl std::fmt::Debug for ListenerInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerInvoker")
            .field("id", &self.id())
            .field("priority", &self.priority())
            .field("is_async", &self.is_async())
            .finish()
    }
}
