//! Listener results.
//!
//! Every listener invocation produces an [`EventResult`]:
//!
//! - [`EventResult::Invalid`] contributes nothing to the processing result.
//! - [`EventResult::Value`] carries optional content and may be *truncated*,
//!   which stops the remaining listeners for the current event.
//! - [`EventResult::Async`] wraps a listener that is still running in its own
//!   task; its value is appended once the task completes.
//!
//! Content may be a [`Reactive`] payload (a future, stream, task or channel).
//! The result normalizer materializes such payloads into plain values before
//! they are appended.

use std::any::Any;
use std::fmt;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};

use crate::error::BoxError;

/// Type-erased result content.
pub type Content = Box<dyn Any + Send>;

// ============================================================================
// EventResult
// ============================================================================

/// The outcome of one listener invocation.
pub enum EventResult {
    /// No contribution.
    Invalid,
    /// A plain value, possibly truncating further dispatch.
    Value {
        /// The listener's content, if any.
        content: Option<Content>,
        /// Whether the remaining listeners must be skipped.
        truncated: bool,
    },
    /// A listener still running in its own task.
    Async(AsyncResult),
}

impl EventResult {
    /// Returns the invalid result.
    pub fn invalid() -> Self {
        Self::Invalid
    }

    /// Returns a value result without content.
    pub fn empty() -> Self {
        Self::Value {
            content: None,
            truncated: false,
        }
    }

    /// Returns a value result wrapping `value`.
    pub fn of<T: Any + Send>(value: T) -> Self {
        Self::Value {
            content: Some(Box::new(value)),
            truncated: false,
        }
    }

    /// Returns a value result wrapping already type-erased content.
    pub fn of_content(content: Option<Content>) -> Self {
        Self::Value {
            content,
            truncated: false,
        }
    }

    /// Returns a value result wrapping a reactive payload.
    pub fn reactive(reactive: Reactive) -> Self {
        Self::of(reactive)
    }

    /// Returns a truncating result without content.
    pub fn truncate() -> Self {
        Self::Value {
            content: None,
            truncated: true,
        }
    }

    /// Marks this result as truncating. Invalid results become empty truncating values.
    pub fn truncated(self) -> Self {
        match self {
            Self::Value { content, .. } => Self::Value {
                content,
                truncated: true,
            },
            Self::Invalid => Self::truncate(),
            Self::Async(a) => Self::Async(a),
        }
    }

    /// Returns `true` for [`EventResult::Invalid`].
    pub fn is_invalid(&self) -> bool {
        matches!(self, Self::Invalid)
    }

    /// Returns `true` for [`EventResult::Async`].
    pub fn is_async(&self) -> bool {
        matches!(self, Self::Async(_))
    }

    /// Returns `true` if the remaining listeners must be skipped.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Value { truncated: true, .. })
    }

    /// Returns the content, if any.
    pub fn content(&self) -> Option<&Content> {
        match self {
            Self::Value { content, .. } => content.as_ref(),
            _ => None,
        }
    }

    /// Returns the content downcast to `T`.
    pub fn content_as<T: Any>(&self) -> Option<&T> {
        self.content().and_then(|c| c.downcast_ref::<T>())
    }

    /// Removes and returns the content.
    pub fn take_content(&mut self) -> Option<Content> {
        match self {
            Self::Value { content, .. } => content.take(),
            _ => None,
        }
    }

    /// Consumes the result and returns its content downcast to `T`.
    pub fn into_content<T: Any>(self) -> Option<T> {
        match self {
            Self::Value {
                content: Some(content),
                ..
            } => content.downcast::<T>().ok().map(|b| *b),
            _ => None,
        }
    }
}

impl fmt::Debug for EventResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid => f.write_str("Invalid"),
            Self::Value { content, truncated } => f
                .debug_struct("Value")
                .field("has_content", &content.is_some())
                .field("truncated", truncated)
                .finish(),
            Self::Async(a) => a.fmt(f),
        }
    }
}

// ============================================================================
// AsyncResult
// ============================================================================

/// Handle to a listener invocation running in its own task.
pub struct AsyncResult {
    handle: JoinHandle<EventResult>,
}

impl AsyncResult {
    /// Wraps the join handle of a spawned listener task.
    pub fn new(handle: JoinHandle<EventResult>) -> Self {
        Self { handle }
    }

    /// Returns `true` if the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Aborts the task.
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Waits for the task and returns its result.
    pub async fn join(self) -> Result<EventResult, JoinError> {
        self.handle.await
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Async")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

// ============================================================================
// Reactive payloads
// ============================================================================

/// Type tag of a [`Reactive`] payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReactiveKind {
    /// A single deferred value.
    Future,
    /// A cold multi-value stream.
    Stream,
    /// A spawned tokio task.
    Task,
    /// A bounded tokio channel.
    Channel,
    /// An unbounded tokio channel.
    UnboundedChannel,
}

impl ReactiveKind {
    /// All known kinds.
    pub const ALL: [ReactiveKind; 5] = [
        Self::Future,
        Self::Stream,
        Self::Task,
        Self::Channel,
        Self::UnboundedChannel,
    ];

    /// Returns `true` if the payload yields a collected list when materialized.
    pub fn is_multi_valued(self) -> bool {
        matches!(self, Self::Stream | Self::Channel | Self::UnboundedChannel)
    }

    /// Returns a short name for logging.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Future => "future",
            Self::Stream => "stream",
            Self::Task => "task",
            Self::Channel => "channel",
            Self::UnboundedChannel => "unbounded-channel",
        }
    }
}

impl fmt::Display for ReactiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deferred or streaming listener return value.
///
/// Single-valued payloads materialize into their value (or no content);
/// multi-valued payloads materialize into a `Vec<Content>` of every item.
pub enum Reactive {
    /// A deferred computation producing at most one value.
    Future(BoxFuture<'static, Result<Option<Content>, BoxError>>),
    /// A stream of values, collected until it ends.
    Stream(BoxStream<'static, Result<Content, BoxError>>),
    /// A spawned task producing one value.
    Task(JoinHandle<Content>),
    /// A bounded channel, drained until every sender is dropped.
    Channel(mpsc::Receiver<Content>),
    /// An unbounded channel, drained until every sender is dropped.
    UnboundedChannel(mpsc::UnboundedReceiver<Content>),
}

impl Reactive {
    /// Wraps an infallible future.
    pub fn future<F, T>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
        T: Any + Send,
    {
        Self::Future(Box::pin(async move { Ok(Some(Box::new(future.await) as Content)) }))
    }

    /// Wraps a fallible future.
    pub fn try_future<F, T, E>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
        T: Any + Send,
        E: Into<BoxError>,
    {
        Self::Future(Box::pin(async move {
            future
                .await
                .map(|v| Some(Box::new(v) as Content))
                .map_err(Into::into)
        }))
    }

    /// Wraps an infallible stream.
    pub fn stream<S, T>(stream: S) -> Self
    where
        S: futures::Stream<Item = T> + Send + 'static,
        T: Any + Send,
    {
        use futures::StreamExt;
        Self::Stream(stream.map(|v| Ok(Box::new(v) as Content)).boxed())
    }

    /// Returns the payload's type tag.
    pub fn kind(&self) -> ReactiveKind {
        match self {
            Self::Future(_) => ReactiveKind::Future,
            Self::Stream(_) => ReactiveKind::Stream,
            Self::Task(_) => ReactiveKind::Task,
            Self::Channel(_) => ReactiveKind::Channel,
            Self::UnboundedChannel(_) => ReactiveKind::UnboundedChannel,
        }
    }
}

impl fmt::Debug for Reactive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Reactive").field(&self.kind()).finish()
    }
}
