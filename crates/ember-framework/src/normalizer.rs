//! Reactive result normalization.
//!
//! Listeners may return a [`Reactive`] payload instead of a plain value. Before
//! a result is appended, the [`ResultNormalizer`] materializes such payloads:
//!
//! | Shape | Materialized as | Enabled by |
//! |---|---|---|
//! | [`ReactiveKind::Future`] | the value, or no content | always |
//! | [`ReactiveKind::Stream`] | `Vec<Content>` of every item | `reactive-stream` |
//! | [`ReactiveKind::Task`] | the task's value | `reactive-tokio` |
//! | [`ReactiveKind::Channel`] | `Vec<Content>` of every message | `reactive-tokio` |
//! | [`ReactiveKind::UnboundedChannel`] | `Vec<Content>` of every message | `reactive-tokio` |
//!
//! A shape without a registered materializer is passed through unchanged, with
//! a single warning per shape. Content that is not a [`Reactive`] is never
//! touched.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tracing::{trace, warn};

use ember_core::{BoxError, Content, EventResult, Reactive, ReactiveKind};

/// The outcome of materializing one payload.
pub type Materialized = BoxFuture<'static, Result<Option<Content>, BoxError>>;

/// Converts one reactive shape into a plain value.
pub trait Materializer: Send + Sync + 'static {
    /// The shape this materializer handles.
    fn kind(&self) -> ReactiveKind;

    /// Awaits `payload` and returns its value.
    ///
    /// Only called with payloads whose [`kind`](Reactive::kind) equals
    /// [`Materializer::kind`].
    fn materialize(&self, payload: Reactive) -> Materialized;
}

// =============================================================================
// Built-in materializers
// =============================================================================

fn mismatch(expected: ReactiveKind, got: &Reactive) -> BoxError {
    format!("materializer for '{expected}' received a '{}' payload", got.kind()).into()
}

struct FutureMaterializer;

impl Materializer for FutureMaterializer {
    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Future
    }

    fn materialize(&self, payload: Reactive) -> Materialized {
        match payload {
            Reactive::Future(future) => future,
            other => {
                let err = mismatch(self.kind(), &other);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

#[cfg(feature = "reactive-stream")]
struct StreamMaterializer;

#[cfg(feature = "reactive-stream")]
impl Materializer for StreamMaterializer {
    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Stream
    }

    fn materialize(&self, payload: Reactive) -> Materialized {
        use futures::TryStreamExt;

        match payload {
            Reactive::Stream(stream) => Box::pin(async move {
                let items: Vec<Content> = stream.try_collect().await?;
                Ok(Some(Box::new(items) as Content))
            }),
            other => {
                let err = mismatch(self.kind(), &other);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

#[cfg(feature = "reactive-tokio")]
struct TaskMaterializer;

#[cfg(feature = "reactive-tokio")]
impl Materializer for TaskMaterializer {
    fn kind(&self) -> ReactiveKind {
        ReactiveKind::Task
    }

    fn materialize(&self, payload: Reactive) -> Materialized {
        match payload {
            Reactive::Task(handle) => Box::pin(async move { Ok(Some(handle.await?)) }),
            other => {
                let err = mismatch(self.kind(), &other);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

#[cfg(feature = "reactive-tokio")]
struct ChannelMaterializer(ReactiveKind);

#[cfg(feature = "reactive-tokio")]
impl Materializer for ChannelMaterializer {
    fn kind(&self) -> ReactiveKind {
        self.0
    }

    fn materialize(&self, payload: Reactive) -> Materialized {
        match payload {
            Reactive::Channel(mut rx) => Box::pin(async move {
                let mut items: Vec<Content> = Vec::new();
                while let Some(item) = rx.recv().await {
                    items.push(item);
                }
                Ok(Some(Box::new(items) as Content))
            }),
            Reactive::UnboundedChannel(mut rx) => Box::pin(async move {
                let mut items: Vec<Content> = Vec::new();
                while let Some(item) = rx.recv().await {
                    items.push(item);
                }
                Ok(Some(Box::new(items) as Content))
            }),
            other => {
                let err = mismatch(self.kind(), &other);
                Box::pin(async move { Err(err) })
            }
        }
    }
}

/// A [`Materializer`] backed by a closure.
pub struct FnMaterializer<F> {
    kind: ReactiveKind,
    f: F,
}

impl<F> FnMaterializer<F>
where
    F: Fn(Reactive) -> Materialized + Send + Sync + 'static,
{
    /// Wraps `f` as the materializer for payloads of `kind`.
    pub fn new(kind: ReactiveKind, f: F) -> Self {
        Self { kind, f }
    }
}

impl<F> Materializer for FnMaterializer<F>
where
    F: Fn(Reactive) -> Materialized + Send + Sync + 'static,
{
    fn kind(&self) -> ReactiveKind {
        self.kind
    }

    fn materialize(&self, payload: Reactive) -> Materialized {
        (self.f)(payload)
    }
}

// =============================================================================
// ResultNormalizer
// =============================================================================

/// Registry of materializers, keyed by reactive shape.
pub struct ResultNormalizer {
    enabled: bool,
    materializers: HashMap<ReactiveKind, Arc<dyn Materializer>>,
    warned: Mutex<HashSet<ReactiveKind>>,
}

impl ResultNormalizer {
    /// Registers every materializer enabled at build time.
    pub fn detect() -> Self {
        let builder = Self::builder().materializer(FutureMaterializer);

        #[cfg(feature = "reactive-stream")]
        let builder = builder.materializer(StreamMaterializer);

        #[cfg(feature = "reactive-tokio")]
        let builder = builder
            .materializer(TaskMaterializer)
            .materializer(ChannelMaterializer(ReactiveKind::Channel))
            .materializer(ChannelMaterializer(ReactiveKind::UnboundedChannel));

        let normalizer = builder.build();
        trace!(kinds = ?normalizer.supported().collect::<Vec<_>>(), "Detected reactive materializers");
        normalizer
    }

    /// A normalizer that passes every result through untouched.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            materializers: HashMap::new(),
            warned: Mutex::default(),
        }
    }

    /// Starts an empty registry.
    pub fn builder() -> ResultNormalizerBuilder {
        ResultNormalizerBuilder {
            materializers: HashMap::new(),
        }
    }

    /// Returns `true` if payloads of `kind` are materialized.
    pub fn supports(&self, kind: ReactiveKind) -> bool {
        self.enabled && self.materializers.contains_key(&kind)
    }

    /// Returns the materialized shapes.
    pub fn supported(&self) -> impl Iterator<Item = ReactiveKind> + '_ {
        ReactiveKind::ALL.into_iter().filter(|k| self.supports(*k))
    }

    /// Materializes the payload of `result`, if it is a supported [`Reactive`].
    pub async fn normalize(&self, result: EventResult) -> Result<EventResult, BoxError> {
        if !self.enabled {
            return Ok(result);
        }
        let (content, truncated) = match result {
            EventResult::Value {
                content: Some(content),
                truncated,
            } => (content, truncated),
            other => return Ok(other),
        };
        let reactive = match content.downcast::<Reactive>() {
            Ok(reactive) => *reactive,
            Err(content) => {
                return Ok(EventResult::Value {
                    content: Some(content),
                    truncated,
                });
            }
        };

        let kind = reactive.kind();
        let Some(materializer) = self.materializers.get(&kind) else {
            if self.warned.lock().insert(kind) {
                warn!(
                    kind = %kind,
                    "No materializer registered for reactive payload, passing it through unmaterialized"
                );
            }
            return Ok(EventResult::Value {
                content: Some(Box::new(reactive)),
                truncated,
            });
        };

        trace!(kind = %kind, "Materializing reactive result");
        let content = materializer.materialize(reactive).await?;
        Ok(EventResult::Value { content, truncated })
    }
}

impl Default for ResultNormalizer {
    fn default() -> Self {
        Self::detect()
    }
}

impl fmt::Debug for ResultNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultNormalizer")
            .field("enabled", &self.enabled)
            .field("supported", &self.supported().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`ResultNormalizer`].
pub struct ResultNormalizerBuilder {
    materializers: HashMap<ReactiveKind, Arc<dyn Materializer>>,
}

impl ResultNormalizerBuilder {
    /// Registers `materializer`, replacing any earlier one for the same shape.
    pub fn materializer(mut self, materializer: impl Materializer) -> Self {
        self.materializers
            .insert(materializer.kind(), Arc::new(materializer));
        self
    }

    /// Finishes the registry.
    pub fn build(self) -> ResultNormalizer {
        ResultNormalizer {
            enabled: true,
            materializers: self.materializers,
            warned: Mutex::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_plain_values_pass_through() {
        let normalizer = ResultNormalizer::detect();
        let result = normalizer.normalize(EventResult::of(7u32).truncated()).await.unwrap();
        assert!(result.is_truncated());
        assert_eq!(result.content_as::<u32>(), Some(&7));

        assert!(normalizer.normalize(EventResult::invalid()).await.unwrap().is_invalid());
    }

    #[tokio::test]
    async fn test_future_is_materialized() {
        let normalizer = ResultNormalizer::detect();
        let result = EventResult::reactive(Reactive::future(async { "done".to_string() }));
        let result = normalizer.normalize(result).await.unwrap();
        assert_eq!(result.content_as::<String>().map(String::as_str), Some("done"));
    }

    #[tokio::test]
    async fn test_failed_future_is_an_error() {
        let normalizer = ResultNormalizer::detect();
        let result = EventResult::reactive(Reactive::try_future(async {
            Err::<u8, _>(std::io::Error::other("boom"))
        }));
        assert!(normalizer.normalize(result).await.is_err());
    }

    #[cfg(feature = "reactive-stream")]
    #[tokio::test]
    async fn test_stream_is_collected() {
        let normalizer = ResultNormalizer::detect();
        let result = EventResult::reactive(Reactive::stream(futures::stream::iter([1u8, 2, 3])));
        let result = normalizer.normalize(result).await.unwrap();

        let items = result.content_as::<Vec<Content>>().unwrap();
        let values: Vec<u8> = items.iter().filter_map(|c| c.downcast_ref::<u8>().copied()).collect();
        assert_eq!(values, [1, 2, 3]);
    }

    #[cfg(feature = "reactive-tokio")]
    #[tokio::test]
    async fn test_channel_is_drained() {
        let normalizer = ResultNormalizer::detect();
        let (tx, rx) = mpsc::channel::<Content>(4);
        tokio::spawn(async move {
            for i in 0..3u8 {
                let _ = tx.send(Box::new(i)).await;
            }
        });

        let result = normalizer
            .normalize(EventResult::reactive(Reactive::Channel(rx)))
            .await
            .unwrap();
        assert_eq!(result.content_as::<Vec<Content>>().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_unsupported_shape_passes_through() {
        let normalizer = ResultNormalizer::builder().build();
        for _ in 0..2 {
            let (_tx, rx) = mpsc::unbounded_channel::<Content>();
            let result = normalizer
                .normalize(EventResult::reactive(Reactive::UnboundedChannel(rx)))
                .await
                .unwrap();
            assert!(result.content_as::<Reactive>().is_some());
        }
        assert_eq!(normalizer.warned.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_custom_materializer() {
        let normalizer = ResultNormalizer::builder()
            .materializer(FnMaterializer::new(ReactiveKind::Future, |_| -> Materialized {
                Box::pin(async { Ok(Some(Box::new("overridden") as Content)) })
            }))
            .build();
        let result = normalizer
            .normalize(EventResult::reactive(Reactive::future(async { 1u8 })))
            .await
            .unwrap();
        assert_eq!(result.content_as::<&str>(), Some(&"overridden"));
    }
}
