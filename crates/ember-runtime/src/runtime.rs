//! Runtime wiring.
//!
//! [`EmberRuntime`] loads configuration, initializes logging and builds an
//! [`EventListenerManager`]. When `dispatch.worker_threads` is set, the
//! manager gets a dedicated multi-thread tokio runtime for its async
//! listeners; otherwise it shares the runtime that builds it.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use ember_runtime::EmberRuntime;
//!
//! let runtime = EmberRuntime::builder()
//!     .config_file("config/ember.toml")
//!     .manager(|m| m.listener(greet).process_interceptor("timing", Timing))
//!     .build()?;
//!
//! let result = runtime.push(BoxedEvent::new(message)).await?;
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};
use tokio::signal;
use tracing::{debug, info};

use ember_core::BoxedEvent;
use ember_framework::{
    DispatchResult, EventListenerManager, EventListenerManagerBuilder, ProcessingResult,
    ResultNormalizer,
};

use crate::config::{ConfigLoader, EmberConfig, validate_config};
use crate::error::RuntimeResult;
use crate::logging;

type Configure = Box<dyn FnOnce(EventListenerManagerBuilder) -> EventListenerManagerBuilder>;

/// A configured listener manager together with its worker runtime.
pub struct EmberRuntime {
    config: EmberConfig,
    manager: Arc<EventListenerManager>,
    /// Present when `dispatch.worker_threads` is set.
    dispatch: Option<Runtime>,
}

impl EmberRuntime {
    /// Creates a runtime builder that loads configuration from the default locations.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Builds a runtime from an already loaded configuration.
    pub fn from_config(config: EmberConfig) -> RuntimeResult<Self> {
        Self::builder().config(config).build()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &EmberConfig {
        &self.config
    }

    /// Returns the listener manager.
    pub fn manager(&self) -> &Arc<EventListenerManager> {
        &self.manager
    }

    /// Returns the runtime async listeners are spawned on.
    pub fn handle(&self) -> &Handle {
        self.manager.runtime()
    }

    /// Returns `true` if async listeners run on a dedicated worker runtime.
    pub fn has_dedicated_runtime(&self) -> bool {
        self.dispatch.is_some()
    }

    /// Dispatches one event through the manager.
    pub async fn push(&self, event: BoxedEvent) -> DispatchResult<ProcessingResult> {
        self.manager.push(event).await
    }

    /// Shuts the manager down, cancelling async listeners and pending sessions.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    /// Runs until Ctrl+C (or SIGTERM on Unix), then shuts down.
    pub async fn run(&self) -> RuntimeResult<()> {
        info!("Ember runtime is now running. Press Ctrl+C to stop.");
        wait_for_signal().await?;
        self.shutdown().await;
        Ok(())
    }

    /// Runs until `shutdown` completes, then shuts down.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        shutdown.await;
        self.shutdown().await;
    }
}

impl Drop for EmberRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.dispatch.take() {
            debug!("Stopping dispatch runtime");
            runtime.shutdown_background();
        }
    }
}

impl std::fmt::Debug for EmberRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmberRuntime")
            .field("config", &self.config)
            .field("manager", &self.manager)
            .field("dedicated_runtime", &self.has_dedicated_runtime())
            .finish()
    }
}

async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for [`EmberRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    config: Option<EmberConfig>,
    init_logging: bool,
    configure: Vec<Configure>,
}

impl RuntimeBuilder {
    /// Creates a builder searching the current directory for configuration.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            config: None,
            init_logging: true,
            configure: Vec::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration over every loaded source.
    pub fn merge(mut self, config: EmberConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Uses `config` as is instead of loading one.
    pub fn config(mut self, config: EmberConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Skips installing the global tracing subscriber.
    pub fn without_logging(mut self) -> Self {
        self.init_logging = false;
        self
    }

    /// Customizes the listener manager.
    ///
    /// Runs after the configuration has been applied, so it can override the
    /// configured runtime or normalizer.
    pub fn manager<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(EventListenerManagerBuilder) -> EventListenerManagerBuilder + 'static,
    {
        self.configure.push(Box::new(configure));
        self
    }

    /// Builds the runtime.
    ///
    /// Without `dispatch.worker_threads` this must be called within a tokio runtime.
    pub fn build(self) -> RuntimeResult<EmberRuntime> {
        let config = match self.config {
            Some(config) => config,
            None => self.config_loader.load()?,
        };
        validate_config(&config)?;

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let dispatch = match config.dispatch.worker_threads {
            Some(workers) => Some(
                tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(workers)
                    .thread_name(config.dispatch.thread_name.clone())
                    .enable_all()
                    .build()?,
            ),
            None => None,
        };

        let mut builder = EventListenerManager::builder();
        if let Some(runtime) = &dispatch {
            builder = builder.runtime(runtime.handle().clone());
        }
        if !config.dispatch.materialize_results {
            builder = builder.normalizer(ResultNormalizer::disabled());
        }
        for configure in self.configure {
            builder = configure(builder);
        }

        let manager = match builder.build() {
            Ok(manager) => manager,
            Err(e) => {
                if let Some(runtime) = dispatch {
                    runtime.shutdown_background();
                }
                return Err(e.into());
            }
        };

        info!(
            log_level = %config.logging.level,
            worker_threads = ?config.dispatch.worker_threads,
            materialize_results = config.dispatch.materialize_results,
            "Runtime initialized from configuration"
        );

        Ok(EmberRuntime {
            config,
            manager: Arc::new(manager),
            dispatch,
        })
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    use ember_core::{Event, EventKind, EventResult, Reactive};
    use ember_framework::FnListener;

    use crate::error::RuntimeError;

    struct Tick(EventKind);

    impl Event for Tick {
        fn kind(&self) -> &EventKind {
            &self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn tick() -> BoxedEvent {
        BoxedEvent::new(Tick(EventKind::root("Tick")))
    }

    fn builder(config: EmberConfig) -> RuntimeBuilder {
        RuntimeBuilder::new().config(config).without_logging()
    }

    #[tokio::test]
    async fn test_shares_current_runtime_by_default() {
        let runtime = builder(EmberConfig::default())
            .manager(|m| m.listener(FnListener::builder("l").handle(|_| async { EventResult::of(1u8) })))
            .build()
            .unwrap();

        assert!(!runtime.has_dedicated_runtime());
        let result = runtime.push(tick()).await.unwrap();
        assert_eq!(result.contents::<u8>(), [1]);
    }

    #[test]
    fn test_dedicated_runtime_runs_async_listeners() {
        let mut config = EmberConfig::default();
        config.dispatch.worker_threads = Some(2);
        config.dispatch.thread_name = "ember-test".to_string();

        // No ambient runtime is needed to build.
        let runtime = builder(config)
            .manager(|m| {
                m.listener(FnListener::builder("where").is_async(true).handle(|_| async {
                    EventResult::of(std::thread::current().name().map(str::to_string))
                }))
            })
            .build()
            .unwrap();
        assert!(runtime.has_dedicated_runtime());

        let caller = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let names = caller.block_on(async {
            let result = runtime.push(tick()).await.unwrap();
            result.wait_async().await;
            result.contents::<Option<String>>()
        });
        assert_eq!(names, [Some("ember-test".to_string())]);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut config = EmberConfig::default();
        config.dispatch.worker_threads = Some(0);
        let err = builder(config).build().unwrap_err();
        assert!(matches!(err, RuntimeError::Config(_)));
    }

    #[tokio::test]
    async fn test_materialization_can_be_disabled() {
        let mut config = EmberConfig::default();
        config.dispatch.materialize_results = false;
        let runtime = builder(config)
            .manager(|m| {
                m.listener(FnListener::builder("deferred").handle(|_| async {
                    Reactive::future(async { 5u32 })
                }))
            })
            .build()
            .unwrap();

        let result = runtime.push(tick()).await.unwrap();
        let results = result.results();
        assert!(results[0].content_as::<Reactive>().is_some());
    }

    #[tokio::test]
    async fn test_run_until_shuts_down() {
        let runtime = builder(EmberConfig::default()).build().unwrap();
        runtime.run_until(async {}).await;
        assert!(runtime.manager().is_shut_down());
    }
}
