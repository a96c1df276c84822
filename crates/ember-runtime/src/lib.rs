//! Ember Runtime - ambient wiring for the Ember dispatch engine.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `EmberConfig`)
//! - Logging initialization (`LoggingBuilder`, `init_from_config`)
//! - Runtime orchestration (`EmberRuntime`), including an optional dedicated
//!   worker runtime for async listeners
//!
//! ```ignore
//! use ember_runtime::EmberRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = EmberRuntime::builder()
//!         .manager(|m| m.listener(echo))
//!         .build()?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigLoader, EmberConfig, load_config, load_config_from_file, validate_config};
pub use error::{ConfigError, ConfigResult, RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents, init_from_config};
pub use runtime::{EmberRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and the `instrument` attribute.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
