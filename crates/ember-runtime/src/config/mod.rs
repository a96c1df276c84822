//! Configuration for the Ember runtime.
//!
//! Settings are layered with `figment` from built-in defaults, TOML/YAML files
//! and `EMBER_*` environment variables. See [`ConfigLoader`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, EmberConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
