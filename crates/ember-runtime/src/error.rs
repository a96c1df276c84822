//! Runtime error types.

use thiserror::Error;

pub use crate::config::{ConfigError, ConfigResult};

/// Errors that can occur while building or running an [`EmberRuntime`](crate::EmberRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener manager could not be built.
    #[error("Failed to build listener manager: {0}")]
    Build(#[from] ember_framework::BuildError),

    /// The dedicated dispatch runtime could not be started.
    #[error("Runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
