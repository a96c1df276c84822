//! Error types for the Ember core.
//!
//! Framework-level errors (registration, dispatch, sessions) are defined in
//! `ember-framework`.

use thiserror::Error;

/// A boxed error type used for listener, interceptor and selector faults.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Attribute Errors
// =============================================================================

/// Errors raised by an [`AttributeMap`](crate::AttributeMap).
#[derive(Debug, Clone, Error)]
pub enum AttributeError {
    /// The stored value does not have the type the attribute declares.
    #[error("attribute '{name}' does not hold a value of type '{expected}'")]
    TypeMismatch {
        /// Name of the attribute.
        name: String,
        /// Type name the caller asked for.
        expected: &'static str,
    },
}

impl AttributeError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(name: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
        }
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for attribute store operations.
pub type AttributeResult<T> = Result<T, AttributeError>;
