//! Error types for the Ember framework.

use std::sync::Arc;

use thiserror::Error;

use ember_core::BoxError;

/// A shareable error, used where an outcome is observed by several receivers.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Registration
// =============================================================================

/// Errors raised synchronously to the registrant.
#[derive(Debug, Clone, Error)]
pub enum RegistrationError {
    /// A listener with the same ID is already registered.
    #[error("listener '{id}' is already registered")]
    DuplicateId {
        /// The conflicting ID.
        id: String,
    },
}

/// Result type for registration operations.
pub type RegistrationResult<T> = Result<T, RegistrationError>;

// =============================================================================
// Listener faults
// =============================================================================

/// An uncaught fault from one listener's match/invoke step.
///
/// Listener faults are isolated: they are handed to the exception handler (if
/// any), logged, and treated as an invalid result.
#[derive(Debug, Error)]
#[error("listener '{id}' failed: {source}")]
pub struct ListenerError {
    /// ID of the failing listener.
    pub id: String,
    /// The original fault.
    #[source]
    pub source: BoxError,
}

impl ListenerError {
    /// Wraps `source` as a fault of listener `id`.
    pub fn new(id: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

// =============================================================================
// Continuous sessions
// =============================================================================

/// Terminal failures of a continuous-session waiter.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// A newer waiter was registered under the same ID.
    #[error("session '{id}' was replaced by a newer waiter")]
    Replaced {
        /// The waiter ID.
        id: String,
    },

    /// The waiter was cancelled before it was resolved.
    #[error("session '{id}' was cancelled")]
    Cancelled {
        /// The waiter ID.
        id: String,
    },

    /// A selector pushed an error into the waiter.
    #[error("session '{id}' failed: {source}")]
    Failed {
        /// The waiter ID.
        id: String,
        /// The pushed error.
        #[source]
        source: SharedError,
    },
}

impl SessionError {
    /// Returns the ID of the waiter this error belongs to.
    pub fn id(&self) -> &str {
        match self {
            Self::Replaced { id } | Self::Cancelled { id } | Self::Failed { id, .. } => id,
        }
    }

    /// Returns `true` for [`SessionError::Cancelled`] and [`SessionError::Replaced`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Replaced { .. })
    }
}

/// Result type for continuous-session waits.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Dispatch
// =============================================================================

/// Batch-level failures returned from [`push`](crate::EventListenerManager::push).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A whole-process interceptor failed.
    #[error("process interceptor failed: {0}")]
    Interceptor(#[source] BoxError),

    /// The exception handler failed while handling a listener fault.
    #[error("exception handler failed: {source} (while handling: {original})")]
    Handler {
        /// The handler's own fault.
        #[source]
        source: BoxError,
        /// The listener fault the handler was given.
        original: ListenerError,
    },

    /// The manager has been shut down.
    #[error("event listener manager is shut down")]
    Closed,
}

impl DispatchError {
    /// Recovers a dispatch error that travelled through an interceptor chain as a
    /// boxed error, or wraps a foreign error as an interceptor failure.
    pub(crate) fn from_chain(error: BoxError) -> Self {
        match error.downcast::<DispatchError>() {
            Ok(dispatch) => *dispatch,
            Err(other) => Self::Interceptor(other),
        }
    }
}

/// Result type for dispatch.
pub type DispatchResult<T> = Result<T, DispatchError>;

// =============================================================================
// Construction
// =============================================================================

/// Errors raised while building an [`EventListenerManager`](crate::EventListenerManager).
#[derive(Debug, Error)]
pub enum BuildError {
    /// An initial listener could not be registered.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// No runtime handle was configured and none is current.
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_chain_recovers_dispatch_error() {
        let boxed: BoxError = Box::new(DispatchError::Closed);
        assert!(matches!(DispatchError::from_chain(boxed), DispatchError::Closed));

        let foreign: BoxError = "interceptor exploded".into();
        match DispatchError::from_chain(foreign) {
            DispatchError::Interceptor(e) => assert_eq!(e.to_string(), "interceptor exploded"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_session_error_id() {
        let err = SessionError::Replaced { id: "ask-age".into() };
        assert_eq!(err.id(), "ask-age");
        assert!(err.is_cancelled());
    }
}
