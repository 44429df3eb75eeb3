//! Error types for HAL operations.
//!
//! These errors are returned synchronously by the session interface when a
//! call cannot even be issued. Failures of an issued operation arrive later as
//! an asynchronous [`HalEvent::Error`](crate::types::HalEvent::Error) instead.

/// Result type alias for HAL operations.
pub type Result<T> = std::result::Result<T, HalError>;

/// Errors that can occur when calling into the HAL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HalError {
    /// A session could not be created for the user.
    #[error("Session open failed: {message}")]
    SessionOpenFailed { message: String },

    /// The remote call failed in transport.
    #[error("Remote call failed: {message}")]
    Remote { message: String },

    /// The HAL process is gone.
    #[error("HAL is dead: {instance}")]
    Dead { instance: String },

    /// Operation is not supported by this HAL version.
    #[error("Unsupported operation: {operation}")]
    Unsupported { operation: String },

    /// The call was made on a session in the wrong state, e.g. after close.
    #[error("Invalid session state: {message}")]
    InvalidState { message: String },
}

impl HalError {
    /// Create a new session open failure.
    pub fn session_open_failed(message: impl Into<String>) -> Self {
        Self::SessionOpenFailed {
            message: message.into(),
        }
    }

    /// Create a new remote call failure.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    /// Create a new dead HAL error.
    pub fn dead(instance: impl Into<String>) -> Self {
        Self::Dead {
            instance: instance.into(),
        }
    }

    /// Create a new unsupported operation error.
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Self::Unsupported {
            operation: operation.into(),
        }
    }

    /// Create a new invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }
}
