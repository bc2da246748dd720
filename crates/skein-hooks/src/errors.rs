//! Interceptor error types.

use thiserror::Error;

/// Errors raised by a before-handshake hook.
#[derive(Debug, Error)]
pub enum InterceptorError {
    /// The interceptor failed while inspecting the handshake.
    #[error("interceptor '{name}' failed: {message}")]
    Failed {
        /// Interceptor name.
        name: String,
        /// Error message from the interceptor.
        message: String,
    },

    /// Generic internal error.
    #[error("{0}")]
    Internal(String),
}

impl InterceptorError {
    /// Shorthand for [`InterceptorError::Failed`].
    pub fn failed(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            name: name.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_display() {
        let err = InterceptorError::failed("auth", "token expired");
        assert_eq!(err.to_string(), "interceptor 'auth' failed: token expired");
    }
}
