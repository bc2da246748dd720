//! Handshake interceptor trait.
//!
//! Interceptors are registered with the
//! [`InterceptorRegistry`](crate::registry::InterceptorRegistry) and run by
//! an [`InterceptorChain`](crate::chain::InterceptorChain) around every
//! session creation and websocket upgrade.

use async_trait::async_trait;

use crate::errors::InterceptorError;
use crate::types::{Attributes, HandshakeDecision, HandshakeRequest};

/// Failure handed to after-handshake hooks.
pub type Failure<'a> = &'a (dyn std::error::Error + Send + Sync + 'static);

/// A hook around session creation and connection upgrade.
///
/// # Priority
///
/// Higher priority interceptors run first in the before-pass and last in
/// the after-pass. Interceptors with equal priority keep registration
/// order. Default priority is 0.
#[async_trait]
pub trait HandshakeInterceptor: Send + Sync {
    /// Unique name for this interceptor.
    fn name(&self) -> &str;

    /// Execution priority. Higher runs first. Default: 0.
    fn priority(&self) -> i32 {
        0
    }

    /// Inspect the handshake before the session is created.
    ///
    /// Attributes inserted here end up on the new session. Returning
    /// [`HandshakeDecision::Reject`] aborts the handshake with the veto's
    /// response and skips every later interceptor.
    async fn before_handshake(
        &self,
        request: &HandshakeRequest,
        attributes: &mut Attributes,
    ) -> Result<HandshakeDecision, InterceptorError>;

    /// Observe the outcome once the transport handled the request.
    ///
    /// Only called if this interceptor's before-hook let the handshake
    /// proceed. `failure` is set when the exchange failed.
    async fn after_handshake(&self, _request: &HandshakeRequest, _failure: Option<Failure<'_>>) {}
}
