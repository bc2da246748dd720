//! Application message handler contract.

use std::sync::Arc;

use async_trait::async_trait;
use skein_core::{BoxError, CloseStatus, TransportError};

use crate::session::Session;

/// Authenticated identity attached to a request by an upstream layer.
///
/// Insert it into the request extensions before the request reaches the
/// skein router. A session remembers the principal it was created with and
/// refuses requests from anyone else.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Principal(pub String);

impl Principal {
    /// Principal name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// Receives session lifecycle events and inbound messages.
///
/// One handler serves every session under a mount. Calls for a single
/// session are never concurrent with each other for inbound messages; use
/// [`Session::send`] from any task to reply.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// The session was established and the open frame was written.
    async fn on_open(&self, _session: &Arc<Session>) -> Result<(), BoxError> {
        Ok(())
    }

    /// One inbound application message, in arrival order.
    async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError>;

    /// The session's transport failed. The session is closed right after.
    async fn on_transport_error(&self, _session: &Arc<Session>, _error: &TransportError) {}

    /// The session is closed. Called exactly once per session.
    async fn on_close(&self, _session: &Arc<Session>, _status: &CloseStatus) -> Result<(), BoxError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_name() {
        let p = Principal("alice".into());
        assert_eq!(p.name(), "alice");
        assert_eq!(p, Principal("alice".into()));
    }
}
