//! Per-request interceptor chain.
//!
//! The before-pass runs forward and stops at the first interceptor that
//! rejects or fails. The after-pass runs in reverse over the interceptors
//! whose before-hook let the handshake proceed, and runs at most once.

use std::sync::Arc;

use tracing::debug;

use crate::errors::InterceptorError;
use crate::interceptor::{Failure, HandshakeInterceptor};
use crate::types::{Attributes, HandshakeDecision, HandshakeRequest};

/// Chain state for a single request.
pub struct InterceptorChain {
    interceptors: Vec<Arc<dyn HandshakeInterceptor>>,
    /// Count of interceptors whose before-hook returned `Proceed`.
    entered: usize,
    after_applied: bool,
}

impl InterceptorChain {
    /// Create a chain over interceptors already in execution order.
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn HandshakeInterceptor>>) -> Self {
        Self {
            interceptors,
            entered: 0,
            after_applied: false,
        }
    }

    /// Run before-hooks in order.
    ///
    /// On a veto, the after-pass runs immediately for the interceptors that
    /// already proceeded and the veto is returned. On an error nothing more
    /// runs here; the caller reports the failure through
    /// [`apply_after`](Self::apply_after).
    pub async fn apply_before(
        &mut self,
        request: &HandshakeRequest,
        attributes: &mut Attributes,
    ) -> Result<HandshakeDecision, InterceptorError> {
        let interceptors = self.interceptors.clone();
        for (index, interceptor) in interceptors.iter().enumerate() {
            match interceptor.before_handshake(request, attributes).await? {
                HandshakeDecision::Proceed => self.entered = index + 1,
                HandshakeDecision::Reject(veto) => {
                    debug!(
                        interceptor = interceptor.name(),
                        status = %veto.status,
                        "handshake vetoed"
                    );
                    self.apply_after(request, None).await;
                    return Ok(HandshakeDecision::Reject(veto));
                }
            }
        }
        Ok(HandshakeDecision::Proceed)
    }

    /// Run after-hooks in reverse order. Subsequent calls are no-ops.
    pub async fn apply_after(&mut self, request: &HandshakeRequest, failure: Option<Failure<'_>>) {
        if self.after_applied {
            return;
        }
        self.after_applied = true;
        for interceptor in self.interceptors[..self.entered].iter().rev() {
            interceptor.after_handshake(request, failure).await;
        }
    }

    /// Number of interceptors that proceeded so far.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InterceptorRegistry;
    use crate::types::Veto;
    use async_trait::async_trait;
    use axum::http::{HeaderMap, Method, StatusCode, Uri};
    use parking_lot::Mutex;

    #[derive(Clone, Copy)]
    enum Behavior {
        Proceed,
        Reject,
        Fail,
    }

    struct Recorder {
        name: &'static str,
        behavior: Behavior,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl HandshakeInterceptor for Recorder {
        fn name(&self) -> &str {
            self.name
        }
        async fn before_handshake(
            &self,
            _request: &HandshakeRequest,
            attributes: &mut Attributes,
        ) -> Result<HandshakeDecision, InterceptorError> {
            self.log.lock().push(format!("before:{}", self.name));
            let _ = attributes.insert(self.name.into(), serde_json::Value::Bool(true));
            match self.behavior {
                Behavior::Proceed => Ok(HandshakeDecision::Proceed),
                Behavior::Reject => Ok(HandshakeDecision::Reject(Veto::status(
                    StatusCode::FORBIDDEN,
                ))),
                Behavior::Fail => Err(InterceptorError::failed(self.name, "boom")),
            }
        }
        async fn after_handshake(&self, _request: &HandshakeRequest, failure: Option<Failure<'_>>) {
            let suffix = if failure.is_some() { ":failed" } else { "" };
            self.log.lock().push(format!("after:{}{suffix}", self.name));
        }
    }

    fn request() -> HandshakeRequest {
        HandshakeRequest {
            method: Method::POST,
            uri: Uri::from_static("/echo/000/abc/xhr"),
            headers: HeaderMap::new(),
            session_id: Some("abc".into()),
            transport: Some("xhr".into()),
            principal: None,
        }
    }

    fn chain_of(
        specs: &[(&'static str, Behavior)],
    ) -> (InterceptorChain, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = InterceptorRegistry::new();
        for (name, behavior) in specs {
            registry.register(Arc::new(Recorder {
                name,
                behavior: *behavior,
                log: log.clone(),
            }));
        }
        (registry.chain(), log)
    }

    #[tokio::test]
    async fn before_forward_after_reverse() {
        let (mut chain, log) = chain_of(&[("a", Behavior::Proceed), ("b", Behavior::Proceed)]);
        let req = request();
        let mut attrs = Attributes::new();
        let decision = chain.apply_before(&req, &mut attrs).await.unwrap();
        assert_eq!(decision, HandshakeDecision::Proceed);
        chain.apply_after(&req, None).await;
        assert_eq!(
            *log.lock(),
            vec!["before:a", "before:b", "after:b", "after:a"]
        );
        assert_eq!(attrs.len(), 2);
    }

    #[tokio::test]
    async fn veto_short_circuits_later_hooks() {
        let (mut chain, log) = chain_of(&[
            ("a", Behavior::Proceed),
            ("b", Behavior::Reject),
            ("c", Behavior::Proceed),
        ]);
        let req = request();
        let decision = chain
            .apply_before(&req, &mut Attributes::new())
            .await
            .unwrap();
        assert!(decision.is_rejected());
        // the after-pass already ran for "a" only; a second call is a no-op
        chain.apply_after(&req, None).await;
        assert_eq!(*log.lock(), vec!["before:a", "before:b", "after:a"]);
    }

    #[tokio::test]
    async fn error_leaves_after_pass_to_caller() {
        let (mut chain, log) = chain_of(&[("a", Behavior::Proceed), ("b", Behavior::Fail)]);
        let req = request();
        let err = chain
            .apply_before(&req, &mut Attributes::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'b'"));
        assert_eq!(chain.entered(), 1);

        chain.apply_after(&req, Some(&err)).await;
        assert_eq!(*log.lock(), vec!["before:a", "before:b", "after:a:failed"]);
    }

    #[tokio::test]
    async fn after_without_before_runs_nothing() {
        let (mut chain, log) = chain_of(&[("a", Behavior::Proceed)]);
        chain.apply_after(&request(), None).await;
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn empty_chain_proceeds() {
        let mut chain = InterceptorRegistry::new().chain();
        let decision = chain
            .apply_before(&request(), &mut Attributes::new())
            .await
            .unwrap();
        assert_eq!(decision, HandshakeDecision::Proceed);
    }
}
