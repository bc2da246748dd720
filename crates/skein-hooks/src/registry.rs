//! Interceptor registry.
//!
//! Keeps the ordered list of [`HandshakeInterceptor`]s configured for a
//! mount. The registry is the source of truth for which interceptors are
//! active and what order they run in.

use std::sync::Arc;

use tracing::debug;

use crate::chain::InterceptorChain;
use crate::interceptor::HandshakeInterceptor;

/// Ordered collection of handshake interceptors.
///
/// Sorted by priority (descending); ties keep registration order.
#[derive(Clone, Default)]
pub struct InterceptorRegistry {
    interceptors: Vec<Arc<dyn HandshakeInterceptor>>,
}

impl InterceptorRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interceptor.
    ///
    /// An interceptor with the same name is replaced.
    pub fn register(&mut self, interceptor: Arc<dyn HandshakeInterceptor>) {
        let name = interceptor.name().to_string();
        self.interceptors.retain(|i| i.name() != name);

        debug!(name = %name, priority = interceptor.priority(), "registering handshake interceptor");
        self.interceptors.push(interceptor);

        // stable: equal priorities keep registration order
        self.interceptors
            .sort_by_key(|i| std::cmp::Reverse(i.priority()));
    }

    /// Unregister an interceptor by name. Returns `true` if one was removed.
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.interceptors.len();
        self.interceptors.retain(|i| i.name() != name);
        self.interceptors.len() < before
    }

    /// Interceptors in execution order.
    #[must_use]
    pub fn interceptors(&self) -> &[Arc<dyn HandshakeInterceptor>] {
        &self.interceptors
    }

    /// Names in execution order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.interceptors
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    /// Number of registered interceptors.
    #[must_use]
    pub fn count(&self) -> usize {
        self.interceptors.len()
    }

    /// Start a fresh chain for one request.
    #[must_use]
    pub fn chain(&self) -> InterceptorChain {
        InterceptorChain::new(self.interceptors.clone())
    }
}

impl std::fmt::Debug for InterceptorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorRegistry")
            .field("names", &self.names())
            .finish()
    }
}
