//! # skein-hooks
//!
//! Handshake interceptors for the skein session layer.
//!
//! Interceptors run around every session creation and websocket upgrade:
//!
//! - **Before-pass**: forward, priority-ordered. An interceptor can add
//!   attributes for the new session, let the handshake proceed, or veto it
//!   with a response of its own. A veto or an error stops the pass.
//! - **After-pass**: reverse order, only over interceptors that let the
//!   handshake proceed, with the failure (if any) of the exchange.

#![deny(unsafe_code)]

pub mod chain;
pub mod errors;
pub mod interceptor;
pub mod registry;
pub mod types;

pub use chain::InterceptorChain;
pub use errors::InterceptorError;
pub use interceptor::{Failure, HandshakeInterceptor};
pub use registry::InterceptorRegistry;
pub use types::{Attributes, HandshakeDecision, HandshakeRequest, Veto};
