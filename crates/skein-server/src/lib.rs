//! # skein-server
//!
//! Fallback-transport sessions over axum.
//!
//! - Sessions: per-connection state, bounded outbound queue, attach/detach
//!   per HTTP request or for the life of a websocket
//! - Registry: concurrent map with atomic get-or-create per session id
//! - Scheduler: periodic heartbeat and idle-eviction sweep
//! - Transports: websocket (framed and raw), xhr polling, xhr streaming,
//!   eventsource, htmlfile, xhr send
//! - Service facade: path dispatch, origin checks, cache headers,
//!   interceptor chain around every handshake
//! - Server: mounts, router, start/stop lifecycle and graceful shutdown
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use skein_core::BoxError;
//! use skein_server::{MessageHandler, Session, SkeinServer};
//! use skein_settings::SkeinSettings;
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl MessageHandler for Echo {
//!     async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError> {
//!         session.send(message)?;
//!         Ok(())
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = SkeinServer::builder(SkeinSettings::default())
//!     .mount("/echo", Arc::new(Echo))
//!     .build()?;
//! server.listen().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod handler;
pub mod metrics;
pub mod server;
pub mod service;
pub mod session;
pub mod shutdown;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use handler::{MessageHandler, Principal};
pub use server::{SkeinServer, SkeinServerBuilder};
pub use service::{Rejection, RequestContext, ServiceError, SkeinService};
pub use session::registry::SessionRegistry;
pub use session::{Session, SessionKind, SessionState};
pub use shutdown::ShutdownCoordinator;
pub use transport::{TransportHandler, TransportKind};
