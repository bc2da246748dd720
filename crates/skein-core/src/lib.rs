//! # skein-core
//!
//! Foundation types shared by every skein crate.
//!
//! - **Branded IDs**: `SessionId`, `ServerId` as newtypes for type safety
//! - **Frames**: the open / heartbeat / message / close wire frames and the
//!   message codec used by every transport
//! - **Errors**: `CodecError`, `SessionError`, `TransportError`,
//!   `HandshakeError` via `thiserror`
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod errors;
pub mod frames;
pub mod ids;
pub mod logging;

pub use errors::{BoxError, CodecError, HandshakeError, SessionError, TransportError};
pub use frames::{CloseStatus, Frame};
pub use ids::{ServerId, SessionId};
