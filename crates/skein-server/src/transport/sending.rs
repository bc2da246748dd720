//! Request handling shared by the HTTP transports that carry frames to
//! the client (polling and streaming).

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::stream;
use skein_core::{CloseStatus, Frame, SessionError, TransportError};
use tracing::debug;

use super::framing::Framer;
use crate::session::{AttachGuard, Drained, Session};

/// How long a sending response stays open.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    /// Return after one frame.
    Polling,
    /// Keep writing until `limit` frame bytes were sent or the session
    /// closes.
    Streaming {
        /// Frame bytes after which the response ends.
        limit: usize,
    },
}

/// Serve one sending request for `session`.
///
/// - NEW: open frame, then (streaming only) keep flushing
/// - CLOSED: `c[3000,"Go away!"]`
/// - attached elsewhere: `c[2010,"Another connection still open"]`
/// - otherwise: attach and flush
pub(crate) async fn respond(
    session: Arc<Session>,
    request: &Parts,
    framer: Arc<dyn Framer>,
    delivery: Delivery,
) -> Result<Response, TransportError> {
    let prelude = match framer.prelude(request) {
        Ok(prelude) => prelude,
        Err(e) => {
            debug!(session_id = %session.id(), error = %e, "request cannot be framed");
            return Ok(e.into_response());
        }
    };

    let guard = match session.try_attach() {
        Ok(guard) => guard,
        Err(SessionError::Closed(_)) => {
            return Ok(single(framer.as_ref(), prelude, CloseStatus::GO_AWAY));
        }
        Err(SessionError::AlreadyAttached(_)) => {
            debug!(session_id = %session.id(), "session already attached to another request");
            return Ok(single(
                framer.as_ref(),
                prelude,
                CloseStatus::ANOTHER_CONNECTION_OPEN,
            ));
        }
        Err(e) => {
            return Err(TransportError::new(session.id().clone(), "attach failed").with_source(e));
        }
    };

    let mut head = prelude;
    let opened = session.open().await?;
    if opened {
        head.push_str(&framer.encode(&Frame::Open));
    }

    match delivery {
        Delivery::Polling if opened => {
            drop(guard);
            Ok(body(framer.as_ref(), head))
        }
        Delivery::Polling => {
            let drained = session.next_frame().await;
            drop(guard);
            head.push_str(&framer.encode(&frame_of(drained)));
            Ok(body(framer.as_ref(), head))
        }
        Delivery::Streaming { limit } => Ok(stream_body(session, guard, framer, head, limit)),
    }
}

fn frame_of(drained: Drained) -> Frame {
    match drained {
        Drained::Frame(frame) => frame,
        Drained::Closed(status) => Frame::Close(status),
    }
}

fn body(framer: &dyn Framer, text: String) -> Response {
    ([(CONTENT_TYPE, framer.content_type())], text).into_response()
}

fn single(framer: &dyn Framer, mut prelude: String, status: CloseStatus) -> Response {
    prelude.push_str(&framer.encode(&Frame::Close(status)));
    body(framer, prelude)
}

struct StreamState {
    session: Arc<Session>,
    // dropping the state (end of body or client gone) detaches
    _guard: AttachGuard,
    framer: Arc<dyn Framer>,
    head: Option<String>,
    written: usize,
    limit: usize,
    done: bool,
}

fn stream_body(
    session: Arc<Session>,
    guard: AttachGuard,
    framer: Arc<dyn Framer>,
    head: String,
    limit: usize,
) -> Response {
    let content_type = framer.content_type();
    let state = StreamState {
        session,
        _guard: guard,
        framer,
        head: Some(head),
        written: 0,
        limit,
        done: false,
    };

    let chunks = stream::unfold(state, |mut state| async move {
        if let Some(head) = state.head.take() {
            return Some((Ok::<_, Infallible>(Bytes::from(head)), state));
        }
        if state.done {
            return None;
        }
        let text = match state.session.next_frame().await {
            Drained::Frame(frame) => {
                let text = state.framer.encode(&frame);
                state.written += text.len();
                if state.written >= state.limit {
                    debug!(
                        session_id = %state.session.id(),
                        written = state.written,
                        "stream byte limit reached"
                    );
                    state.done = true;
                }
                text
            }
            Drained::Closed(status) => {
                state.done = true;
                state.framer.encode(&Frame::Close(status))
            }
        };
        Some((Ok(Bytes::from(text)), state))
    });

    ([(CONTENT_TYPE, content_type)], Body::from_stream(chunks)).into_response()
}
