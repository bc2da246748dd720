//! Shared test fixtures.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use skein_core::{BoxError, CloseStatus, TransportError};
use skein_hooks::Attributes;

use crate::handler::MessageHandler;
use crate::session::{Session, SessionInit, SessionKind};

/// Records every callback; echoes messages back when asked to.
#[derive(Default)]
pub(crate) struct RecordingHandler {
    events: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    echo: bool,
    fail_on: Option<String>,
}

impl RecordingHandler {
    pub(crate) fn echo() -> Self {
        Self {
            echo: true,
            ..Self::default()
        }
    }

    pub(crate) fn failing_on(message: &str) -> Self {
        Self {
            fail_on: Some(message.to_owned()),
            ..Self::default()
        }
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub(crate) fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn on_open(&self, _session: &Arc<Session>) -> Result<(), BoxError> {
        self.events.lock().push("open".into());
        Ok(())
    }

    async fn on_message(&self, session: &Arc<Session>, message: String) -> Result<(), BoxError> {
        self.messages.lock().push(message.clone());
        if self.fail_on.as_deref() == Some(message.as_str()) {
            return Err("handler refused message".into());
        }
        if self.echo {
            session.send(message)?;
        }
        Ok(())
    }

    async fn on_transport_error(&self, _session: &Arc<Session>, _error: &TransportError) {
        self.events.lock().push("error".into());
    }

    async fn on_close(&self, _session: &Arc<Session>, status: &CloseStatus) -> Result<(), BoxError> {
        self.events.lock().push(format!("close:{}", status.code));
        Ok(())
    }
}

/// A fresh session backed by a [`RecordingHandler`].
pub(crate) fn session_with(kind: SessionKind, capacity: usize) -> (Arc<Session>, Arc<RecordingHandler>) {
    session_named("s1", kind, capacity)
}

pub(crate) fn session_named(
    id: &str,
    kind: SessionKind,
    capacity: usize,
) -> (Arc<Session>, Arc<RecordingHandler>) {
    let handler = Arc::new(RecordingHandler::default());
    let session = Session::new(SessionInit {
        id: id.into(),
        kind,
        handler: handler.clone(),
        attributes: Attributes::new(),
        principal: None,
        capacity,
    });
    (session, handler)
}
