//! Per-transport framing of protocol frames on an HTTP response body.

use std::sync::LazyLock;

use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use regex::Regex;
use skein_core::Frame;
use thiserror::Error;

/// Bytes of `h` written ahead of an XHR streaming response. Some browsers
/// hold back the first 2 KiB of a streamed body.
const XHR_STREAMING_PRELUDE_LEN: usize = 2048;

/// Minimum size of the htmlfile page head, for the same reason.
const HTMLFILE_MIN_PRELUDE_LEN: usize = 1024;

static CALLBACK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_.]+$").expect("valid regex"));

const HTMLFILE_HEAD: &str = r#"<!DOCTYPE html>
<html><head>
  <meta http-equiv="X-UA-Compatible" content="IE=edge" />
  <meta http-equiv="Content-Type" content="text/html; charset=UTF-8" />
</head><body><h2>Don't panic!</h2>
  <script>
    document.domain = document.domain;
    var c = parent.{callback};
    c.start();
    function p(d) {c.message(d);};
    window.onload = function() {c.stop();};
  </script>"#;

/// A request the framer cannot serve.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The htmlfile `c` query parameter is absent.
    #[error("\"callback\" parameter required")]
    MissingCallback,
    /// The htmlfile `c` query parameter has characters outside
    /// `[a-zA-Z0-9_.]`.
    #[error("invalid \"callback\" parameter")]
    InvalidCallback,
}

impl IntoResponse for FramingError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::MissingCallback => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidCallback => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Writes frames for one HTTP transport.
pub trait Framer: Send + Sync {
    /// Response content type.
    fn content_type(&self) -> &'static str;

    /// Text written once before the first frame.
    fn prelude(&self, request: &Parts) -> Result<String, FramingError>;

    /// One frame, wrapped for the wire.
    fn encode(&self, frame: &Frame) -> String;
}

/// `xhr` and `xhr_streaming`: one frame per line.
#[derive(Clone, Copy, Debug)]
pub struct XhrFramer {
    streaming: bool,
}

impl XhrFramer {
    /// Framer for polling responses.
    pub fn polling() -> Self {
        Self { streaming: false }
    }

    /// Framer for streaming responses.
    pub fn streaming() -> Self {
        Self { streaming: true }
    }
}

impl Framer for XhrFramer {
    fn content_type(&self) -> &'static str {
        "application/javascript; charset=UTF-8"
    }

    fn prelude(&self, _request: &Parts) -> Result<String, FramingError> {
        if self.streaming {
            let mut prelude = "h".repeat(XHR_STREAMING_PRELUDE_LEN);
            prelude.push('\n');
            Ok(prelude)
        } else {
            Ok(String::new())
        }
    }

    fn encode(&self, frame: &Frame) -> String {
        let mut text = frame.encode();
        text.push('\n');
        text
    }
}

/// `eventsource`: server-sent events.
#[derive(Clone, Copy, Debug, Default)]
pub struct EventSourceFramer;

impl Framer for EventSourceFramer {
    fn content_type(&self) -> &'static str {
        "text/event-stream; charset=UTF-8"
    }

    fn prelude(&self, _request: &Parts) -> Result<String, FramingError> {
        Ok("\r\n".to_owned())
    }

    fn encode(&self, frame: &Frame) -> String {
        format!("data: {}\r\n\r\n", frame.encode())
    }
}

/// `htmlfile`: a never-ending page of `<script>` blocks.
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlFileFramer;

impl HtmlFileFramer {
    fn callback(request: &Parts) -> Result<&str, FramingError> {
        let callback = request
            .uri
            .query()
            .into_iter()
            .flat_map(|q| q.split('&'))
            .find_map(|pair| pair.strip_prefix("c="))
            .filter(|c| !c.is_empty())
            .ok_or(FramingError::MissingCallback)?;
        if CALLBACK_RE.is_match(callback) {
            Ok(callback)
        } else {
            Err(FramingError::InvalidCallback)
        }
    }
}

impl Framer for HtmlFileFramer {
    fn content_type(&self) -> &'static str {
        "text/html; charset=UTF-8"
    }

    fn prelude(&self, request: &Parts) -> Result<String, FramingError> {
        let callback = Self::callback(request)?;
        let mut page = HTMLFILE_HEAD.replace("{callback}", callback);
        if page.len() < HTMLFILE_MIN_PRELUDE_LEN {
            let pad = HTMLFILE_MIN_PRELUDE_LEN - page.len();
            page.push_str(&" ".repeat(pad));
        }
        page.push_str("\r\n");
        Ok(page)
    }

    fn encode(&self, frame: &Frame) -> String {
        let json = serde_json::to_string(&frame.encode())
            .unwrap_or_else(|_| "\"\"".to_owned())
            .replace('<', "\\u003c");
        format!("<script>\np({json});\n</script>\r\n")
    }
}
