//! Wire frames and the message codec.
//!
//! Every transport carries the same four frames; only the framing around
//! them differs (newline, `data:` line, `<script>` block, websocket text
//! message):
//!
//! | Frame | Encoding |
//! |-------|----------|
//! | open | `o` |
//! | heartbeat | `h` |
//! | messages | `a["m1","m2"]` |
//! | close | `c[3000,"Go away!"]` |

use std::borrow::Cow;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

/// Status carried by a close frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseStatus {
    /// Numeric close code (websocket close code range).
    pub code: u16,
    /// Human-readable reason.
    pub reason: Cow<'static, str>,
}

impl CloseStatus {
    /// Normal closure.
    pub const NORMAL: Self = Self::new_static(1000, "");
    /// The server is shutting down.
    pub const GOING_AWAY: Self = Self::new_static(1001, "Going away");
    /// The peer violated the protocol.
    pub const PROTOCOL_ERROR: Self = Self::new_static(1002, "Protocol error");
    /// The peer sent a payload that could not be decoded.
    pub const BAD_DATA: Self = Self::new_static(1007, "Bad data");
    /// An unexpected failure on the server side.
    pub const SERVER_ERROR: Self = Self::new_static(1011, "Server error");
    /// Sent to a client that polls a session which is already closed.
    pub const GO_AWAY: Self = Self::new_static(3000, "Go away!");
    /// Sent to a second request that tries to attach to a busy session.
    pub const ANOTHER_CONNECTION_OPEN: Self =
        Self::new_static(2010, "Another connection still open");

    const fn new_static(code: u16, reason: &'static str) -> Self {
        Self {
            code,
            reason: Cow::Borrowed(reason),
        }
    }

    /// Create a status with an arbitrary reason.
    #[must_use]
    pub fn new(code: u16, reason: impl Into<Cow<'static, str>>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for CloseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.code, self.reason)
    }
}

/// One protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Session established.
    Open,
    /// Keep-alive no-op.
    Heartbeat,
    /// A batch of application messages, oldest first.
    Messages(Vec<String>),
    /// Session closed.
    Close(CloseStatus),
}

impl Frame {
    /// Encode the frame to its wire text.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            Self::Open => "o".to_owned(),
            Self::Heartbeat => "h".to_owned(),
            Self::Messages(messages) => {
                let mut out = String::from("a");
                out.push_str(&encode_messages(messages));
                out
            }
            Self::Close(status) => {
                let reason = serde_json::to_string(&status.reason)
                    .unwrap_or_else(|_| "\"\"".to_owned());
                format!("c[{},{}]", status.code, reason)
            }
        }
    }

    /// Parse wire text back into a frame.
    pub fn parse(text: &str) -> Result<Self, CodecError> {
        match text.as_bytes().first() {
            Some(b'o') if text.len() == 1 => Ok(Self::Open),
            Some(b'h') if text.len() == 1 => Ok(Self::Heartbeat),
            Some(b'a') => {
                let messages: Vec<String> = serde_json::from_str(&text[1..])
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                Ok(Self::Messages(messages))
            }
            Some(b'c') => {
                let (code, reason): (u16, String) = serde_json::from_str(&text[1..])
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                Ok(Self::Close(CloseStatus::new(code, reason)))
            }
            _ => Err(CodecError::UnknownFrame(text.chars().take(16).collect())),
        }
    }
}

/// Encode messages as a JSON array of strings, escaping the characters
/// some browsers and proxies mangle.
#[must_use]
pub fn encode_messages(messages: &[String]) -> String {
    let json = serde_json::to_string(messages).unwrap_or_else(|_| "[]".to_owned());
    escape_unsafe_chars(&json)
}

/// Decode an inbound payload into application messages.
///
/// Accepts a JSON array of strings or a single JSON string. An empty or
/// whitespace-only payload yields no messages.
pub fn decode_messages(payload: &str) -> Result<Vec<String>, CodecError> {
    let trimmed = payload.trim();
    match trimmed.as_bytes().first() {
        None => Ok(Vec::new()),
        Some(b'[') => {
            serde_json::from_str(trimmed).map_err(|e| CodecError::Malformed(e.to_string()))
        }
        Some(b'"') => serde_json::from_str::<String>(trimmed)
            .map(|m| vec![m])
            .map_err(|e| CodecError::Malformed(e.to_string())),
        Some(_) => Err(CodecError::Malformed(
            "expected a JSON array or string".to_owned(),
        )),
    }
}

fn needs_escape(c: char) -> bool {
    matches!(c,
        '\u{0000}'..='\u{001F}'
        | '\u{007F}'..='\u{009F}'
        | '\u{00AD}'
        | '\u{0600}'..='\u{0604}'
        | '\u{070F}'
        | '\u{17B4}'
        | '\u{17B5}'
        | '\u{200C}'..='\u{200F}'
        | '\u{2028}'..='\u{202F}'
        | '\u{2060}'..='\u{206F}'
        | '\u{FEFF}'
        | '\u{FFF0}'..='\u{FFFF}')
}

fn escape_unsafe_chars(json: &str) -> String {
    if !json.chars().any(needs_escape) {
        return json.to_owned();
    }
    let mut out = String::with_capacity(json.len() + 16);
    for c in json.chars() {
        if needs_escape(c) {
            let _ = write!(out, "\\u{:04x}", u32::from(c));
        } else {
            out.push(c);
        }
    }
    out
}
