//! Frame decoding: raw transport frame → JSON object
//!
//! Frames arrive as text or bytes and may carry transport noise before the
//! JSON body (socket.io style numeric prefixes, for example). The platform
//! also occasionally doubles the opening brace, so any run of leading `{`
//! is collapsed to one before parsing.

use crate::error::DecodeError;
use serde_json::Value;

/// One discrete message unit delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawFrame {
    Text(String),
    Binary(Vec<u8>),
}

impl RawFrame {
    /// Frame body as text (invalid UTF-8 is replaced, never rejected)
    pub fn as_text(&self) -> std::borrow::Cow<'_, str> {
        match self {
            RawFrame::Text(text) => std::borrow::Cow::Borrowed(text.as_str()),
            RawFrame::Binary(bytes) => String::from_utf8_lossy(bytes),
        }
    }
}

impl From<String> for RawFrame {
    fn from(text: String) -> Self {
        RawFrame::Text(text)
    }
}

impl From<&str> for RawFrame {
    fn from(text: &str) -> Self {
        RawFrame::Text(text.to_string())
    }
}

impl From<Vec<u8>> for RawFrame {
    fn from(bytes: Vec<u8>) -> Self {
        RawFrame::Binary(bytes)
    }
}

/// Decoded frame body
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub value: Value,
    /// Top-level `code` equals the heartbeat code. Policy flag only: the
    /// frame is still handed on, it just stays out of verbose diagnostics.
    pub heartbeat: bool,
}

impl DecodedFrame {
    pub fn code(&self) -> Option<i64> {
        top_level_code(&self.value)
    }
}

/// Extract and parse the JSON payload of a frame
pub fn decode(frame: &RawFrame, heartbeat_code: i64) -> Result<DecodedFrame, DecodeError> {
    let text = frame.as_text();
    let start = text.find('{').ok_or(DecodeError::NoPayload)?;
    let mut body = &text[start..];

    while body.starts_with("{{") {
        body = &body[1..];
    }

    let value: Value = serde_json::from_str(body)?;
    let heartbeat = top_level_code(&value) == Some(heartbeat_code);

    Ok(DecodedFrame { value, heartbeat })
}

fn top_level_code(value: &Value) -> Option<i64> {
    value.get("code").and_then(crate::pipeline::de::value_as_i64)
}
