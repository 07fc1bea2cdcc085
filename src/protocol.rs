//! Wire types for the line protocol spoken over stdio.
//!
//! Every request and every response is one JSON value on its own line:
//!
//! ```text
//! → {"method":"getModel","args":[true]}
//! ← "0110"
//! → {"method":"bogus"}
//! ← {"error":"unknown method: bogus"}
//! ```
//!
//! There are no ids: a client sends one request and waits for its response
//! before sending the next.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::shell::ShellError;

/// Error text written when the parent closes the shell's input.
pub const STDIN_CLOSED: &str = "stdin closed";

/// A single request line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// Method name, matched case-sensitively.
    pub method: String,
    /// Positional arguments; absent or `null` means none.
    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub args: Vec<Value>,
}

impl Request {
    pub fn new(method: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            args,
        }
    }

    /// Parses one framed line into a request.
    ///
    /// Trailing whitespace (including a stray `\r`) is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ShellError::MalformedRequest` if the line is empty, is not
    /// valid JSON, or does not carry a string `method`.
    pub fn parse(line: &[u8]) -> Result<Self, ShellError> {
        let trimmed = trim_trailing_whitespace(line);
        if trimmed.is_empty() {
            return Err(ShellError::malformed("empty request line"));
        }
        serde_json::from_slice(trimmed).map_err(ShellError::from_json_error)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map(|pos| pos + 1)
        .unwrap_or(0);
    &bytes[..end]
}

/// Value of the `status` field in control responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Connected,
    Disconnected,
    Ok,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Connected => "connected",
            Status::Disconnected => "disconnected",
            Status::Ok => "ok",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Any line the shell writes to its output.
///
/// Variant order matters when deserializing on the client side: the
/// handshake, status and error shapes are tried before the catch-all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ShellMessage {
    Ready { ready: bool },
    Status { status: Status },
    Error { error: String },
    Value(Value),
}

impl ShellMessage {
    /// The startup handshake.
    pub fn ready() -> Self {
        ShellMessage::Ready { ready: true }
    }

    pub fn status(status: Status) -> Self {
        ShellMessage::Status { status }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ShellMessage::Error {
            error: message.into(),
        }
    }

    /// Terminal message written when input reaches end of stream.
    pub fn stdin_closed() -> Self {
        Self::error(STDIN_CLOSED)
    }

    /// Splits the message into a result value or the shell's error text.
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            ShellMessage::Error { error } => Err(error),
            ShellMessage::Value(value) => Ok(value),
            ShellMessage::Ready { ready } => Ok(serde_json::json!({ "ready": ready })),
            ShellMessage::Status { status } => Ok(serde_json::json!({ "status": status })),
        }
    }
}
