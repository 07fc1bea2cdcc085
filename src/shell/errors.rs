//! Error types for request handling failures.
//!
//! Every variant except the I/O ones is recovered at the request boundary
//! and reported to the client as `{"error": "<display text>"}`.

use std::io;

use thiserror::Error;

use super::storage::StorageError;
use crate::driver::DriverError;

/// Errors surfaced while framing, parsing or executing a request.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Request line is not JSON or lacks a `method`.
    #[error("malformed request: {message}")]
    MalformedRequest {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Request line exceeded the configured size limit.
    #[error("request too large: {size} bytes exceeds {max_size} byte limit")]
    RequestTooLarge { size: usize, max_size: usize },

    /// Method name is not part of the protocol.
    #[error("unknown method: {method}")]
    UnknownMethod { method: String },

    /// Arguments do not match the method's schema.
    #[error("invalid arguments for {method}: {message}")]
    InvalidArguments { method: &'static str, message: String },

    /// Storage snapshot failed validation.
    #[error("invalid storage snapshot: {0}")]
    Storage(#[from] StorageError),

    /// Detection gave up after the configured number of attempts.
    #[error("no calculator found after {attempts} detection attempts")]
    DeviceNotFound { attempts: u32 },

    /// The driver reported a failure.
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// Reading input or writing output failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A result could not be serialized.
    #[error("failed to serialize response: {0}")]
    Serialize(#[source] serde_json::Error),
}

impl ShellError {
    /// Creates a malformed request error from a serde error.
    pub fn from_json_error(source: serde_json::Error) -> Self {
        Self::MalformedRequest {
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// Creates a malformed request error with a custom message.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
            source: None,
        }
    }

    pub fn request_too_large(size: usize, max_size: usize) -> Self {
        Self::RequestTooLarge { size, max_size }
    }

    pub fn unknown_method(method: impl Into<String>) -> Self {
        Self::UnknownMethod {
            method: method.into(),
        }
    }

    pub fn invalid_arguments(method: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            method,
            message: message.into(),
        }
    }
}
