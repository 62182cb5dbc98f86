use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::schema::{
    ErrorObject, JSONRPCError, RequestId, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST,
    JSONRPC_VERSION, METHOD_NOT_FOUND, PARSE_ERROR,
};

/// Failure category carried across process and network boundaries so that
/// callers can branch on the kind of failure instead of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Provider,
    Validation,
    UnknownOperation,
    Handler,
    Model,
    Timeout,
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Provider => "provider",
            ErrorKind::Validation => "validation",
            ErrorKind::UnknownOperation => "unknown_operation",
            ErrorKind::Handler => "handler",
            ErrorKind::Model => "model",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
        }
    }

    /// Provider-style HTTP status used when an error of this kind has no more
    /// specific code attached.
    pub fn default_status(&self) -> u16 {
        match self {
            ErrorKind::Validation => 400,
            ErrorKind::UnknownOperation => 404,
            ErrorKind::Provider => 502,
            ErrorKind::Timeout => 504,
            _ => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Request {request_id} timed out after {duration:?}")]
    Timeout {
        duration: Duration,
        request_id: String,
    },

    #[error("Worker is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Operation already registered: {0}")]
    DuplicateOperation(String),

    #[error("Unknown operation: {0}")]
    UnknownOperation(String),

    #[error("Missing required argument '{parameter}' for operation '{operation}'")]
    MissingArgument { operation: String, parameter: String },

    #[error("Invalid argument '{parameter}' for operation '{operation}': {message}")]
    InvalidArgument {
        operation: String,
        parameter: String,
        message: String,
    },

    #[error("{0}")]
    Validation(String),

    #[error("Operation '{operation}' failed: {message}")]
    Handler { operation: String, message: String },

    #[error("Could not find location: {0}")]
    LocationNotFound(String),

    #[error("Historical data only available up to {latest}. Use the forecast operation for recent dates.")]
    DateOutOfPolicy { latest: chrono::NaiveDate },

    #[error("Error from upstream API ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Weather provider request failed: {0}")]
    Provider(String),

    #[error("Language model error: {0}")]
    Model(String),

    #[error("Query timed out after {0:?}")]
    QueryTimeout(Duration),

    #[error("Stopped after {0} operation-call rounds without a final answer")]
    RoundLimit(usize),

    #[error("No operations discovered from the configured plugins")]
    NoOperations,

    #[error("Agent not initialized. Call initialize() first.")]
    NotInitialized,

    #[error("Configuration error: {0}")]
    Config(String),

    /// An error reported by the far side of a plugin transport.
    #[error("{message}")]
    Remote {
        kind: ErrorKind,
        message: String,
        status_code: Option<u16>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn timeout(duration: Duration, request_id: impl Into<String>) -> Self {
        Error::Timeout {
            duration,
            request_id: request_id.into(),
        }
    }

    pub fn handler(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Handler {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn remote(kind: ErrorKind, message: impl Into<String>, status_code: Option<u16>) -> Self {
        Error::Remote {
            kind,
            message: message.into(),
            status_code,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_)
            | Error::Json(_)
            | Error::Transport(_)
            | Error::InvalidMessageFormat { .. }
            | Error::Protocol(_)
            | Error::ConnectionClosed
            | Error::Timeout { .. }
            | Error::InvalidState { .. } => ErrorKind::Transport,
            Error::DuplicateOperation(_)
            | Error::MissingArgument { .. }
            | Error::InvalidArgument { .. }
            | Error::Validation(_) => ErrorKind::Validation,
            Error::UnknownOperation(_) => ErrorKind::UnknownOperation,
            Error::Handler { .. } => ErrorKind::Handler,
            Error::LocationNotFound(_)
            | Error::DateOutOfPolicy { .. }
            | Error::Upstream { .. }
            | Error::Provider(_) => ErrorKind::Provider,
            Error::Model(_) | Error::RoundLimit(_) => ErrorKind::Model,
            Error::QueryTimeout(_) => ErrorKind::Timeout,
            Error::NoOperations | Error::NotInitialized | Error::Config(_) => ErrorKind::Config,
            Error::Remote { kind, .. } => *kind,
        }
    }

    /// Provider-style status code reported alongside the error over HTTP.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::LocationNotFound(_) => 404,
            Error::DateOutOfPolicy { .. } => 400,
            Error::Upstream { status, .. } => *status,
            Error::Remote {
                status_code: Some(status),
                ..
            } => *status,
            _ => self.kind().default_status(),
        }
    }

    /// Whether the error means the transport can no longer carry calls.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::InvalidMessageFormat { .. })
    }

    pub(crate) fn to_jsonrpc_error(&self, id: RequestId) -> JSONRPCError {
        let code = match self {
            Error::UnknownOperation(_) => METHOD_NOT_FOUND,
            Error::MissingArgument { .. } | Error::InvalidArgument { .. } => INVALID_PARAMS,
            Error::Protocol(_) => INVALID_REQUEST,
            Error::Json(_) | Error::InvalidMessageFormat { .. } => PARSE_ERROR,
            _ => INTERNAL_ERROR,
        };

        JSONRPCError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: ErrorObject {
                code,
                message: self.to_string(),
                data: Some(json!({
                    "kind": self.kind(),
                    "status_code": self.status_code(),
                })),
            },
        }
    }

    /// Rebuild an error received in a JSON-RPC error response. The `data`
    /// member carries the kind when the peer is one of our workers; foreign
    /// peers fall back to a classification by error code.
    pub(crate) fn from_jsonrpc_error(error: ErrorObject) -> Self {
        let data = error.data.as_ref();
        let kind = data
            .and_then(|d| d.get("kind"))
            .and_then(|k| serde_json::from_value::<ErrorKind>(k.clone()).ok())
            .unwrap_or(match error.code {
                METHOD_NOT_FOUND => ErrorKind::UnknownOperation,
                INVALID_PARAMS => ErrorKind::Validation,
                _ => ErrorKind::Transport,
            });
        let status_code = data
            .and_then(|d| d.get("status_code"))
            .and_then(|s| s.as_u64())
            .and_then(|s| u16::try_from(s).ok());
        Error::remote(kind, error.message, status_code)
    }
}
