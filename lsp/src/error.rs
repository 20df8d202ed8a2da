//! Errors surfaced by sessions and the registry.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use sourcebridge_types::MissingContextKey;

use crate::protocol::PathToUriError;

/// Structured error returned by the server in a JSON-RPC response.
///
/// Carried to the caller verbatim.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl fmt::Display for ResponseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A required launch context key was absent at initialize time.
    #[error(transparent)]
    MissingContextKey(#[from] MissingContextKey),

    /// No transport exists yet: `initialize` has not run.
    #[error("session has not been initialized")]
    NotInitialized,

    #[error("session is shutting down")]
    ShuttingDown,

    /// The server process is gone; the transport is closed.
    #[error("session terminated")]
    Terminated,

    #[error("server returned an error: {0}")]
    Protocol(ResponseError),

    #[error("language server {} not found", path.display())]
    ServerNotFound {
        path: PathBuf,
        #[source]
        source: which::Error,
    },

    #[error("failed to launch {}", path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    InvalidPath(#[from] PathToUriError),

    #[error("malformed {method} message")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("{method} request timed out after {timeout:?}")]
    Timeout {
        method: &'static str,
        timeout: Duration,
    },
}

impl SessionError {
    /// Whether this error means the session's process is gone.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        matches!(self, Self::Terminated)
    }
}
