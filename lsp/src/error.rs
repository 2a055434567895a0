//! Error taxonomy for the LSP client.

use std::path::PathBuf;
use std::time::Duration;

/// Errors surfaced by the transport, session, and client facade.
///
/// Every fallible operation returns one of these; nothing defaults silently.
#[derive(Debug, thiserror::Error)]
pub enum LspError {
    /// The socket could not be established.
    #[error("cannot connect to {endpoint}: {reason}")]
    Connection { endpoint: String, reason: String },

    /// Reading from or writing to the transport failed.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame, undecodable payload, or unsolicited response.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The document to open could not be read.
    #[error("cannot read {}: {source}", path.display())]
    FileNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The path cannot be expressed as a `file://` URI.
    #[error("cannot convert path to file URI: {}", path.display())]
    InvalidPath { path: PathBuf },

    /// No response arrived before the request deadline.
    #[error("{method} request {id} timed out after {timeout:?}")]
    RequestTimeout {
        id: u64,
        method: &'static str,
        timeout: Duration,
    },

    /// The server answered with a JSON-RPC error object.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    /// The session is closing or closed.
    #[error("session closed")]
    SessionClosed,

    /// The document handle isn't registered with this session.
    #[error("document not open: {uri}")]
    DocumentNotOpen { uri: String },
}

impl LspError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Whether this error means the session can no longer be used.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. } | Self::Io(_) | Self::SessionClosed
        )
    }
}

pub type Result<T, E = LspError> = std::result::Result<T, E>;
