//! Client error types.

use bson::Document;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect timeout to {0}")]
    Timeout(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] docwire_protocol::ProtocolError),

    #[error("cursor {0} not found on server")]
    CursorNotFound(i64),

    #[error("server error{}: {message}", .code.map(|c| format!(" {c}")).unwrap_or_default())]
    Server { code: Option<i32>, message: String },

    #[error("usage error: {0}")]
    Usage(&'static str),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection pool is closed")]
    PoolClosed,
}

impl ClientError {
    /// Returns whether retrying the operation may succeed.
    ///
    /// Connection-class failures are retryable since the next write
    /// reconnects. Protocol errors, server replies and misuse are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Connect { .. } | ClientError::Timeout(_) | ClientError::Io(_)
        )
    }

    /// Returns whether the error was reported by the server in a well-formed reply.
    pub fn is_server_reply(&self) -> bool {
        matches!(
            self,
            ClientError::CursorNotFound(_) | ClientError::Server { .. }
        )
    }

    /// Builds a server error from an error document.
    ///
    /// Query failures carry `$err`, command failures `errmsg`, and
    /// `getLastError` results `err`.
    pub(crate) fn from_error_document(doc: &Document) -> Self {
        let message = ["$err", "errmsg", "err"]
            .iter()
            .find_map(|key| doc.get_str(key).ok())
            .unwrap_or("unknown server error")
            .to_string();
        let code = doc
            .get("code")
            .and_then(|c| c.as_i32().or_else(|| c.as_i64().map(|v| v as i32)));
        ClientError::Server { code, message }
    }
}
