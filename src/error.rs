//! Error types for the ident-client library.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while querying an IDENT server.
///
/// [`Ident`](crate::Ident) collapses all of these into a plain `None`;
/// [`Client::query`](crate::Client::query) returns them for callers that
/// want the detail.
#[derive(Debug, Error)]
pub enum IdentError {
    /// A required configuration field was never set.
    #[error("missing configuration: '{field}' is not set")]
    MissingConfig {
        /// The name of the missing field.
        field: &'static str,
    },

    /// The remote address could not be resolved.
    #[error("failed to resolve {address}: {source}")]
    Resolve {
        /// The address that failed to resolve.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to connect to the IDENT service.
    #[error("failed to connect to {address}: {source}")]
    ConnectionFailed {
        /// The `host:port` that failed to connect.
        address: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to write the query line.
    #[error("failed to write query: {0}")]
    WriteError(#[source] std::io::Error),

    /// Failed to read the response line.
    #[error("failed to read response: {0}")]
    ReadError(#[source] std::io::Error),

    /// The server closed the connection without sending anything.
    #[error("empty response")]
    EmptyResponse,

    /// The server answered with an `ERROR` reply.
    #[error("ident error reply: {error}")]
    ErrorReply {
        /// Error type reported by the server (e.g. "NO-USER").
        error: String,
    },

    /// The response does not have the `<port-pair> : USERID : ...` shape.
    #[error("malformed response: {0:?}")]
    MalformedResponse(String),

    /// The operation did not complete in time.
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl IdentError {
    /// Whether this is a protocol-level failure (the server answered, but not
    /// with a usable `USERID` reply) rather than a transport failure.
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            IdentError::EmptyResponse
                | IdentError::ErrorReply { .. }
                | IdentError::MalformedResponse(_)
        )
    }
}

/// Result type alias for ident-client operations.
pub type Result<T> = std::result::Result<T, IdentError>;
