//! Error types for authorization-server operations

/// Errors from authorization-server operations.
///
/// Only transport-level failures surface here: connection errors, timeouts,
/// 5xx responses, and undecodable bodies. A 4xx response is data, not an
/// error — callers inspect the parsed `success`/`error` fields instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("authorization server returned {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("invalid response body: {0}")]
    Decode(String),
}

/// Result alias for auth operations.
pub type Result<T> = std::result::Result<T, Error>;
