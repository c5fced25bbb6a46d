//! Error types for session operations

/// Errors from session operations.
///
/// `RefreshFailed` and `MissingAuthentication` render exactly the strings
/// the cross-frame protocol reports to client frames.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unable to refresh tokens")]
    RefreshFailed,

    #[error("Missing Authentication")]
    MissingAuthentication,

    #[error(transparent)]
    Gateway(#[from] broker_auth::Error),
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
