//! Error types for the session layer.

/// Errors that can occur while establishing who a connection belongs to.
///
/// Both variants are answered with an `auth:error` frame; the connection
/// stays open and may retry.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The token was invalid, expired, or rejected by the
    /// [`IdentityVerifier`](crate::IdentityVerifier).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The `auth` frame carried an empty token.
    #[error("missing token")]
    MissingToken,

    /// A token table could not be loaded.
    #[error("invalid token table: {0}")]
    InvalidTokenTable(#[source] serde_json::Error),
}
