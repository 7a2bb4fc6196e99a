//! Authentication hook for establishing a connection's identity.
//!
//! Tablecast doesn't issue or validate tokens itself; that belongs to the
//! platform's auth service (JWT, opaque session keys, whatever it uses).
//! Instead it defines the [`IdentityVerifier`] trait: one async method that
//! takes a token string and returns an [`Identity`] or an error. The frame
//! handler calls it whenever a client sends `auth`.
//!
//! Keeping this a trait means production can validate real tokens, local
//! development can use a [`StaticVerifier`](crate::StaticVerifier), and
//! tests can plug in anything, with no change to the handler.

use crate::{Identity, SessionError};

/// Validates a client's auth token and returns their identity.
///
/// # Example
///
/// ```rust
/// use tablecast_session::{Identity, IdentityVerifier, ScopeKind, SessionError};
///
/// /// Treats every token as the id of a staff member of branch "1".
/// /// Only for development.
/// struct TrustingVerifier;
///
/// impl IdentityVerifier for TrustingVerifier {
///     async fn verify(&self, token: &str) -> Result<Identity, SessionError> {
///         if token.is_empty() {
///             return Err(SessionError::MissingToken);
///         }
///         Ok(Identity::new(token, ScopeKind::Staff, vec!["1".into()]))
///     }
/// }
/// ```
pub trait IdentityVerifier: Send + Sync + 'static {
    /// Validates the given token and returns who it belongs to.
    ///
    /// # Returns
    /// - `Ok(Identity)` — the token is valid; its scope decides which
    ///   rooms the connection auto-joins
    /// - `Err(SessionError)` — the token is missing, invalid or expired
    fn verify(
        &self,
        token: &str,
    ) -> impl std::future::Future<Output = Result<Identity, SessionError>> + Send;
}
