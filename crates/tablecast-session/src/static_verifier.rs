//! A fixed token table, for local development and tests.

use std::collections::HashMap;

use crate::{Identity, IdentityVerifier, SessionError};

/// Verifies tokens against an in-memory table of token → [`Identity`].
///
/// The table can be built in code or loaded from JSON:
///
/// ```json
/// {
///   "kitchen-token": { "subjectId": "staff-1", "scopeKind": "staff", "scopeIds": ["b1"] },
///   "table-token":   { "subjectId": "guest-4", "scopeKind": "customer", "scopeIds": ["b1", "t4"] }
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a token.
    pub fn with_token(mut self, token: impl Into<String>, identity: Identity) -> Self {
        self.tokens.insert(token.into(), identity);
        self
    }

    /// Parses a JSON object of token → identity.
    pub fn from_json(json: &str) -> Result<Self, SessionError> {
        let tokens: HashMap<String, Identity> =
            serde_json::from_str(json).map_err(SessionError::InvalidTokenTable)?;
        Ok(Self { tokens })
    }

    /// Number of known tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, SessionError> {
        if token.is_empty() {
            return Err(SessionError::MissingToken);
        }
        self.tokens.get(token).cloned().ok_or_else(|| {
            tracing::debug!("rejected unknown token");
            SessionError::AuthFailed("invalid or expired token".into())
        })
    }
}
