//! Connection identity for Tablecast.
//!
//! This crate answers "who is on the other end of this socket, and which
//! rooms should they be in?":
//!
//! 1. **Verification** — turning a token into an [`Identity`]
//!    ([`IdentityVerifier`] trait; token issuance lives elsewhere)
//! 2. **Scoping** — deriving the rooms an identity auto-joins
//!    ([`Identity::auto_join_rooms`])
//! 3. **Development tokens** — [`StaticVerifier`], a fixed token table
//!
//! # How it fits in the stack
//!
//! ```text
//! Frame handler (above)  ← calls verify() on `auth`, then joins rooms
//!     ↕
//! Session layer (this crate)  ← identity + room scoping
//! ```

#![allow(async_fn_in_trait)]

mod auth;
mod error;
mod identity;
mod static_verifier;

pub use auth::IdentityVerifier;
pub use error::SessionError;
pub use identity::{Identity, ScopeKind, branch_room, table_room};
pub use static_verifier::StaticVerifier;
