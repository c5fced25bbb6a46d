//! Session layer for the SSO broker
//!
//! Owns the broker-origin credential store and the session service that
//! orchestrates it with the auth gateway and the token evaluator. The
//! session service is the sole mutator of the stored token triple; the
//! message handler above it never touches the store directly.
//!
//! Session lifecycle:
//! 1. Login (or a client code exchange) produces a `TokenSet`
//! 2. The triple is persisted under fixed store keys
//! 3. Every verification re-reads and re-evaluates the triple
//! 4. A stale-but-refreshable triple is refreshed through the gateway
//! 5. Logout clears all three entries unconditionally

pub mod error;
pub mod service;
pub mod store;

pub use error::{Error, Result};
pub use service::{AuthRequestParams, CheckAuth, SessionService};
pub use store::{ACCESS_TOKEN_KEY, CredentialStore, ID_TOKEN_KEY, REFRESH_TOKEN_KEY};
