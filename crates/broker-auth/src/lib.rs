//! SSO broker authentication library
//!
//! Provides unverified JWT claim decoding, token expiry evaluation, the
//! HTTP client for the authorization server, and authorize-URL
//! construction. This crate is a standalone library with no dependency on
//! the broker binary — it can be tested and used independently.
//!
//! Token flow:
//! 1. A client frame hands the broker its current `TokenSet`
//! 2. `tokens::is_token_expired()` decides whether a refresh is needed
//! 3. The session layer calls `AuthGateway::refresh_client_tokens()`
//! 4. New tokens are merged over the old set, refresh token preserved
//! 5. For first-time sign-in, `AuthGateway::exchange_code_for_tokens()`
//!    redeems an authorization code (PKCE verifier passed through)

pub mod authorize;
pub mod constants;
pub mod error;
pub mod gateway;
pub mod tokens;

pub use authorize::{AuthorizeParams, authorize_url};
pub use constants::*;
pub use error::{Error, Result};
pub use gateway::{AuthGateway, ClientGrant, HttpAuthGateway, LoginResponse, SelfRefresh, TokenGrant};
pub use tokens::{Claims, TokenSet, User, current_user, decode_claims, is_token_expired};
