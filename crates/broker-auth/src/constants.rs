//! Authorization-server paths and token constants
//!
//! The paths identify the authorization server's HTTP surface. They are not
//! secrets — the actual secrets (the token triple) live in the broker's
//! credential store, never in client frames.

/// Seconds subtracted from a token's `exp` claim before comparing against
/// the clock. A token within this window is treated as already expired so
/// it cannot die mid-flight to a downstream API.
pub const TOKEN_REFRESH_EXPIRATION_BUFFER_SECONDS: i64 = 60;

/// Login endpoint for the broker's own sign-in form
pub const LOGIN_PATH: &str = "/auth/login";

/// Refresh endpoint for the broker's own session
pub const TOKEN_REFRESH_PATH: &str = "/auth/token/refresh";

/// Grant endpoint for client portals (code exchange and refresh)
pub const CLIENT_TOKEN_PATH: &str = "/auth/client/token";

/// Authorization endpoint that starts a client code flow via navigation
pub const CLIENT_AUTHORIZE_PATH: &str = "/auth/client/authorize";
