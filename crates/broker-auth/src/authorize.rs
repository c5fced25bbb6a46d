//! Authorize-URL construction for the client code flow
//!
//! When the broker already holds a valid session and a client portal asks
//! to sign in, the broker skips its login form and navigates straight to
//! the authorization endpoint, which issues the portal an authorization
//! code at its registered redirect URI. The PKCE challenge and client
//! state ride along untouched — the broker only relays them.

use reqwest::Url;

use crate::constants::CLIENT_AUTHORIZE_PATH;
use crate::error::{Error, Result};

/// Parameters a client portal supplies when initiating a code flow.
#[derive(Debug, Clone, Default)]
pub struct AuthorizeParams {
    pub client_id: String,
    pub redirect_uri: String,
    /// S256 PKCE challenge, generated and retained by the portal
    pub code_challenge: Option<String>,
    /// Opaque CSRF/navigation state echoed back in the callback
    pub state: Option<String>,
}

/// Build the authorization-endpoint URL for a client code flow.
///
/// Optional parameters appear in the query string only when supplied.
pub fn authorize_url(base_url: &str, params: &AuthorizeParams) -> Result<String> {
    let root = format!("{}{CLIENT_AUTHORIZE_PATH}", base_url.trim_end_matches('/'));
    let mut url = Url::parse(&root)
        .map_err(|e| Error::Http(format!("invalid authorize URL {root}: {e}")))?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("clientId", &params.client_id);
        query.append_pair("redirectUri", &params.redirect_uri);
        if let Some(challenge) = &params.code_challenge {
            query.append_pair("codeChallenge", challenge);
        }
        if let Some(state) = &params.state {
            query.append_pair("state", state);
        }
    }

    Ok(url.into())
}
