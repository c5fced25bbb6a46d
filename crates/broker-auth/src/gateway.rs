//! Authorization-server client
//!
//! Four operations against the authorization server: the broker's own
//! login and session refresh, plus the client-portal grant operations
//! (authorization-code exchange and refresh). The `AuthGateway` trait is
//! the seam between session logic and the network — session and handler
//! tests substitute scripted gateways without an HTTP server.
//!
//! Response contract: 4xx-class responses are resolved as parsed data
//! (`success: false` plus an error message) and never return `Err`. Only
//! transport failures and 5xx responses surface as errors, which the
//! session layer treats as a dead refresh path.
//!
//! Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility
//! (`Arc<dyn AuthGateway>`).

use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::constants::{CLIENT_TOKEN_PATH, LOGIN_PATH, TOKEN_REFRESH_PATH};
use crate::error::{Error, Result};
use crate::tokens::TokenSet;

/// Response to the broker's own `POST /auth/login`. Serializable because
/// the broker relays it verbatim to its login page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginResponse {
    pub success: bool,
    /// Opaque provider payload (challenge details, session metadata)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to the broker's own `POST /auth/token/refresh`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SelfRefresh {
    pub success: bool,
    pub authentication: Option<TokenSet>,
}

/// Inner grant payload of a `POST /auth/client/token` response.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenGrant {
    pub success: bool,
    pub authentication: Option<TokenSet>,
}

/// Envelope of a `POST /auth/client/token` response. The server nests the
/// grant under `data` and reports request-level failures (bad code, unknown
/// client) in the top-level `error`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientGrant {
    pub data: Option<TokenGrant>,
    pub error: Option<String>,
}

impl ClientGrant {
    /// The granted token set, when the server reported success.
    pub fn granted(&self) -> Option<&TokenSet> {
        self.data
            .as_ref()
            .filter(|d| d.success)
            .and_then(|d| d.authentication.as_ref())
    }
}

/// Abstraction over the authorization server's HTTP surface.
pub trait AuthGateway: Send + Sync {
    /// Sign the broker's own user in with a username and password.
    fn login<'a>(
        &'a self,
        client_id: &'a str,
        username: &'a str,
        password: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LoginResponse>> + Send + 'a>>;

    /// Refresh the broker's own session tokens.
    fn refresh_broker_tokens<'a>(
        &'a self,
        client_id: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SelfRefresh>> + Send + 'a>>;

    /// Redeem an authorization code for a client portal's tokens.
    fn exchange_code_for_tokens<'a>(
        &'a self,
        client_id: &'a str,
        redirect_uri: &'a str,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ClientGrant>> + Send + 'a>>;

    /// Refresh a client portal's tokens from its refresh token.
    fn refresh_client_tokens<'a>(
        &'a self,
        client_id: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ClientGrant>> + Send + 'a>>;
}

/// reqwest-backed gateway. The client carries the per-call timeout and
/// cookie behavior; timeouts surface as `Error::Http` like any other
/// transport failure, not as a distinct signal.
pub struct HttpAuthGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAuthGateway {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self { client, base_url }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        debug!(%url, "gateway request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            return Err(Error::ServerError {
                status: status.as_u16(),
                body,
            });
        }

        // 4xx bodies parse the same as 2xx — the server reports expected
        // failures in-band and the caller inspects `success`/`error`.
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Decode(format!("response from {path}: {e}")))
    }
}

impl AuthGateway for HttpAuthGateway {
    fn login<'a>(
        &'a self,
        client_id: &'a str,
        username: &'a str,
        password: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<LoginResponse>> + Send + 'a>> {
        Box::pin(async move {
            self.post_json(
                LOGIN_PATH,
                json!({
                    "clientId": client_id,
                    "username": username,
                    "password": password,
                }),
            )
            .await
        })
    }

    fn refresh_broker_tokens<'a>(
        &'a self,
        client_id: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SelfRefresh>> + Send + 'a>> {
        Box::pin(async move {
            self.post_json(
                TOKEN_REFRESH_PATH,
                json!({
                    "clientId": client_id,
                    "refreshToken": refresh_token,
                }),
            )
            .await
        })
    }

    fn exchange_code_for_tokens<'a>(
        &'a self,
        client_id: &'a str,
        redirect_uri: &'a str,
        code: &'a str,
        code_verifier: Option<&'a str>,
    ) -> Pin<Box<dyn Future<Output = Result<ClientGrant>> + Send + 'a>> {
        Box::pin(async move {
            let mut body = json!({
                "grantType": "authorization_code",
                "clientId": client_id,
                "redirectUri": redirect_uri,
                "code": code,
            });
            if let (Some(verifier), Some(map)) = (code_verifier, body.as_object_mut()) {
                map.insert("codeVerifier".into(), json!(verifier));
            }
            self.post_json(CLIENT_TOKEN_PATH, body).await
        })
    }

    fn refresh_client_tokens<'a>(
        &'a self,
        client_id: &'a str,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<ClientGrant>> + Send + 'a>> {
        Box::pin(async move {
            self.post_json(
                CLIENT_TOKEN_PATH,
                json!({
                    "grantType": "refresh_token",
                    "clientId": client_id,
                    "refreshToken": refresh_token,
                }),
            )
            .await
        })
    }
}
