//! Session service: the verification/refresh state machine
//!
//! The session's state is implicit in the stored token triple:
//! - Fresh: access token present and not expired
//! - Stale-but-refreshable: access expired (or id token missing) and a
//!   refresh token exists
//! - Unauthenticated: neither a usable access token nor a refresh token
//!
//! `verify_tokens` is the per-request decision point for client frames;
//! `token_refresh`/`get_tokens` keep the broker's own session alive for
//! its login page.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use broker_auth::gateway::{AuthGateway, ClientGrant, LoginResponse};
use broker_auth::tokens::{TokenSet, is_null_or_empty, is_token_expired};
use broker_auth::{AuthorizeParams, authorize_url};
use common::Secret;

use crate::error::{Error, Result};
use crate::store::{ACCESS_TOKEN_KEY, CredentialStore, ID_TOKEN_KEY, REFRESH_TOKEN_KEY};

/// Query parameters the broker's login page receives on load.
///
/// `error` is set by the upstream provider when a flow failed before
/// reaching us. The rest describe a client portal's pending code flow.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthRequestParams {
    pub error: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_challenge: Option<String>,
    pub state: Option<String>,
}

/// Outcome of `check_authentication_state`.
///
/// `redirect` carries the navigation target when cached credentials let
/// the broker skip its login form; the host performs the navigation.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckAuth {
    pub cached_auth: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

/// Orchestrates the credential store, token evaluator, and auth gateway.
///
/// Constructed once per broker process and shared by reference. Methods
/// take `&self`; distinct in-flight messages progress independently and
/// the store tolerates last-write-wins on the rare logout/refresh races.
pub struct SessionService {
    store: Arc<CredentialStore>,
    gateway: Arc<dyn AuthGateway>,
    /// The broker's own client id for its login/refresh operations
    client_id: String,
    /// Authorization-server base URL, for building authorize redirects
    gateway_base_url: String,
}

impl SessionService {
    pub fn new(
        store: Arc<CredentialStore>,
        gateway: Arc<dyn AuthGateway>,
        client_id: impl Into<String>,
        gateway_base_url: impl Into<String>,
    ) -> Self {
        Self {
            store,
            gateway,
            client_id: client_id.into(),
            gateway_base_url: gateway_base_url.into(),
        }
    }

    /// The broker session's current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.store.get(ACCESS_TOKEN_KEY).await
    }

    /// Verify a client frame's token set, refreshing when stale.
    ///
    /// Fresh sets pass through untouched — calling this twice on a fresh
    /// set yields identical output. A stale set with a refresh token goes
    /// through the gateway; the refreshed access/id tokens are merged over
    /// the original and the refresh token is preserved unless the server
    /// supplied a replacement. Any refresh failure, including transport
    /// errors, surfaces as `Error::RefreshFailed` so the caller treats the
    /// session as dead.
    pub async fn verify_tokens(&self, authentication: &TokenSet, client_id: &str) -> Result<TokenSet> {
        let expired = is_token_expired(authentication.access_token.as_deref());
        // An id-token-less set cannot yield a user projection, so it takes
        // the refresh branch even when the access token is still valid.
        let missing_id_token = is_null_or_empty(authentication.id_token.as_deref());
        let refreshable = !is_null_or_empty(authentication.refresh_token.as_deref());

        if (expired || missing_id_token) && refreshable {
            let refresh_token = authentication.refresh_token.as_deref().unwrap_or_default();
            let grant = self
                .gateway
                .refresh_client_tokens(client_id, refresh_token)
                .await
                .map_err(|e| {
                    warn!(client_id, error = %e, "client token refresh failed");
                    Error::RefreshFailed
                })?;
            let granted = grant.granted().ok_or(Error::RefreshFailed)?;
            debug!(client_id, "refreshed client tokens");
            return Ok(TokenSet {
                access_token: granted.access_token.clone(),
                id_token: granted.id_token.clone(),
                refresh_token: granted
                    .refresh_token
                    .clone()
                    .or_else(|| authentication.refresh_token.clone()),
            });
        }

        Ok(authentication.clone())
    }

    /// Read the broker's own token triple, refreshing the access/id pair
    /// first when required and possible. Refresh failures are logged, not
    /// raised — the caller sees whatever triple remains.
    pub async fn get_tokens(&self, refresh_if_required: bool) -> TokenSet {
        let mut access_token = self.store.get(ACCESS_TOKEN_KEY).await;
        let mut id_token = self.store.get(ID_TOKEN_KEY).await;
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).await;

        if refresh_if_required
            && is_token_expired(access_token.as_deref())
            && refresh_token.is_some()
        {
            match self.token_refresh().await {
                Some(tokens) => {
                    access_token = tokens.access_token;
                    id_token = tokens.id_token;
                }
                None => warn!("failed to refresh broker session tokens"),
            }
        }

        TokenSet {
            access_token,
            id_token,
            refresh_token,
        }
    }

    /// Refresh the broker's own session from its stored refresh token.
    ///
    /// Any failure — no refresh token, a gateway-reported rejection, or a
    /// transport error — ends with `logout()` and `None`, so the broker
    /// never holds a half-valid session. On success the refreshed triple
    /// is written back to the store.
    pub async fn token_refresh(&self) -> Option<TokenSet> {
        let tokens = self.refresh_own_tokens().await;
        if tokens.is_none() {
            self.logout().await;
        }
        tokens
    }

    async fn refresh_own_tokens(&self) -> Option<TokenSet> {
        let refresh_token = self.store.get(REFRESH_TOKEN_KEY).await?;
        let response = match self
            .gateway
            .refresh_broker_tokens(&self.client_id, &refresh_token)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "broker token refresh failed");
                return None;
            }
        };
        if !response.success {
            return None;
        }
        let authentication = response.authentication?;
        let tokens = TokenSet {
            access_token: authentication.access_token,
            id_token: authentication.id_token,
            refresh_token: authentication.refresh_token.or(Some(refresh_token)),
        };
        self.persist_tokens(&tokens).await;
        Some(tokens)
    }

    async fn persist_tokens(&self, tokens: &TokenSet) {
        for (key, value) in [
            (ACCESS_TOKEN_KEY, &tokens.access_token),
            (ID_TOKEN_KEY, &tokens.id_token),
            (REFRESH_TOKEN_KEY, &tokens.refresh_token),
        ] {
            if let Some(value) = value {
                if let Err(e) = self.store.set(key, value.clone(), None).await {
                    warn!(key, error = %e, "failed to persist session token");
                }
            }
        }
    }

    /// Clear the broker session. Never fails: absent entries are fine and
    /// persistence errors are logged and swallowed.
    pub async fn logout(&self) {
        for key in [ID_TOKEN_KEY, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            if let Err(e) = self.store.remove(key).await {
                warn!(key, error = %e, "failed to clear session entry");
            }
        }
        debug!("cleared broker session");
    }

    /// Login-page on-load hook.
    ///
    /// An upstream error short-circuits with no side effects. Otherwise a
    /// fully-populated triple (refreshing first if needed) is cached auth:
    /// the result carries the authorize-redirect target when the request
    /// belongs to a client code flow, else the default redirect. Anything
    /// less means the login form should be shown.
    pub async fn check_authentication_state(
        &self,
        params: &AuthRequestParams,
        default_redirect_uri: &str,
    ) -> Result<CheckAuth> {
        if let Some(error) = &params.error {
            return Ok(CheckAuth {
                cached_auth: false,
                error: Some(error.clone()),
                redirect: None,
            });
        }

        let tokens = self.get_tokens(true).await;
        let complete = !is_null_or_empty(tokens.access_token.as_deref())
            && !is_null_or_empty(tokens.id_token.as_deref())
            && !is_null_or_empty(tokens.refresh_token.as_deref());
        if !complete {
            return Ok(CheckAuth::default());
        }

        let redirect = match &params.redirect_uri {
            Some(redirect_uri) if !redirect_uri.is_empty() => authorize_url(
                &self.gateway_base_url,
                &AuthorizeParams {
                    client_id: params.client_id.clone().unwrap_or_default(),
                    redirect_uri: redirect_uri.clone(),
                    code_challenge: params.code_challenge.clone(),
                    state: params.state.clone(),
                },
            )?,
            _ => default_redirect_uri.to_owned(),
        };

        Ok(CheckAuth {
            cached_auth: true,
            error: None,
            redirect: Some(redirect),
        })
    }

    /// Sign the broker's own user in. Thin passthrough for the login form.
    pub async fn login(&self, username: &str, password: &Secret<String>) -> Result<LoginResponse> {
        Ok(self
            .gateway
            .login(&self.client_id, username, password.expose())
            .await?)
    }

    /// Redeem a client portal's authorization code. Passthrough so the
    /// message handler never holds a gateway reference.
    pub async fn exchange_code_for_client(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<ClientGrant> {
        Ok(self
            .gateway
            .exchange_code_for_tokens(client_id, redirect_uri, code, code_verifier)
            .await?)
    }

    /// Refresh a client portal's tokens. Passthrough, as above.
    pub async fn refresh_tokens_for_client(
        &self,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<ClientGrant> {
        Ok(self
            .gateway
            .refresh_client_tokens(client_id, refresh_token)
            .await?)
    }
}
