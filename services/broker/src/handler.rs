//! Cross-frame message handler
//!
//! The state machine between embedded client frames and the session
//! service. Validates inbound envelopes, dispatches the typed command,
//! shapes the response, and posts it — plus, for the
//! unauthenticated-with-redirect case, a second `redirectToLogin` notice.
//!
//! Failure policy: invalid and unknown messages are dropped silently (no
//! response leaks the protocol's existence to untrusted origins), while
//! every failure past dispatch is absorbed into a `success:false`
//! response. Nothing thrown here ever reaches the host loop.

use std::sync::Arc;

use tracing::debug;

use broker_auth::tokens::{TokenSet, current_user, is_null_or_empty};
use broker_session::{Error as SessionError, SessionService};

use crate::metrics;
use crate::protocol::{
    Action, Envelope, InboundMessage, MessageSource, ResponseDetails, ResponseKind,
    ResponseMessage,
};

/// Destination for outbound messages — the postMessage seam. The broker
/// sends with no recipient restriction; correlation ids and the receiving
/// frame's own origin checks carry the trust.
pub trait MessageSink: Send + Sync {
    fn post(&self, message: ResponseMessage);
}

/// Processes authentication messages from client frames.
///
/// Holds no per-message state: `process` may run concurrently for
/// distinct envelopes, each suspending independently through its own
/// session round trip.
pub struct MessageHandler {
    origin: String,
    session: Arc<SessionService>,
}

impl MessageHandler {
    pub fn new(origin: impl Into<String>, session: Arc<SessionService>) -> Self {
        Self {
            origin: origin.into(),
            session,
        }
    }

    /// Validate that an envelope is a cross-frame action message.
    ///
    /// Rejects payloads that are not objects, lack a usable `action`, or
    /// originate from the broker's own window on its own origin (the
    /// broker must not mistake itself for a client).
    pub fn validate(&self, envelope: &Envelope) -> bool {
        let Some(payload) = envelope.data.as_object() else {
            return false;
        };
        let has_action = payload
            .get("action")
            .and_then(|a| a.as_str())
            .is_some_and(|a| !a.is_empty());
        if !has_action {
            return false;
        }
        !(envelope.origin == self.origin && envelope.source == MessageSource::Broker)
    }

    /// Handle one inbound envelope, posting zero, one, or two messages.
    pub async fn process(&self, envelope: &Envelope, sink: &dyn MessageSink) {
        if !self.validate(envelope) {
            metrics::record_dropped("invalid");
            return;
        }
        let Some(message) = InboundMessage::parse(&envelope.data) else {
            // Unknown command: deliberately no response at all
            metrics::record_dropped("unknown_action");
            return;
        };

        debug!(
            action = ?message.response_kind,
            client_id = %message.client_id,
            id = message.common.id.as_deref().unwrap_or_default(),
            "processing message"
        );
        metrics::record_message(message.response_kind.name());

        let mut response = ResponseMessage {
            response: message.response_kind,
            details: self.dispatch(&message).await,
        };

        // Correlation fields are echoed verbatim on every response
        response.details.id = message.common.id.clone();
        response.details.client_state = message.common.client_state.clone().unwrap_or_default();

        let unauthenticated = !response.details.is_authenticated;
        debug!(response = ?response.response, success = response.details.success, "responding");
        sink.post(response);

        // Two-message protocol: the primary response always goes first,
        // then the redirect notice when the frame asked for one.
        if message.common.redirect_unauthenticated
            && unauthenticated
            && !is_null_or_empty(message.common.redirect_uri.as_deref())
        {
            self.redirect_to_login(&message, sink);
        }
    }

    async fn dispatch(&self, message: &InboundMessage) -> ResponseDetails {
        match &message.action {
            Action::Initialize => ResponseDetails {
                success: true,
                is_authenticated: false,
                ..Default::default()
            },
            Action::Authenticate { authentication } => {
                self.authenticate(authentication, &message.client_id).await
            }
            Action::Logout { client_only_logout } => self.logout(*client_only_logout).await,
            Action::RedeemCode {
                code,
                redirect_uri,
                code_verifier,
            } => {
                self.redeem_code(
                    &message.client_id,
                    redirect_uri,
                    code,
                    code_verifier.as_deref(),
                )
                .await
            }
            Action::RefreshTokens { refresh_token } => {
                self.refresh_tokens(&message.client_id, refresh_token.clone())
                    .await
            }
        }
    }

    async fn authenticate(&self, authentication: &TokenSet, client_id: &str) -> ResponseDetails {
        match self.session.verify_tokens(authentication, client_id).await {
            Ok(verified) => ResponseDetails {
                is_authenticated: verified.is_authenticated(),
                user: current_user(&verified),
                authentication: Some(verified),
                success: true,
                ..Default::default()
            },
            Err(err) => {
                // Fail closed: a failed verification ends the broker's own
                // session too, even when the cause was transient.
                self.session.logout().await;
                ResponseDetails {
                    is_authenticated: false,
                    success: false,
                    error: Some(err.to_string()),
                    ..Default::default()
                }
            }
        }
    }

    async fn logout(&self, client_only_logout: bool) -> ResponseDetails {
        if !client_only_logout {
            self.session.logout().await;
        }
        ResponseDetails {
            is_authenticated: false,
            success: true,
            ..Default::default()
        }
    }

    async fn redeem_code(
        &self,
        client_id: &str,
        redirect_uri: &str,
        code: &str,
        code_verifier: Option<&str>,
    ) -> ResponseDetails {
        let grant = match self
            .session
            .exchange_code_for_client(client_id, redirect_uri, code, code_verifier)
            .await
        {
            Ok(grant) => grant,
            Err(err) => {
                return ResponseDetails {
                    is_authenticated: false,
                    success: false,
                    error: Some(err.to_string()),
                    ..Default::default()
                };
            }
        };

        match grant.granted() {
            // A grant can report success with an unusable token set, so the
            // authenticated flag always comes from access-token presence
            Some(tokens) => ResponseDetails {
                success: true,
                is_authenticated: tokens.is_authenticated(),
                user: current_user(tokens),
                authentication: Some(tokens.clone()),
                ..Default::default()
            },
            None => ResponseDetails {
                is_authenticated: false,
                success: false,
                error: grant.error.clone(),
                ..Default::default()
            },
        }
    }

    async fn refresh_tokens(
        &self,
        client_id: &str,
        refresh_token: Option<String>,
    ) -> ResponseDetails {
        match self.refresh_for_client(client_id, refresh_token).await {
            Ok(details) => details,
            Err(err) => ResponseDetails {
                is_authenticated: false,
                success: false,
                error: Some(err.to_string()),
                ..Default::default()
            },
        }
    }

    async fn refresh_for_client(
        &self,
        client_id: &str,
        refresh_token: Option<String>,
    ) -> Result<ResponseDetails, SessionError> {
        let refresh_token = refresh_token
            .filter(|t| !t.is_empty())
            .ok_or(SessionError::MissingAuthentication)?;
        let grant = self
            .session
            .refresh_tokens_for_client(client_id, &refresh_token)
            .await?;
        let granted = grant
            .granted()
            .ok_or(SessionError::MissingAuthentication)?;

        // Server may omit the refresh token; the one we were given survives
        let tokens = TokenSet {
            access_token: granted.access_token.clone(),
            id_token: granted.id_token.clone(),
            refresh_token: granted.refresh_token.clone().or(Some(refresh_token)),
        };
        if !tokens.is_authenticated() {
            return Err(SessionError::MissingAuthentication);
        }
        Ok(ResponseDetails {
            is_authenticated: true,
            success: true,
            user: current_user(&tokens),
            authentication: Some(tokens),
            ..Default::default()
        })
    }

    fn redirect_to_login(&self, message: &InboundMessage, sink: &dyn MessageSink) {
        let notice = ResponseMessage {
            response: ResponseKind::RedirectToLogin,
            details: ResponseDetails {
                id: message.common.id.clone(),
                is_authenticated: false,
                client_state: message.common.client_state.clone().unwrap_or_default(),
                success: true,
                ..Default::default()
            },
        };
        debug!("redirecting client to login page");
        sink.post(notice);
    }
}

impl ResponseKind {
    /// Wire name, for metrics labels.
    pub fn name(self) -> &'static str {
        match self {
            ResponseKind::Initialized => "initialized",
            ResponseKind::Authenticate => "authenticate",
            ResponseKind::CheckAuthentication => "checkAuthentication",
            ResponseKind::Logout => "logout",
            ResponseKind::RedeemCode => "redeemCode",
            ResponseKind::RefreshTokens => "refreshTokens",
            ResponseKind::RedirectToLogin => "redirectToLogin",
        }
    }
}
