//! Cross-frame message protocol types
//!
//! The wire format client frames speak to the broker: an inbound command
//! envelope and the typed response shape. Parsing is deliberately
//! permissive — client frames are untrusted and loosely typed, so missing
//! or mistyped detail fields degrade to defaults instead of failing the
//! whole message. Only the action name itself gates dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use broker_auth::tokens::{TokenSet, User};

/// Where an envelope came from, relative to the broker's own window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSource {
    /// The broker's own window — never a legitimate command source
    Broker,
    /// An embedded client frame (or anything else cross-document)
    ClientFrame,
}

/// A raw inbound message plus its transport metadata.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: String,
    pub source: MessageSource,
    pub data: Value,
}

/// Correlation and redirect fields common to every action.
///
/// `id` and `client_state` are opaque to the broker and echoed back
/// verbatim in every response to the message that carried them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommonDetails {
    pub id: Option<String>,
    pub client_state: Option<String>,
    pub redirect_unauthenticated: bool,
    pub redirect_uri: Option<String>,
}

/// The closed set of commands a client frame can issue.
#[derive(Debug, Clone)]
pub enum Action {
    Initialize,
    Authenticate {
        authentication: TokenSet,
    },
    Logout {
        client_only_logout: bool,
    },
    RedeemCode {
        code: String,
        redirect_uri: String,
        code_verifier: Option<String>,
    },
    RefreshTokens {
        refresh_token: Option<String>,
    },
}

/// A parsed inbound message: the command, its correlation fields, and the
/// response name the reply must carry.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub action: Action,
    pub response_kind: ResponseKind,
    pub client_id: String,
    pub common: CommonDetails,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AuthenticateDetails {
    authentication: TokenSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LogoutDetails {
    client_only_logout: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RedeemCodeDetails {
    code: String,
    redirect_uri: String,
    code_verifier: Option<String>,
}

/// Deserialize a detail payload, degrading to defaults on any mismatch.
fn details<T: serde::de::DeserializeOwned + Default>(value: &Value) -> T {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

impl InboundMessage {
    /// Parse a validated payload into a typed command.
    ///
    /// Returns `None` for any action outside the closed set — the caller
    /// sends no response at all in that case.
    pub fn parse(data: &Value) -> Option<Self> {
        // Top-level fields read individually so a mistyped clientId cannot
        // take a valid action down with it
        let action_name = data
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let client_id = data
            .get("clientId")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let raw_details = data.get("details").cloned().unwrap_or(Value::Null);
        let common: CommonDetails = details(&raw_details);

        let (action, response_kind) = match action_name {
            "initialize" => (Action::Initialize, ResponseKind::Initialized),
            "authenticate" | "checkAuthentication" => {
                let payload: AuthenticateDetails = details(&raw_details);
                let kind = if action_name == "authenticate" {
                    ResponseKind::Authenticate
                } else {
                    ResponseKind::CheckAuthentication
                };
                (
                    Action::Authenticate {
                        authentication: payload.authentication,
                    },
                    kind,
                )
            }
            "logout" => {
                let payload: LogoutDetails = details(&raw_details);
                (
                    Action::Logout {
                        client_only_logout: payload.client_only_logout,
                    },
                    ResponseKind::Logout,
                )
            }
            "redeemCode" => {
                let payload: RedeemCodeDetails = details(&raw_details);
                (
                    Action::RedeemCode {
                        code: payload.code,
                        redirect_uri: payload.redirect_uri,
                        code_verifier: payload.code_verifier,
                    },
                    ResponseKind::RedeemCode,
                )
            }
            "refreshTokens" => {
                let payload: AuthenticateDetails = details(&raw_details);
                (
                    Action::RefreshTokens {
                        refresh_token: payload.authentication.refresh_token,
                    },
                    ResponseKind::RefreshTokens,
                )
            }
            _ => return None,
        };

        Some(Self {
            action,
            response_kind,
            client_id,
            common,
        })
    }
}

/// Response names, mirroring the action that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseKind {
    Initialized,
    Authenticate,
    CheckAuthentication,
    Logout,
    RedeemCode,
    RefreshTokens,
    RedirectToLogin,
}

/// A message posted back to the requesting frame's parent context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseMessage {
    pub response: ResponseKind,
    pub details: ResponseDetails,
}

/// Response payload.
///
/// `is_authenticated` is always derived from access-token presence, and a
/// failed response never carries an authentication payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub is_authenticated: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<TokenSet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub client_state: String,
}
