//! Token evaluation: claim decoding and expiry decisions
//!
//! Decoding is deliberately unverified — the broker trusts the
//! authorization server that issued the token and only needs the payload
//! claims (expiry, identity) for its own refresh decisions. Signature
//! verification happens at the APIs that accept these tokens.
//!
//! Every decode failure fails soft (`None`) and every expiry question
//! fails closed (`true`): a token the broker cannot read is a token the
//! broker will refresh.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::constants::TOKEN_REFRESH_EXPIRATION_BUFFER_SECONDS;

/// The access/id/refresh token triple exchanged with client frames.
///
/// All members are optional; a set is "authenticated" iff the access token
/// is present and non-empty. Serialized camelCase to match the cross-frame
/// wire protocol, with absent members omitted entirely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl TokenSet {
    /// Authenticated iff the access token is present and non-empty.
    pub fn is_authenticated(&self) -> bool {
        !is_null_or_empty(self.access_token.as_deref())
    }
}

/// Decoded JWT payload. Derived on demand, never persisted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Claims {
    /// Expiry as a unix timestamp in seconds
    pub exp: Option<i64>,
    pub email: Option<String>,
    pub name: Option<String>,
}

/// User identity projected from an id token's claims. Ephemeral,
/// recomputed per request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct User {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// True when the value is absent or an empty string.
pub fn is_null_or_empty(value: Option<&str>) -> bool {
    value.is_none_or(str::is_empty)
}

/// Decode the payload segment of a compact JWT without verifying it.
///
/// Returns `None` for empty input, a malformed compact form, invalid
/// base64url, or a payload that is not a JSON object. Never errors.
pub fn decode_claims(token: &str) -> Option<Claims> {
    if token.is_empty() {
        return None;
    }
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Determine whether an access token should be treated as expired.
///
/// Fails closed: absent, undecodable, and `exp`-less tokens are all
/// expired. A token whose `exp` minus the refresh buffer is at or before
/// the clock is expired, so refreshes happen slightly before real expiry.
pub fn is_token_expired(access_token: Option<&str>) -> bool {
    is_token_expired_at(access_token, unix_now())
}

/// Expiry decision against an explicit clock, for deterministic callers.
pub fn is_token_expired_at(access_token: Option<&str>, now: i64) -> bool {
    let Some(token) = access_token else {
        return true;
    };
    let Some(claims) = decode_claims(token) else {
        return true;
    };
    match claims.exp {
        // checked_sub keeps a hostile exp near i64::MIN from wrapping to a
        // far-future value; an unrepresentable deadline is an expired token
        Some(exp) => exp
            .checked_sub(TOKEN_REFRESH_EXPIRATION_BUFFER_SECONDS)
            .is_none_or(|deadline| deadline <= now),
        None => true,
    }
}

/// Project the current user from a token set.
///
/// Only an authenticated set yields a user, and the projection comes from
/// the id token's claims — an unreadable id token yields `None`.
pub fn current_user(authentication: &TokenSet) -> Option<User> {
    if !authentication.is_authenticated() {
        return None;
    }
    let claims = decode_claims(authentication.id_token.as_deref().unwrap_or_default())?;
    Some(User {
        name: claims.name,
        email: claims.email,
    })
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    /// Build an unsigned compact JWT carrying the given payload.
    pub fn jwt(payload: serde_json::Value) -> String {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg":"none","typ":"JWT"}).to_string());
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        format!("{header}.{body}.sig")
    }

    pub fn access_token_expiring_at(exp: i64) -> String {
        jwt(json!({ "exp": exp }))
    }

    pub fn id_token_for(name: &str, email: &str) -> String {
        jwt(json!({ "name": name, "email": email, "exp": 4_102_444_800i64 }))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_claims_reads_payload_fields() {
        let token = jwt(json!({"exp": 1700000000, "email": "user@email.com", "name": "A User"}));
        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.exp, Some(1700000000));
        assert_eq!(claims.email.as_deref(), Some("user@email.com"));
        assert_eq!(claims.name.as_deref(), Some("A User"));
    }

    #[test]
    fn decode_claims_fails_soft() {
        assert!(decode_claims("").is_none());
        assert!(decode_claims("not-a-jwt").is_none());
        assert!(decode_claims("a.!!!invalid-base64!!!.c").is_none());
        // valid base64, payload is not JSON
        let bogus = format!("h.{}.s", URL_SAFE_NO_PAD.encode("plain text"));
        assert!(decode_claims(&bogus).is_none());
    }

    #[test]
    fn absent_and_undecodable_tokens_are_expired() {
        assert!(is_token_expired(None));
        assert!(is_token_expired(Some("")));
        assert!(is_token_expired(Some("garbage")));
    }

    #[test]
    fn token_without_exp_is_expired() {
        let token = jwt(json!({"email": "user@email.com"}));
        assert!(is_token_expired_at(Some(&token), 0));
    }

    #[test]
    fn expiry_respects_the_refresh_buffer() {
        let now = 1_700_000_000i64;
        // more than 60s of life left — usable
        let fresh = access_token_expiring_at(now + 61);
        assert!(!is_token_expired_at(Some(&fresh), now));
        // exactly at the buffer boundary — expired
        let boundary = access_token_expiring_at(now + 60);
        assert!(is_token_expired_at(Some(&boundary), now));
        // inside the buffer — expired even though exp is in the future
        let dying = access_token_expiring_at(now + 30);
        assert!(is_token_expired_at(Some(&dying), now));
        // genuinely past
        let dead = access_token_expiring_at(now - 10);
        assert!(is_token_expired_at(Some(&dead), now));
    }

    #[test]
    fn extreme_exp_values_stay_fail_closed() {
        // exp near i64::MIN must not wrap past the buffer subtraction into
        // a far-future deadline
        let hostile = access_token_expiring_at(i64::MIN);
        assert!(is_token_expired_at(Some(&hostile), 0));
        let near_min = access_token_expiring_at(i64::MIN + 30);
        assert!(is_token_expired_at(Some(&near_min), 0));
        // a far-future exp is still fine
        let far = access_token_expiring_at(i64::MAX);
        assert!(!is_token_expired_at(Some(&far), 0));
    }

    #[test]
    fn token_set_authenticated_requires_non_empty_access_token() {
        assert!(!TokenSet::default().is_authenticated());
        assert!(
            !TokenSet {
                access_token: Some(String::new()),
                ..Default::default()
            }
            .is_authenticated()
        );
        assert!(
            TokenSet {
                access_token: Some("a".into()),
                ..Default::default()
            }
            .is_authenticated()
        );
    }

    #[test]
    fn current_user_projects_from_id_token() {
        let set = TokenSet {
            access_token: Some("a".into()),
            id_token: Some(id_token_for("firstName LastName", "user@email.com")),
            refresh_token: Some("r".into()),
        };
        let user = current_user(&set).unwrap();
        assert_eq!(user.name.as_deref(), Some("firstName LastName"));
        assert_eq!(user.email.as_deref(), Some("user@email.com"));
    }

    #[test]
    fn current_user_requires_authentication() {
        let set = TokenSet {
            id_token: Some(id_token_for("n", "e")),
            ..Default::default()
        };
        assert!(current_user(&set).is_none());
    }

    #[test]
    fn current_user_fails_soft_on_unreadable_id_token() {
        let set = TokenSet {
            access_token: Some("a".into()),
            id_token: Some("garbage".into()),
            refresh_token: None,
        };
        assert!(current_user(&set).is_none());
    }

    #[test]
    fn token_set_serializes_camel_case_and_skips_absent() {
        let set = TokenSet {
            access_token: Some("a".into()),
            id_token: None,
            refresh_token: Some("r".into()),
        };
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"{"accessToken":"a","refreshToken":"r"}"#);
    }

    #[test]
    fn token_set_deserializes_with_missing_members() {
        let set: TokenSet = serde_json::from_str(r#"{"accessToken":"a"}"#).unwrap();
        assert_eq!(set.access_token.as_deref(), Some("a"));
        assert!(set.id_token.is_none());
        assert!(set.refresh_token.is_none());
    }
}
