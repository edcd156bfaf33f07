//! Signature-blind JWT claim decoding.
//!
//! The dashboard never holds the signing secret, so tokens are decoded
//! without signature verification, purely to read expiry and the
//! embedded user snapshot. Verification is the server's job; a token
//! we cannot read is simply treated as expired (fail-closed).
//!
//! Nothing here returns an error: malformed input yields `None`.

use std::collections::HashSet;

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use vmpanel_core::User;

/// Claims the dashboard cares about. Everything else in the payload is
/// ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Expiration time (UTC Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// Issued-at time (UTC Unix timestamp).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// User snapshot embedded by the backend, sparing a `/@me` round
    /// trip during bootstrap.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

/// Validation settings that only parse: no signature check, no expiry
/// check (expiry is evaluated explicitly by [`is_expired`]).
fn unverified() -> Validation {
    // With signature validation off the `algorithms` list is never
    // consulted, so the header algorithm is accepted whatever the
    // backend signs with.
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    validation
}

/// Decode a bearer token into [`Claims`], or `None` on any malformed
/// input. Never panics.
pub fn decode_claims(token: &str) -> Option<Claims> {
    match decode::<Claims>(token, &DecodingKey::from_secret(&[]), &unverified()) {
        Ok(data) => Some(data.claims),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to decode bearer token");
            None
        }
    }
}

/// Whether the token is expired. Malformed tokens and tokens without
/// an `exp` claim count as expired.
pub fn is_expired(token: &str) -> bool {
    match decode_claims(token).and_then(|claims| claims.exp) {
        Some(exp) => exp < Utc::now().timestamp(),
        None => true,
    }
}

/// The token's expiry instant, if it carries one.
pub fn expiration(token: &str) -> Option<DateTime<Utc>> {
    let exp = decode_claims(token)?.exp?;
    Utc.timestamp_opt(exp, 0).single()
}

/// Seconds until the token expires, clamped to 0 for tokens already
/// past their expiry. `None` when the token carries no readable `exp`.
pub fn time_until_expiry(token: &str) -> Option<i64> {
    let exp = decode_claims(token)?.exp?;
    Some((exp - Utc::now().timestamp()).max(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    /// Mint a token with the given claims. The secret is irrelevant --
    /// decoding is signature-blind.
    fn mint(claims: &Claims) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .expect("token encoding should succeed")
    }

    fn claims(exp: Option<i64>) -> Claims {
        Claims {
            exp,
            iat: Some(Utc::now().timestamp()),
            user: None,
        }
    }

    #[test]
    fn decodes_regardless_of_header_algorithm() {
        let exp = Utc::now().timestamp() + 3600;
        let token = encode(
            &Header::new(jsonwebtoken::Algorithm::HS384),
            &claims(Some(exp)),
            &EncodingKey::from_secret(b"test-secret"),
        )
        .expect("token encoding should succeed");

        let decoded = decode_claims(&token).expect("non-HS256 token should decode");
        assert_eq!(decoded.exp, Some(exp));
        assert!(!is_expired(&token));
    }

    #[test]
    fn malformed_tokens_decode_to_none() {
        assert!(decode_claims("").is_none());
        assert!(decode_claims("not-a-jwt").is_none());
        assert!(decode_claims("a.b").is_none());
        assert!(decode_claims("!!!.@@@.###").is_none());
    }

    #[test]
    fn malformed_tokens_are_expired() {
        assert!(is_expired("not-a-jwt"));
        assert!(is_expired(""));
    }

    #[test]
    fn missing_exp_claim_is_expired() {
        let token = mint(&claims(None));
        assert!(is_expired(&token));
        assert_eq!(time_until_expiry(&token), None);
        assert_eq!(expiration(&token), None);
    }

    #[test]
    fn future_exp_is_not_expired() {
        let exp = Utc::now().timestamp() + 3600;
        let token = mint(&claims(Some(exp)));
        assert!(!is_expired(&token));

        let remaining = time_until_expiry(&token).expect("exp claim is present");
        assert!(remaining > 3500 && remaining <= 3600);
    }

    #[test]
    fn past_exp_is_expired_and_clamps_to_zero() {
        let exp = Utc::now().timestamp() - 3600;
        let token = mint(&claims(Some(exp)));
        assert!(is_expired(&token));
        assert_eq!(time_until_expiry(&token), Some(0));
    }

    #[test]
    fn embedded_user_snapshot_decodes() {
        let user: User = serde_json::from_value(serde_json::json!({
            "id": 1,
            "email": "a@b.com",
            "createdAt": "2024-01-01T00:00:00Z",
            "updatedAt": "2024-01-01T00:00:00Z",
            "VMs": [{ "id": 5, "hostname": "h1" }],
        }))
        .expect("user fixture should deserialize");

        let token = mint(&Claims {
            exp: Some(Utc::now().timestamp() + 60),
            iat: None,
            user: Some(user),
        });

        let decoded = decode_claims(&token).expect("token should decode");
        let user = decoded.user.expect("user claim is present");
        assert_eq!(user.id, 1);
        assert_eq!(user.vms[0].hostname, "h1");
    }
}
