//! Signed, self-contained, time-limited tokens binding a username.
//!
//! Tokens are not persisted and there is no revocation list: security relies
//! on short expiry windows, and on [`verify_token`] re-resolving the embedded
//! username so a deleted account implicitly invalidates outstanding tokens.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;

use super::{error::AuthError, identity::Identity, store};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    exp: i64,
    iat: i64,
}

/// Issue a token for `username` expiring `ttl_seconds` from now. The TTL is
/// always caller-supplied: email confirmation and password reset links use
/// very different windows.
pub fn issue_token(
    secret: &SecretString,
    username: &str,
    ttl_seconds: i64,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        sub: username.to_string(),
        exp: now + ttl_seconds,
        iat: now,
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.expose_secret().as_bytes()),
    )
    .map_err(|_| AuthError::InvalidOrExpiredToken)
}

/// Decode and validate a token, returning the embedded username. Any failure
/// (bad signature, malformed, expired) is `None`; callers cannot distinguish
/// an expired token from a tampered one.
#[must_use]
pub fn decode_username(secret: &SecretString, token: &str) -> Option<String> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation.set_required_spec_claims(&["exp", "sub"]);

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.expose_secret().as_bytes()),
        &validation,
    )
    .ok()
    .map(|data| data.claims.sub)
}

/// Verify a token and resolve its username against current identity storage.
/// Returns `None` when the token is invalid or the account no longer exists.
/// Activation state is not checked here.
pub async fn verify_token(
    pool: &PgPool,
    secret: &SecretString,
    token: &str,
) -> Option<Identity> {
    let username = decode_username(secret, token)?;
    match store::find_by_username(pool, &username).await {
        Ok(identity) => identity,
        Err(err) => {
            error!("Failed to resolve token subject: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretString {
        SecretString::from("a-test-signing-key")
    }

    #[test]
    fn round_trip_returns_username() {
        let token = issue_token(&secret(), "alice%local", 60).unwrap();
        assert_eq!(
            decode_username(&secret(), &token).as_deref(),
            Some("alice%local")
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue_token(&secret(), "alice%local", -1).unwrap();
        assert_eq!(decode_username(&secret(), &token), None);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let token = issue_token(&secret(), "alice%local", 60).unwrap();
        let mut tampered = token.clone();
        // flip the last signature byte
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert_eq!(decode_username(&secret(), &tampered), None);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue_token(&secret(), "alice%local", 60).unwrap();
        assert_eq!(
            decode_username(&SecretString::from("another-key"), &token),
            None
        );
    }

    #[test]
    fn malformed_token_is_rejected() {
        assert_eq!(decode_username(&secret(), "not-a-token"), None);
        assert_eq!(decode_username(&secret(), ""), None);
    }
}
