//! Opaque session tokens backing the ambient "current actor".
//!
//! Tokens are random bytes handed to the client as an `HttpOnly` cookie (a
//! bearer header is accepted too) and stored hashed with an expiry. Every
//! request re-resolves the session to a [`Principal`], so role or activation
//! changes take effect on the very next request.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE},
    HeaderMap, HeaderValue,
};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{PgConnection, PgPool, Row};
use tracing::error;
use uuid::Uuid;

use crate::{
    activity::ORIGIN_NOT_SET,
    auth::{error::AuthError, store, Principal},
    cli::globals::GlobalArgs,
};

pub const SESSION_COOKIE_NAME: &str = "janus_session";

#[must_use]
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Base64UrlUnpadded::encode_string(&bytes)
}

/// Only the hash is stored; never compare raw tokens against the database.
#[must_use]
pub fn hash_session_token(token: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(token.as_bytes()))
}

/// Create a session row and return the raw token for the cookie.
pub async fn create_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    ttl_seconds: u64,
) -> Result<String, AuthError> {
    let token = generate_session_token();
    let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);

    sqlx::query(
        r"
        INSERT INTO sessions (token_hash, user_id, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        ",
    )
    .bind(hash_session_token(&token))
    .bind(user_id)
    .bind(ttl)
    .execute(conn)
    .await?;

    Ok(token)
}

pub async fn delete_session(pool: &PgPool, token_hash: &str) -> Result<(), AuthError> {
    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;
    Ok(())
}

/// Resolve the request's session, if any, to a principal. Missing, expired
/// or dangling sessions are all the anonymous principal; only a store
/// failure is an error.
pub async fn resolve_principal(headers: &HeaderMap, pool: &PgPool) -> Result<Principal, AuthError> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(Principal::Anonymous);
    };

    let row = sqlx::query(
        "SELECT user_id FROM sessions WHERE token_hash = $1 AND expires_at > NOW()",
    )
    .bind(hash_session_token(&token))
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(Principal::Anonymous);
    };

    match store::find_by_id(pool, row.get("user_id")).await {
        Ok(Some(identity)) => Ok(Principal::Authenticated(identity)),
        Ok(None) => Ok(Principal::Anonymous),
        Err(err) => {
            error!("Failed to resolve session user: {err}");
            Err(err)
        }
    }
}

/// Build a secure `HttpOnly` cookie for the session token.
pub fn session_cookie(
    globals: &GlobalArgs,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = globals.session_ttl_seconds;
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if globals.session_cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_session_cookie(globals: &GlobalArgs) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if globals.session_cookie_secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Best-effort request origin for the audit trail: proxy headers, then the
/// "not set" sentinel.
#[must_use]
pub fn request_origin(headers: &HeaderMap) -> String {
    for name in ["x-forwarded-for", "x-real-ip"] {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            let first = value.split(',').next().unwrap_or(value).trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    ORIGIN_NOT_SET.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn is_urlsafe_base64(value: &str) -> bool {
        value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    }

    #[test]
    fn token_hash_is_urlsafe_sha256() {
        let hash = hash_session_token("token");
        // 32 digest bytes, unpadded
        assert_eq!(hash.len(), 43);
        assert!(is_urlsafe_base64(&hash));
        assert_eq!(hash, hash_session_token("token"));
        assert_ne!(hash, hash_session_token("other"));
    }

    #[test]
    fn generated_tokens_are_unique_and_cookie_safe() {
        let token = generate_session_token();
        assert_ne!(token, generate_session_token());
        assert_eq!(token.len(), 43);
        assert!(is_urlsafe_base64(&token));
    }

    #[test]
    fn extract_from_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("other=1; janus_session=abc123; more=2"),
        );
        assert_eq!(extract_session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn extract_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok"));
        headers.insert(COOKIE, HeaderValue::from_static("janus_session=abc"));
        assert_eq!(extract_session_token(&headers).as_deref(), Some("tok"));
    }

    #[test]
    fn missing_token_is_none() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn cookie_attributes_follow_config() {
        use secrecy::SecretString;
        let mut globals = GlobalArgs {
            secret_key: SecretString::from("k"),
            base_url: "http://localhost:8080".to_string(),
            session_ttl_seconds: 600,
            session_cookie_secure: false,
            generic_login_errors: false,
            oauth2_default_active: false,
            google_client_id: None,
            google_client_secret: SecretString::from(String::new()),
        };

        let cookie = session_cookie(&globals, "tok").unwrap();
        let value = cookie.to_str().unwrap();
        assert!(value.starts_with("janus_session=tok"));
        assert!(value.contains("HttpOnly"));
        assert!(value.contains("Max-Age=600"));
        assert!(!value.contains("Secure"));

        globals.session_cookie_secure = true;
        let secure = session_cookie(&globals, "tok").unwrap();
        assert!(secure.to_str().unwrap().ends_with("; Secure"));

        let cleared = clear_session_cookie(&globals).unwrap();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn origin_falls_back_to_sentinel() {
        assert_eq!(request_origin(&HeaderMap::new()), ORIGIN_NOT_SET);

        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        assert_eq!(request_origin(&headers), "203.0.113.7");
    }
}
