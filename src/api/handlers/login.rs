//! Local login, logout and session introspection.
//!
//! Flow Overview:
//! 1) Verify the submitted credentials against stored identities.
//! 2) On success, create a session row and audit the login in one
//!    transaction, then hand the token back as an `HttpOnly` cookie.
//!
//! How much a failed login reveals is deployment policy: with
//! `--generic-login-errors` the unknown-username and wrong-password cases
//! collapse into one message. An inactive account is always named as such,
//! matching the account activation flow.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::error;
use utoipa::ToSchema;

use crate::{
    activity,
    api::session,
    auth::{credentials::verify_local_credentials, store, AuthError, Principal},
    cli::globals::GlobalArgs,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub username: String,
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/v1/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session established.", body = SessionResponse),
        (status = 401, description = "Unknown username or invalid password."),
        (status = 403, description = "Account is not activated."),
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    let identity =
        match verify_local_credentials(&pool.0, payload.username.trim(), &payload.password).await {
            Ok(identity) => identity,
            Err(err) => return login_failure(&globals.0, &err),
        };

    match establish_session(&pool.0, &globals.0, identity.id, &identity.username, &origin).await {
        Ok(token) => {
            let Ok(cookie) = session::session_cookie(&globals.0, &token) else {
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            };
            let mut response = (
                StatusCode::OK,
                Json(SessionResponse {
                    username: identity.username,
                    email: identity.email,
                }),
            )
                .into_response();
            response.headers_mut().insert(SET_COOKIE, cookie);
            response
        }
        Err(err) => {
            error!("Failed to establish session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/logout",
    responses(
        (status = 204, description = "Session cleared; idempotent."),
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
) -> Response {
    let origin = session::request_origin(&headers);

    if let Some(token) = session::extract_session_token(&headers) {
        let token_hash = session::hash_session_token(&token);

        match session::resolve_principal(&headers, &pool.0).await {
            Ok(Principal::Authenticated(identity)) => {
                if let Err(err) = record_logout(&pool.0, &token_hash, &identity.username, &origin).await
                {
                    error!("Failed to record logout: {err}");
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }
            }
            Ok(Principal::Anonymous) => {
                // Stale token: clear the row if any, nothing to audit.
                if let Err(err) = session::delete_session(&pool.0, &token_hash).await {
                    error!("Failed to delete session: {err}");
                }
            }
            Err(err) => {
                error!("Failed to resolve session: {err}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let mut response = StatusCode::NO_CONTENT.into_response();
    if let Ok(cookie) = session::clear_session_cookie(&globals.0) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

#[utoipa::path(
    get,
    path = "/v1/session",
    responses(
        (status = 200, description = "The current session's identity.", body = SessionResponse),
        (status = 401, description = "No valid session."),
    ),
    tag = "auth"
)]
pub async fn session_info(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    match session::resolve_principal(&headers, &pool.0).await {
        Ok(Principal::Authenticated(identity)) => (
            StatusCode::OK,
            Json(SessionResponse {
                username: identity.username,
                email: identity.email,
            }),
        )
            .into_response(),
        Ok(Principal::Anonymous) => StatusCode::UNAUTHORIZED.into_response(),
        Err(err) => {
            error!("Failed to resolve session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn login_failure(globals: &GlobalArgs, err: &AuthError) -> Response {
    match err {
        AuthError::UnknownIdentity => {
            if globals.generic_login_errors {
                (StatusCode::UNAUTHORIZED, "Invalid username or password.").into_response()
            } else {
                (StatusCode::UNAUTHORIZED, "Unknown username.").into_response()
            }
        }
        AuthError::InvalidCredential => {
            if globals.generic_login_errors {
                (StatusCode::UNAUTHORIZED, "Invalid username or password.").into_response()
            } else {
                (StatusCode::UNAUTHORIZED, "Invalid password.").into_response()
            }
        }
        // Always precise: the user must know to ask for activation.
        AuthError::AccountNotActive => {
            (StatusCode::FORBIDDEN, "Account is not activated.").into_response()
        }
        err => {
            error!("Failed to verify credentials: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn establish_session(
    pool: &PgPool,
    globals: &GlobalArgs,
    user_id: uuid::Uuid,
    username: &str,
    origin: &str,
) -> Result<String, AuthError> {
    let mut tx = pool.begin().await?;

    let token = session::create_session(&mut *tx, user_id, globals.session_ttl_seconds).await?;
    store::touch_last_seen(&mut *tx, user_id).await?;
    activity::record_authentication(&mut *tx, username, origin, "Login").await?;

    tx.commit().await?;

    Ok(token)
}

async fn record_logout(
    pool: &PgPool,
    token_hash: &str,
    username: &str,
    origin: &str,
) -> Result<(), AuthError> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(&mut *tx)
        .await?;
    activity::record_authentication(&mut *tx, username, origin, "Logout").await?;

    tx.commit().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn globals(generic: bool) -> GlobalArgs {
        GlobalArgs {
            secret_key: SecretString::from("k"),
            base_url: "http://localhost:8080".to_string(),
            session_ttl_seconds: 3600,
            session_cookie_secure: false,
            generic_login_errors: generic,
            oauth2_default_active: false,
            google_client_id: None,
            google_client_secret: SecretString::from(String::new()),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn precise_mode_distinguishes_failures() {
        let unknown = login_failure(&globals(false), &AuthError::UnknownIdentity);
        let wrong = login_failure(&globals(false), &AuthError::InvalidCredential);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_ne!(body_text(unknown).await, body_text(wrong).await);
    }

    #[tokio::test]
    async fn generic_mode_collapses_to_one_message() {
        let unknown = login_failure(&globals(true), &AuthError::UnknownIdentity);
        let wrong = login_failure(&globals(true), &AuthError::InvalidCredential);
        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_text(unknown).await, body_text(wrong).await);
    }

    #[test]
    fn inactive_account_is_always_named() {
        for generic in [false, true] {
            let response = login_failure(&globals(generic), &AuthError::AccountNotActive);
            assert_eq!(response.status(), StatusCode::FORBIDDEN);
        }
    }
}
