//! Google OAuth2 login and registration.
//!
//! Flow Overview:
//! 1) `/login` and `/register` store a single-use state row carrying the
//!    intent, then redirect the browser to the provider's consent screen.
//! 2) The callback consumes the state, exchanges the code for claims and
//!    bridges them onto a local identity per the stored intent.

use axum::{
    extract::{Extension, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::error;

use crate::{
    activity,
    api::{google, session},
    auth::{
        oauth2::{self, OAuthIntent, ProviderClaims, PROVIDER_GOOGLE},
        store, AuthError,
    },
    cli::globals::GlobalArgs,
};

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/v1/oauth2/google/login",
    responses(
        (status = 303, description = "Redirect to the provider consent screen."),
        (status = 503, description = "Provider is not configured."),
    ),
    tag = "oauth2"
)]
pub async fn google_login(pool: Extension<PgPool>, globals: Extension<GlobalArgs>) -> Response {
    start_handshake(&pool.0, &globals.0, OAuthIntent::Login).await
}

#[utoipa::path(
    get,
    path = "/v1/oauth2/google/register",
    responses(
        (status = 303, description = "Redirect to the provider consent screen."),
        (status = 503, description = "Provider is not configured."),
    ),
    tag = "oauth2"
)]
pub async fn google_register(pool: Extension<PgPool>, globals: Extension<GlobalArgs>) -> Response {
    start_handshake(&pool.0, &globals.0, OAuthIntent::Register).await
}

async fn start_handshake(pool: &PgPool, globals: &GlobalArgs, intent: OAuthIntent) -> Response {
    if globals.google_client_id.is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Google OAuth2 is not configured.")
            .into_response();
    }

    let state = match oauth2::create_state(pool, intent, PROVIDER_GOOGLE).await {
        Ok(state) => state,
        Err(err) => {
            error!("Failed to create handshake state: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match google::authorize_url(globals, &state) {
        Ok(url) => Redirect::to(&url).into_response(),
        Err(err) => {
            error!("Failed to build authorize URL: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    get,
    path = "/v1/oauth2/google/callback",
    responses(
        (status = 303, description = "Handshake completed; session established."),
        (status = 400, description = "Missing, stale or replayed state, or provider error."),
        (status = 401, description = "No account matches the provider identity."),
        (status = 403, description = "Account is not activated."),
        (status = 409, description = "Provider identity is already registered."),
    ),
    tag = "oauth2"
)]
pub async fn google_callback(
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
) -> Response {
    if let Some(provider_error) = params.error.as_deref() {
        error!("Provider returned an error: {provider_error}");
        return (StatusCode::BAD_REQUEST, "Provider rejected the request.").into_response();
    }

    let (Some(state), Some(code)) = (params.state.as_deref(), params.code.as_deref()) else {
        return (StatusCode::BAD_REQUEST, "Missing state or code.").into_response();
    };

    // Single use: a replayed or expired state dies here.
    let (intent, provider) = match oauth2::consume_state(&pool.0, state).await {
        Ok(Some(consumed)) => consumed,
        Ok(None) => {
            return (StatusCode::BAD_REQUEST, "Unknown or expired state.").into_response();
        }
        Err(err) => {
            error!("Failed to consume handshake state: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let claims = match google::exchange_code(&globals.0, code).await {
        Ok(claims) => claims,
        Err(err) => {
            error!("Failed to exchange authorization code: {err}");
            return (StatusCode::BAD_REQUEST, "Provider handshake failed.").into_response();
        }
    };

    let origin = session::request_origin(&headers);

    match intent {
        OAuthIntent::Login => {
            finish_login(&pool.0, &globals.0, &provider, &claims, &origin).await
        }
        OAuthIntent::Register => {
            finish_registration(&pool.0, &globals.0, &provider, &claims, &origin).await
        }
    }
}

async fn finish_login(
    pool: &PgPool,
    globals: &GlobalArgs,
    provider: &str,
    claims: &ProviderClaims,
    origin: &str,
) -> Response {
    let identity = match oauth2::bridge_login(pool, provider, claims).await {
        Ok(identity) => identity,
        Err(AuthError::UnknownIdentity | AuthError::NoIdentifiableClaim) => {
            return (StatusCode::UNAUTHORIZED, "No account for this identity.").into_response();
        }
        Err(AuthError::AccountNotActive) => {
            return (StatusCode::FORBIDDEN, "Account is not activated.").into_response();
        }
        Err(err) => {
            error!("Failed to bridge login: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let token = match establish_session(pool, globals, &identity.username, identity.id, origin)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to establish session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Redirect::to("/").into_response();
    if let Ok(cookie) = session::session_cookie(globals, &token) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

pub(super) async fn finish_registration(
    pool: &PgPool,
    globals: &GlobalArgs,
    provider: &str,
    claims: &ProviderClaims,
    origin: &str,
) -> Response {
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to begin transaction: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let identity = match oauth2::bridge_register(
        &mut *tx,
        provider,
        claims,
        globals.oauth2_default_active,
    )
    .await
    {
        Ok(identity) => identity,
        Err(AuthError::AlreadyRegistered | AuthError::DuplicateKey(_)) => {
            return (StatusCode::CONFLICT, "User already exists.").into_response();
        }
        Err(AuthError::NoIdentifiableClaim) => {
            return (StatusCode::BAD_REQUEST, "Provider supplied no usable identity.")
                .into_response();
        }
        Err(AuthError::MissingEmailClaim) => {
            return (StatusCode::BAD_REQUEST, "Provider supplied no email address.")
                .into_response();
        }
        Err(err) => {
            error!("Failed to bridge registration: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let recorded = activity::record_user_event(
        &mut *tx,
        &identity.username,
        origin,
        "Register",
        Some(&identity.username),
    )
    .await;
    if let Err(err) = recorded {
        error!("Failed to record registration: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    if let Err(err) = tx.commit().await {
        error!("Failed to commit registration: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    // The new account is logged straight in, active or not; gated
    // operations still check activation on every request.
    let token = match establish_session(pool, globals, &identity.username, identity.id, origin)
        .await
    {
        Ok(token) => token,
        Err(err) => {
            error!("Failed to establish session: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let mut response = Redirect::to("/").into_response();
    if let Ok(cookie) = session::session_cookie(globals, &token) {
        response.headers_mut().insert(SET_COOKIE, cookie);
    }
    response
}

async fn establish_session(
    pool: &PgPool,
    globals: &GlobalArgs,
    username: &str,
    user_id: uuid::Uuid,
    origin: &str,
) -> Result<String, AuthError> {
    let mut tx = pool.begin().await?;

    let token = session::create_session(&mut *tx, user_id, globals.session_ttl_seconds).await?;
    store::touch_last_seen(&mut *tx, user_id).await?;
    activity::record_authentication(&mut *tx, username, origin, "Login").await?;

    tx.commit().await?;

    Ok(token)
}
