//! Password reset by emailed link.
//!
//! Flow Overview:
//! 1) `forgot` looks up the address and mails a short-lived signed token;
//!    the response never discloses whether the address is registered.
//! 2) `reset` verifies the token, stores the new hash and audits the reset.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use super::{valid_email, valid_password, ServiceError};
use crate::{
    activity,
    api::{email, email::EmailSender, session},
    auth::{credentials::hash_password, store, token, AuthError},
    cli::globals::GlobalArgs,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/v1/password/forgot",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 202, description = "Reset link sent if the address is registered."),
        (status = 400, description = "Invalid email address."),
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    sender: Extension<Arc<dyn EmailSender>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Response {
    let email_addr = payload.email.trim();
    if !valid_email(email_addr) {
        return (StatusCode::BAD_REQUEST, "Invalid email address.").into_response();
    }

    let origin = session::request_origin(&headers);

    // Same 202 whether or not the address exists.
    match send_reset_link(&pool.0, &globals.0, &sender.0, email_addr, &origin).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn send_reset_link(
    pool: &PgPool,
    globals: &GlobalArgs,
    sender: &Arc<dyn EmailSender>,
    email_addr: &str,
    origin: &str,
) -> Result<(), ServiceError> {
    let Some(identity) = store::find_by_email(pool, email_addr).await? else {
        info!("Password reset requested for unknown address");
        return Ok(());
    };

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    email::send_reset_password_link(&mut *tx, sender.as_ref(), globals, &identity, origin)
        .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/password/reset",
    request_body = ResetPasswordRequest,
    responses(
        (status = 204, description = "Password replaced."),
        (status = 400, description = "Expired or invalid link, or invalid password."),
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    match apply_reset(&pool.0, &globals.0, &payload, &origin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn apply_reset(
    pool: &PgPool,
    globals: &GlobalArgs,
    payload: &ResetPasswordRequest,
    origin: &str,
) -> Result<(), ServiceError> {
    if !valid_password(&payload.password) {
        return Err(ServiceError::BadRequest("Invalid password length."));
    }

    let Some(identity) = token::verify_token(pool, &globals.secret_key, &payload.token).await
    else {
        return Err(ServiceError::BadRequest("This link has expired."));
    };

    let new_hash = hash_password(&payload.password)?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    store::set_password_hash(&mut *tx, identity.id, &new_hash).await?;
    activity::record_user_event(
        &mut *tx,
        &identity.username,
        origin,
        "Reset password",
        Some(&identity.username),
    )
    .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}
