//! Email address confirmation by emailed link.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;

use super::ServiceError;
use crate::{
    activity,
    api::{email, email::EmailSender, session},
    auth::{store, token, AuthError, Principal},
    cli::globals::GlobalArgs,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ConfirmEmailRequest {
    pub token: String,
}

#[utoipa::path(
    post,
    path = "/v1/email/confirm",
    request_body = ConfirmEmailRequest,
    responses(
        (status = 204, description = "Email address marked as verified."),
        (status = 400, description = "Expired or invalid link."),
    ),
    tag = "auth"
)]
pub async fn confirm_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    Json(payload): Json<ConfirmEmailRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    match apply_confirmation(&pool.0, &globals.0, &payload.token, &origin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn apply_confirmation(
    pool: &PgPool,
    globals: &GlobalArgs,
    raw_token: &str,
    origin: &str,
) -> Result<(), ServiceError> {
    let Some(identity) = token::verify_token(pool, &globals.secret_key, raw_token).await else {
        return Err(ServiceError::BadRequest("This link has expired."));
    };

    // Idempotent: confirming twice is fine, the second run records nothing.
    if identity.email_validated {
        return Ok(());
    }

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    store::set_email_validated(&mut *tx, identity.id, true).await?;
    activity::record_user_event(
        &mut *tx,
        &identity.username,
        origin,
        "Email address verified",
        Some(&identity.username),
    )
    .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/email/resend",
    responses(
        (status = 202, description = "Confirmation link re-sent if still needed."),
        (status = 401, description = "No valid session."),
    ),
    tag = "auth"
)]
pub async fn resend_confirmation(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    sender: Extension<Arc<dyn EmailSender>>,
) -> Response {
    let origin = session::request_origin(&headers);

    match resend(&pool.0, &globals.0, &sender.0, &headers, &origin).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn resend(
    pool: &PgPool,
    globals: &GlobalArgs,
    sender: &Arc<dyn EmailSender>,
    headers: &HeaderMap,
    origin: &str,
) -> Result<(), ServiceError> {
    let identity = match session::resolve_principal(headers, pool).await {
        Ok(Principal::Authenticated(identity)) => identity,
        Ok(Principal::Anonymous) => return Err(ServiceError::Unauthorized("No valid session.")),
        Err(err) => return Err(ServiceError::Internal(err)),
    };

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    email::request_email_confirmation(&mut *tx, sender.as_ref(), globals, &identity, origin)
        .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}
