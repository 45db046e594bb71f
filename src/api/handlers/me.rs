//! The authenticated user's own account.
//!
//! Flow Overview:
//! 1) Resolve the session to an identity; anonymous requests get 401.
//! 2) Apply the requested change together with its audit record.
//!
//! Changing the email re-arms confirmation: the address is marked
//! unverified and a fresh confirmation link goes out.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::{valid_email, valid_password, ServiceError};
use crate::{
    activity,
    api::{email, email::EmailSender, session},
    auth::{
        credentials::{hash_password, verify_password},
        store, AuthError, Identity, Principal,
    },
    cli::globals::GlobalArgs,
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub username: String,
    pub nickname: String,
    pub provider: String,
    pub email: String,
    pub email_validated: bool,
    pub first_name: String,
    pub last_name: String,
    pub role: Option<String>,
    pub created_at: String,
    pub last_seen: String,
}

impl ProfileResponse {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            username: identity.username.clone(),
            nickname: identity.nickname().to_string(),
            provider: identity.auth_provider().to_string(),
            email: identity.email.clone(),
            email_validated: identity.email_validated,
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            role: identity.role.as_ref().map(|role| role.name.clone()),
            created_at: identity.created_at.to_rfc3339(),
            last_seen: identity.last_seen.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct ProfileUpdateRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct PasswordChangeRequest {
    pub current_password: String,
    pub new_password: String,
}

async fn current_identity(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Identity, ServiceError> {
    match session::resolve_principal(headers, pool).await {
        Ok(Principal::Authenticated(identity)) => Ok(identity),
        Ok(Principal::Anonymous) => Err(ServiceError::Unauthorized("No valid session.")),
        Err(err) => Err(ServiceError::Internal(err)),
    }
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "The caller's profile.", body = ProfileResponse),
        (status = 401, description = "No valid session."),
    ),
    tag = "me"
)]
pub async fn get_me(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    match current_identity(&headers, &pool.0).await {
        Ok(identity) => {
            (StatusCode::OK, Json(ProfileResponse::from_identity(&identity))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    patch,
    path = "/v1/me",
    request_body = ProfileUpdateRequest,
    responses(
        (status = 200, description = "Profile updated.", body = ProfileResponse),
        (status = 400, description = "Invalid email address."),
        (status = 401, description = "No valid session."),
    ),
    tag = "me"
)]
pub async fn patch_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    sender: Extension<Arc<dyn EmailSender>>,
    Json(payload): Json<ProfileUpdateRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    match update_profile(&pool.0, &globals.0, &sender.0, &headers, &payload, &origin).await {
        Ok(identity) => {
            (StatusCode::OK, Json(ProfileResponse::from_identity(&identity))).into_response()
        }
        Err(err) => err.into_response(),
    }
}

async fn update_profile(
    pool: &PgPool,
    globals: &GlobalArgs,
    sender: &Arc<dyn EmailSender>,
    headers: &HeaderMap,
    payload: &ProfileUpdateRequest,
    origin: &str,
) -> Result<Identity, ServiceError> {
    let identity = current_identity(headers, pool).await?;

    let first_name = payload
        .first_name
        .as_deref()
        .unwrap_or(&identity.first_name)
        .trim()
        .to_string();
    let last_name = payload
        .last_name
        .as_deref()
        .unwrap_or(&identity.last_name)
        .trim()
        .to_string();
    let email_addr = payload
        .email
        .as_deref()
        .unwrap_or(&identity.email)
        .trim()
        .to_string();

    if !valid_email(&email_addr) {
        return Err(ServiceError::BadRequest("Invalid email address."));
    }

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    let updated =
        store::update_profile(&mut *tx, identity.id, &first_name, &last_name, &email_addr).await?;

    activity::record_user_event(
        &mut *tx,
        &updated.username,
        origin,
        "Update profile",
        Some(&updated.username),
    )
    .await?;

    // Email change re-arms confirmation; unchanged or verified addresses
    // make this a no-op.
    email::request_email_confirmation(&mut *tx, sender.as_ref(), globals, &updated, origin)
        .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(updated)
}

#[utoipa::path(
    put,
    path = "/v1/me/password",
    request_body = PasswordChangeRequest,
    responses(
        (status = 204, description = "Password changed."),
        (status = 400, description = "Invalid new password."),
        (status = 401, description = "No valid session or wrong current password."),
        (status = 409, description = "Account has no local password."),
    ),
    tag = "me"
)]
pub async fn put_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Json(payload): Json<PasswordChangeRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    match change_password(&pool.0, &headers, &payload, &origin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn change_password(
    pool: &PgPool,
    headers: &HeaderMap,
    payload: &PasswordChangeRequest,
    origin: &str,
) -> Result<(), ServiceError> {
    let identity = current_identity(headers, pool).await?;

    // Provider-backed accounts carry no local password to change.
    let Some(stored_hash) = identity.password_hash.as_deref() else {
        return Err(ServiceError::Conflict("Account has no local password."));
    };

    if !verify_password(stored_hash, &payload.current_password) {
        return Err(ServiceError::Unauthorized("Wrong current password."));
    }

    if !valid_password(&payload.new_password) {
        return Err(ServiceError::BadRequest("Invalid password length."));
    }

    let new_hash = hash_password(&payload.new_password)?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    store::set_password_hash(&mut *tx, identity.id, &new_hash).await?;
    activity::record_authentication(&mut *tx, &identity.username, origin, "Change password")
        .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}

#[utoipa::path(
    delete,
    path = "/v1/me",
    responses(
        (status = 204, description = "Account deleted; session cleared."),
        (status = 401, description = "No valid session."),
    ),
    tag = "me"
)]
pub async fn delete_me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
) -> Response {
    let origin = session::request_origin(&headers);

    match terminate_account(&pool.0, &headers, &origin).await {
        Ok(()) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            if let Ok(cookie) = session::clear_session_cookie(&globals.0) {
                response.headers_mut().insert(SET_COOKIE, cookie);
            }
            response
        }
        Err(err) => err.into_response(),
    }
}

async fn terminate_account(
    pool: &PgPool,
    headers: &HeaderMap,
    origin: &str,
) -> Result<(), ServiceError> {
    let identity = current_identity(headers, pool).await?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    // The record outlives the account: audit strings are snapshots, not
    // references, so inserting before the delete is safe.
    activity::record_user_event(
        &mut *tx,
        &identity.username,
        origin,
        "Terminated account",
        Some(&identity.username),
    )
    .await?;

    if !store::delete_identity(&mut *tx, identity.id).await? {
        error!("Account vanished mid-termination: {}", identity.username);
        return Err(ServiceError::NotFound);
    }

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}
