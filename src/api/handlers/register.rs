//! Local account registration.
//!
//! Flow Overview:
//! 1) Validate nickname, email and password.
//! 2) Create the identity and its audit record in one transaction.
//! 3) Send the email confirmation link.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use utoipa::ToSchema;

use super::{valid_email, valid_nickname, valid_password, ServiceError};
use crate::{
    activity,
    api::{email, email::EmailSender, session},
    auth::{
        credentials::hash_password,
        identity::{compose_username, Identity, PROVIDER_LOCAL},
        store::{self, NewIdentity},
    },
    cli::globals::GlobalArgs,
};

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterResponse {
    pub username: String,
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/v1/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created.", body = RegisterResponse),
        (status = 400, description = "Invalid nickname, email or password."),
        (status = 409, description = "Username or email already registered."),
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    globals: Extension<GlobalArgs>,
    sender: Extension<Arc<dyn EmailSender>>,
    Json(payload): Json<RegisterRequest>,
) -> impl IntoResponse {
    let origin = session::request_origin(&headers);

    match create_account(&pool.0, &globals.0, &sender.0, &payload, &origin).await {
        Ok(identity) => (
            StatusCode::CREATED,
            Json(RegisterResponse {
                username: identity.username,
                email: identity.email,
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_account(
    pool: &PgPool,
    globals: &GlobalArgs,
    sender: &Arc<dyn EmailSender>,
    payload: &RegisterRequest,
    origin: &str,
) -> Result<Identity, ServiceError> {
    let nickname = payload.username.trim();
    if !valid_nickname(nickname) {
        return Err(ServiceError::BadRequest("Invalid username."));
    }

    let email_addr = payload.email.trim();
    if !valid_email(email_addr) {
        return Err(ServiceError::BadRequest("Invalid email address."));
    }

    if !valid_password(&payload.password) {
        return Err(ServiceError::BadRequest("Invalid password length."));
    }

    let username = compose_username(Some(nickname), None, PROVIDER_LOCAL)
        .ok_or(ServiceError::BadRequest("Invalid username."))?;

    if store::find_by_username(pool, &username).await?.is_some() {
        return Err(ServiceError::Conflict("User already exists."));
    }

    let password_hash = hash_password(&payload.password)?;

    let mut tx = pool.begin().await.map_err(crate::auth::AuthError::from)?;

    let identity = store::create_identity(
        &mut *tx,
        &NewIdentity {
            username,
            email: email_addr.to_string(),
            password_hash: Some(password_hash),
            first_name: payload.first_name.trim().to_string(),
            last_name: payload.last_name.trim().to_string(),
            active: true,
        },
    )
    .await?;

    activity::record_user_event(
        &mut *tx,
        &identity.username,
        origin,
        "Register",
        Some(&identity.username),
    )
    .await?;

    email::request_email_confirmation(&mut *tx, sender.as_ref(), globals, &identity, origin)
        .await?;

    tx.commit().await.map_err(crate::auth::AuthError::from)?;

    Ok(identity)
}
