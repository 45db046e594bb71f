//! Administrative user management.
//!
//! Flow Overview:
//! 1) Resolve the session and gate each route on its permission bits.
//! 2) Apply the change together with its audit record in one transaction.
//!
//! The gate answer is a bare 403 in every denied case; responses never say
//! which permission was missing.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::ToSchema;

use super::ServiceError;
use crate::{
    activity,
    api::session,
    auth::{permissions::perm, store, AuthError, Identity},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct UserSummary {
    pub username: String,
    pub email: String,
    pub email_validated: bool,
    pub active: bool,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserDetail {
    pub username: String,
    pub nickname: String,
    pub provider: String,
    pub email: String,
    pub email_validated: bool,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub role: Option<String>,
    pub created_at: String,
    pub last_seen: String,
}

impl UserSummary {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            username: identity.username.clone(),
            email: identity.email.clone(),
            email_validated: identity.email_validated,
            active: identity.active,
            role: identity.role.as_ref().map(|role| role.name.clone()),
        }
    }
}

impl UserDetail {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            username: identity.username.clone(),
            nickname: identity.nickname().to_string(),
            provider: identity.auth_provider().to_string(),
            email: identity.email.clone(),
            email_validated: identity.email_validated,
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            active: identity.active,
            role: identity.role.as_ref().map(|role| role.name.clone()),
            created_at: identity.created_at.to_rfc3339(),
            last_seen: identity.last_seen.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UserAdminRequest {
    pub role: Option<String>,
    pub active: Option<bool>,
}

async fn gate(
    headers: &HeaderMap,
    pool: &PgPool,
    requested: i64,
) -> Result<Identity, ServiceError> {
    let principal = match session::resolve_principal(headers, pool).await {
        Ok(principal) => principal,
        Err(err) => return Err(ServiceError::Internal(err)),
    };

    match principal.authorize(requested) {
        Ok(identity) => Ok(identity.clone()),
        Err(_) => Err(ServiceError::Forbidden),
    }
}

#[utoipa::path(
    get,
    path = "/v1/users",
    responses(
        (status = 200, description = "All users.", body = [UserSummary]),
        (status = 403, description = "Forbidden."),
    ),
    tag = "users"
)]
pub async fn list_users(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    match list(&pool.0, &headers).await {
        Ok(users) => (StatusCode::OK, Json(users)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list(pool: &PgPool, headers: &HeaderMap) -> Result<Vec<UserSummary>, ServiceError> {
    gate(headers, pool, perm::READ_USER).await?;

    let identities = store::list_identities(pool).await?;
    Ok(identities.iter().map(UserSummary::from_identity).collect())
}

#[utoipa::path(
    get,
    path = "/v1/users/{username}",
    params(
        ("username" = String, Path, description = "Composed username, e.g. alice%local")
    ),
    responses(
        (status = 200, description = "User detail.", body = UserDetail),
        (status = 403, description = "Forbidden."),
        (status = 404, description = "No such user."),
    ),
    tag = "users"
)]
pub async fn get_user(
    Path(username): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Response {
    match detail(&pool.0, &headers, &username).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn detail(
    pool: &PgPool,
    headers: &HeaderMap,
    username: &str,
) -> Result<UserDetail, ServiceError> {
    gate(headers, pool, perm::READ_USER).await?;

    let identity = store::find_by_username(pool, username)
        .await?
        .ok_or(ServiceError::NotFound)?;

    Ok(UserDetail::from_identity(&identity))
}

#[utoipa::path(
    put,
    path = "/v1/users/{username}/admin",
    request_body = UserAdminRequest,
    params(
        ("username" = String, Path, description = "Composed username, e.g. alice%local")
    ),
    responses(
        (status = 200, description = "Role and activation updated.", body = UserDetail),
        (status = 400, description = "Unknown role or empty request."),
        (status = 403, description = "Forbidden."),
        (status = 404, description = "No such user."),
    ),
    tag = "users"
)]
pub async fn put_user_admin(
    Path(username): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    Json(payload): Json<UserAdminRequest>,
) -> Response {
    let origin = session::request_origin(&headers);

    match apply_admin_update(&pool.0, &headers, &username, &payload, &origin).await {
        Ok(detail) => (StatusCode::OK, Json(detail)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn apply_admin_update(
    pool: &PgPool,
    headers: &HeaderMap,
    username: &str,
    payload: &UserAdminRequest,
    origin: &str,
) -> Result<UserDetail, ServiceError> {
    let actor = gate(headers, pool, perm::UPDATE_USER).await?;

    if payload.role.is_none() && payload.active.is_none() {
        return Err(ServiceError::BadRequest("No updates provided."));
    }

    let target = store::find_by_username(pool, username)
        .await?
        .ok_or(ServiceError::NotFound)?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    if let Some(active) = payload.active {
        if active != target.active {
            store::set_active(&mut *tx, target.id, active).await?;
            let description = if active { "Activate" } else { "Deactivate" };
            activity::record_privilege_change(
                &mut *tx,
                &actor.username,
                origin,
                description,
                &target.username,
            )
            .await?;
        }
    }

    if let Some(role) = payload.role.as_deref() {
        let role = role.trim();
        if !store::set_role(&mut *tx, target.id, role).await? {
            return Err(ServiceError::BadRequest("Unknown role."));
        }
        activity::record_privilege_change(
            &mut *tx,
            &actor.username,
            origin,
            "Change role",
            &target.username,
        )
        .await?;
    }

    tx.commit().await.map_err(AuthError::from)?;

    let updated = store::find_by_username(pool, username)
        .await?
        .ok_or(ServiceError::NotFound)?;

    Ok(UserDetail::from_identity(&updated))
}

#[utoipa::path(
    delete,
    path = "/v1/users/{username}",
    params(
        ("username" = String, Path, description = "Composed username, e.g. alice%local")
    ),
    responses(
        (status = 204, description = "User deleted."),
        (status = 403, description = "Forbidden."),
        (status = 404, description = "No such user."),
    ),
    tag = "users"
)]
pub async fn delete_user(
    Path(username): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Response {
    let origin = session::request_origin(&headers);

    match remove_user(&pool.0, &headers, &username, &origin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn remove_user(
    pool: &PgPool,
    headers: &HeaderMap,
    username: &str,
    origin: &str,
) -> Result<(), ServiceError> {
    let actor = gate(headers, pool, perm::DELETE_USER).await?;

    let target = store::find_by_username(pool, username)
        .await?
        .ok_or(ServiceError::NotFound)?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    activity::record_user_event(
        &mut *tx,
        &actor.username,
        origin,
        "Delete user",
        Some(&target.username),
    )
    .await?;

    if !store::delete_identity(&mut *tx, target.id).await? {
        return Err(ServiceError::NotFound);
    }

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}
