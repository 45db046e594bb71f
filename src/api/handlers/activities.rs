//! Audit trail view and purge.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use utoipa::{IntoParams, ToSchema};

use super::ServiceError;
use crate::{
    activity::{self, ActivityRecord},
    api::session,
    auth::{permissions::perm, AuthError, Identity},
};

#[derive(Debug, Serialize, ToSchema)]
pub struct ActivityEntry {
    pub id: i64,
    pub timestamp: String,
    pub actor: String,
    pub category: String,
    pub acted_on: String,
    pub description: String,
    pub origin: String,
}

impl ActivityEntry {
    fn from_record(record: &ActivityRecord) -> Self {
        Self {
            id: record.id,
            timestamp: record.timestamp.to_rfc3339(),
            actor: record.actor.clone(),
            category: record.category.clone(),
            acted_on: record.acted_on.clone(),
            description: record.description.clone(),
            origin: record.origin.clone(),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ActivityPage {
    /// Newest-first page size, clamped to 1..=500.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
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
    path = "/v1/activities",
    params(ActivityPage),
    responses(
        (status = 200, description = "Newest-first audit records.", body = [ActivityEntry]),
        (status = 403, description = "Forbidden."),
    ),
    tag = "activities"
)]
pub async fn list_activities(
    Query(page): Query<ActivityPage>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
) -> Response {
    match list(&pool.0, &headers, &page).await {
        Ok(entries) => (StatusCode::OK, Json(entries)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn list(
    pool: &PgPool,
    headers: &HeaderMap,
    page: &ActivityPage,
) -> Result<Vec<ActivityEntry>, ServiceError> {
    gate(headers, pool, perm::READ_ACTIVITY).await?;

    let records = activity::list(pool, page.limit.unwrap_or(100), page.offset.unwrap_or(0)).await?;
    Ok(records.iter().map(ActivityEntry::from_record).collect())
}

#[utoipa::path(
    delete,
    path = "/v1/activities",
    responses(
        (status = 204, description = "Audit trail purged."),
        (status = 403, description = "Forbidden."),
    ),
    tag = "activities"
)]
pub async fn purge_activities(headers: HeaderMap, pool: Extension<PgPool>) -> Response {
    let origin = session::request_origin(&headers);

    match purge(&pool.0, &headers, &origin).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

async fn purge(pool: &PgPool, headers: &HeaderMap, origin: &str) -> Result<(), ServiceError> {
    let actor = gate(headers, pool, perm::DELETE_ACTIVITY).await?;

    let mut tx = pool.begin().await.map_err(AuthError::from)?;

    activity::purge(&mut *tx).await?;
    // First record of the fresh trail says who emptied it.
    activity::record(
        &mut *tx,
        &actor.username,
        origin,
        "Purge activity trail",
        activity::Category::Empty,
        None,
    )
    .await?;

    tx.commit().await.map_err(AuthError::from)?;

    Ok(())
}
