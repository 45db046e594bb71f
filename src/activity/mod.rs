//! Append-only audit trail of security-relevant actions.
//!
//! Records are denormalized on purpose: actor and acted-on are plain strings
//! copied at write time, never references, so a record describes the state of
//! the world at the moment the action happened. Later renames, deletions or
//! schema changes must not rewrite history. Do not turn these columns into
//! foreign keys.

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgConnection, PgPool, Row};

use crate::auth::error::AuthError;

/// Origin recorded when no request source is available.
pub const ORIGIN_NOT_SET: &str = "not set";

/// The closed set of activity categories. New categories extend this enum;
/// ad hoc strings are not accepted anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Empty,
    Authentication,
    Privilege,
    RestApi,
    User,
    Import,
    Export,
}

impl Category {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "",
            Self::Authentication => "Authentication",
            Self::Privilege => "Privilege",
            Self::RestApi => "RestAPI",
            Self::User => "User",
            Self::Import => "Import",
            Self::Export => "Export",
        }
    }
}

/// A persisted audit record, as read back for the activity view.
#[derive(Debug, Clone)]
pub struct ActivityRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub category: String,
    pub acted_on: String,
    pub description: String,
    pub origin: String,
}

fn record_from_row(row: &PgRow) -> ActivityRecord {
    ActivityRecord {
        id: row.get("id"),
        timestamp: row.get("timestamp"),
        actor: row.get("actor"),
        category: row.get("category"),
        acted_on: row.get("acted_on"),
        description: row.get("description"),
        origin: row.get("origin"),
    }
}

/// Append one audit record. Takes a connection so the write can join the
/// caller's transaction: an operation and its trail commit together or not
/// at all. A failed write is fatal to the enclosing operation, never
/// swallowed.
pub async fn record(
    conn: &mut PgConnection,
    actor: &str,
    origin: &str,
    description: &str,
    category: Category,
    acted_on: Option<&str>,
) -> Result<(), AuthError> {
    sqlx::query(
        r"
        INSERT INTO activities (actor, category, acted_on, description, origin)
        VALUES ($1, $2, $3, $4, $5)
        ",
    )
    .bind(actor)
    .bind(category.as_str())
    .bind(acted_on.unwrap_or(""))
    .bind(description)
    .bind(if origin.is_empty() { ORIGIN_NOT_SET } else { origin })
    .execute(conn)
    .await
    .map_err(AuthError::AuditWriteFailure)?;

    Ok(())
}

pub async fn record_authentication(
    conn: &mut PgConnection,
    actor: &str,
    origin: &str,
    description: &str,
) -> Result<(), AuthError> {
    record(conn, actor, origin, description, Category::Authentication, None).await
}

pub async fn record_privilege_change(
    conn: &mut PgConnection,
    actor: &str,
    origin: &str,
    description: &str,
    acted_on: &str,
) -> Result<(), AuthError> {
    record(
        conn,
        actor,
        origin,
        description,
        Category::Privilege,
        Some(acted_on),
    )
    .await
}

pub async fn record_api_access(
    conn: &mut PgConnection,
    actor: &str,
    origin: &str,
    description: &str,
    acted_on: Option<&str>,
) -> Result<(), AuthError> {
    record(conn, actor, origin, description, Category::RestApi, acted_on).await
}

pub async fn record_user_event(
    conn: &mut PgConnection,
    actor: &str,
    origin: &str,
    description: &str,
    acted_on: Option<&str>,
) -> Result<(), AuthError> {
    record(conn, actor, origin, description, Category::User, acted_on).await
}

/// Newest-first page of the audit trail.
pub async fn list(
    pool: &PgPool,
    limit: i64,
    offset: i64,
) -> Result<Vec<ActivityRecord>, AuthError> {
    let rows = sqlx::query(
        r"
        SELECT id, timestamp, actor, category, acted_on, description, origin
        FROM activities
        ORDER BY timestamp DESC, id DESC
        LIMIT $1 OFFSET $2
        ",
    )
    .bind(limit.clamp(1, 500))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(record_from_row).collect())
}

/// Administrative bulk delete of the whole trail. The only path that removes
/// records; nothing updates them.
pub async fn purge(conn: &mut PgConnection) -> Result<u64, AuthError> {
    let result = sqlx::query("DELETE FROM activities").execute(conn).await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_strings_are_fixed() {
        assert_eq!(Category::Empty.as_str(), "");
        assert_eq!(Category::Authentication.as_str(), "Authentication");
        assert_eq!(Category::Privilege.as_str(), "Privilege");
        assert_eq!(Category::RestApi.as_str(), "RestAPI");
        assert_eq!(Category::User.as_str(), "User");
        assert_eq!(Category::Import.as_str(), "Import");
        assert_eq!(Category::Export.as_str(), "Export");
    }
}
