//! Identity persistence. Raw queries against the `users` and `roles` tables;
//! mutating operations take a connection so callers can run them inside
//! their own transaction.

use sqlx::{postgres::PgRow, PgConnection, Row};
use tracing::info;
use uuid::Uuid;

use super::{
    credentials::hash_password,
    error::AuthError,
    identity::{compose_username, Identity, RoleAssignment, PROVIDER_LOCAL},
    permissions::ROLE_SITE_ADMIN,
};

const IDENTITY_COLUMNS: &str = r"
    u.id, u.username, u.email, u.email_validated, u.password_hash,
    u.created_at, u.last_seen, u.first_name, u.last_name, u.active,
    r.id AS role_id, r.name AS role_name,
    r.permissions AS role_permissions, r.is_default AS role_is_default
";

fn identity_from_row(row: &PgRow) -> Identity {
    let role = row
        .get::<Option<i32>, _>("role_id")
        .map(|id| RoleAssignment {
            id,
            name: row.get("role_name"),
            permissions: row.get("role_permissions"),
            is_default: row.get("role_is_default"),
        });

    Identity {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        email_validated: row.get("email_validated"),
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
        last_seen: row.get("last_seen"),
        first_name: row.get("first_name"),
        last_name: row.get("last_name"),
        active: row.get("active"),
        role,
    }
}

pub async fn find_by_username<'e, E>(
    executor: E,
    username: &str,
) -> Result<Option<Identity>, AuthError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "SELECT {IDENTITY_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         WHERE u.username = $1"
    );
    let row = sqlx::query(&query)
        .bind(username)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(identity_from_row))
}

pub async fn find_by_email<'e, E>(executor: E, email: &str) -> Result<Option<Identity>, AuthError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "SELECT {IDENTITY_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         WHERE u.email = $1"
    );
    let row = sqlx::query(&query)
        .bind(email)
        .fetch_optional(executor)
        .await?;
    Ok(row.as_ref().map(identity_from_row))
}

pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Identity>, AuthError>
where
    E: sqlx::PgExecutor<'e>,
{
    let query = format!(
        "SELECT {IDENTITY_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         WHERE u.id = $1"
    );
    let row = sqlx::query(&query).bind(id).fetch_optional(executor).await?;
    Ok(row.as_ref().map(identity_from_row))
}

pub async fn list_identities(pool: &sqlx::PgPool) -> Result<Vec<Identity>, AuthError> {
    let query = format!(
        "SELECT {IDENTITY_COLUMNS} FROM users u LEFT JOIN roles r ON r.id = u.role_id \
         ORDER BY u.created_at DESC"
    );
    let rows = sqlx::query(&query).fetch_all(pool).await?;
    Ok(rows.iter().map(identity_from_row).collect())
}

/// Parameters for creating an identity.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub password_hash: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
}

/// Insert a new identity. Falls back to the catalog's default role. A unique
/// violation on username or email surfaces as [`AuthError::DuplicateKey`].
pub async fn create_identity(
    conn: &mut PgConnection,
    new: &NewIdentity,
) -> Result<Identity, AuthError> {
    let id: Uuid = sqlx::query(
        r"
        INSERT INTO users
            (username, email, email_validated, password_hash,
             first_name, last_name, active, role_id)
        VALUES ($1, $2, FALSE, $3, $4, $5, $6,
                (SELECT id FROM roles WHERE is_default LIMIT 1))
        RETURNING id
        ",
    )
    .bind(&new.username)
    .bind(&new.email)
    .bind(&new.password_hash)
    .bind(&new.first_name)
    .bind(&new.last_name)
    .bind(new.active)
    .fetch_one(&mut *conn)
    .await?
    .get("id");

    find_by_id(&mut *conn, id)
        .await?
        .ok_or(AuthError::UnknownIdentity)
}

/// Update profile fields. Changing the email re-arms `email_validated` to
/// false; the old row value decides, so an unchanged email keeps its state.
pub async fn update_profile(
    conn: &mut PgConnection,
    id: Uuid,
    first_name: &str,
    last_name: &str,
    email: &str,
) -> Result<Identity, AuthError> {
    sqlx::query(
        r"
        UPDATE users
        SET first_name = $1,
            last_name = $2,
            email_validated = (CASE WHEN email = $3 THEN email_validated ELSE FALSE END),
            email = $3
        WHERE id = $4
        ",
    )
    .bind(first_name)
    .bind(last_name)
    .bind(email)
    .bind(id)
    .execute(&mut *conn)
    .await?;

    find_by_id(&mut *conn, id)
        .await?
        .ok_or(AuthError::UnknownIdentity)
}

pub async fn set_password_hash(
    conn: &mut PgConnection,
    id: Uuid,
    password_hash: &str,
) -> Result<(), AuthError> {
    sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
        .bind(password_hash)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_email_validated(
    conn: &mut PgConnection,
    id: Uuid,
    validated: bool,
) -> Result<(), AuthError> {
    sqlx::query("UPDATE users SET email_validated = $1 WHERE id = $2")
        .bind(validated)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn set_active(conn: &mut PgConnection, id: Uuid, active: bool) -> Result<(), AuthError> {
    sqlx::query("UPDATE users SET active = $1 WHERE id = $2")
        .bind(active)
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Assign the named role. Returns false when no role with that name exists.
pub async fn set_role(
    conn: &mut PgConnection,
    id: Uuid,
    role_name: &str,
) -> Result<bool, AuthError> {
    let result = sqlx::query(
        "UPDATE users SET role_id = r.id FROM roles r WHERE r.name = $2 AND users.id = $1",
    )
    .bind(id)
    .bind(role_name)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Hard delete. Immediate and irreversible; sessions cascade.
pub async fn delete_identity(conn: &mut PgConnection, id: Uuid) -> Result<bool, AuthError> {
    let result = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn touch_last_seen<'e, E>(executor: E, id: Uuid) -> Result<(), AuthError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query("UPDATE users SET last_seen = NOW() WHERE id = $1")
        .bind(id)
        .execute(executor)
        .await?;
    Ok(())
}

/// Reset the local administrator to a known state: `admin%local`, password
/// `admin`, active, SiteAdmin role. Created with minimal data when missing.
/// Only invoked on demand by the `reset-admin` action, after the role
/// catalog is reconciled.
pub async fn establish_admin_defaults(pool: &sqlx::PgPool) -> Result<(), AuthError> {
    let username = compose_username(Some("admin"), None, PROVIDER_LOCAL)
        .ok_or(AuthError::UnknownIdentity)?;
    let password_hash = hash_password("admin")?;

    sqlx::query(
        r"
        INSERT INTO users
            (username, email, password_hash, first_name, last_name, active, role_id)
        VALUES ($1, 'admin@dummy.com', $2, 'Site', 'Administrator', TRUE,
                (SELECT id FROM roles WHERE name = $3))
        ON CONFLICT (username)
        DO UPDATE SET password_hash = EXCLUDED.password_hash,
                      active = TRUE,
                      role_id = EXCLUDED.role_id
        ",
    )
    .bind(&username)
    .bind(&password_hash)
    .bind(ROLE_SITE_ADMIN)
    .execute(pool)
    .await?;

    info!("Administrator defaults established for {username}");

    Ok(())
}
