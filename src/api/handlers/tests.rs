//! Integration tests against a containerized Postgres.
//!
//! Everything whose behavior lives in SQL is exercised here: role catalog
//! reconciliation, stored-credential login, email re-validation, session and
//! handshake-state lifecycles, the audit trail and the admin reset. Tests
//! skip when no container runtime is reachable.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use axum::http::{
    header::{AUTHORIZATION, SET_COOKIE},
    HeaderMap, HeaderValue, StatusCode,
};
use secrecy::SecretString;
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, Connection, PgConnection, PgPool, Row};
use std::sync::Mutex;

use super::oauth2::finish_registration;
use crate::{
    activity::{self, ORIGIN_NOT_SET},
    api::{
        email::{self, EmailSender},
        session,
    },
    auth::{
        credentials::{hash_password, verify_local_credentials},
        error::AuthError,
        identity::{compose_username, Identity, PROVIDER_LOCAL},
        oauth2::{self as oauth_bridge, OAuthIntent, ProviderClaims, PROVIDER_GOOGLE},
        permissions::{self, perm},
        store::{self, NewIdentity},
        token, Principal,
    },
    cli::globals::GlobalArgs,
    test_support::PostgresContainer,
};

const JANUS_SCHEMA_SQL: &str =
    include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

struct TestDb {
    _postgres: PostgresContainer,
    pool: PgPool,
}

impl TestDb {
    async fn new() -> Result<Self> {
        if let Err(err) = crate::test_support::ensure_container_runtime() {
            eprintln!("Skipping integration test: {err}");
            return Err(err);
        }

        let postgres = PostgresContainer::start().await?;
        postgres.wait_until_ready().await?;
        apply_schema(&postgres).await?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&postgres.dsn())
            .await
            .context("failed to connect test pool")?;

        permissions::insert_default_roles(&pool).await?;

        Ok(Self {
            _postgres: postgres,
            pool,
        })
    }
}

async fn apply_schema(postgres: &PostgresContainer) -> Result<()> {
    let mut connection = PgConnection::connect(&postgres.dsn())
        .await
        .context("failed to connect for schema setup")?;

    for (index, statement) in split_sql_statements(JANUS_SCHEMA_SQL).iter().enumerate() {
        sqlx::query(statement)
            .execute(&mut connection)
            .await
            .with_context(|| format!("failed to execute schema statement {}", index + 1))?;
    }

    Ok(())
}

fn split_sql_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in sql.lines() {
        current.push_str(line);
        current.push('\n');

        if line.trim().ends_with(';') {
            let statement = current.trim();
            if !statement.is_empty() {
                statements.push(statement.to_string());
            }
            current.clear();
        }
    }

    let leftover = current.trim();
    if !leftover.is_empty() {
        statements.push(leftover.to_string());
    }

    statements
}

fn test_globals() -> GlobalArgs {
    GlobalArgs {
        secret_key: SecretString::from("a-test-signing-key"),
        base_url: "http://localhost:8080".to_string(),
        session_ttl_seconds: 600,
        session_cookie_secure: false,
        generic_login_errors: false,
        oauth2_default_active: false,
        google_client_id: None,
        google_client_secret: SecretString::from(String::new()),
    }
}

async fn create_local_identity(
    pool: &PgPool,
    nickname: &str,
    password: &str,
    active: bool,
) -> Result<Identity> {
    let username =
        compose_username(Some(nickname), None, PROVIDER_LOCAL).context("compose username")?;

    let mut tx = pool.begin().await?;
    let identity = store::create_identity(
        &mut *tx,
        &NewIdentity {
            username,
            email: format!("{nickname}@example.com"),
            password_hash: Some(hash_password(password)?),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            active,
        },
    )
    .await?;
    tx.commit().await?;

    Ok(identity)
}

/// Keeps outbound mail in memory so tests can inspect it.
#[derive(Default)]
struct CapturingSender {
    sent: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl EmailSender for CapturingSender {
    async fn send(
        &self,
        to: &str,
        _subject: &str,
        _template: &str,
        vars: Value,
    ) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push((to.to_string(), vars));
        Ok(())
    }
}

#[tokio::test]
async fn role_catalog_reconciles_idempotently() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    // TestDb already reconciled once; a second run must not duplicate rows
    permissions::insert_default_roles(&db.pool).await?;

    let rows = sqlx::query("SELECT name, permissions, is_default FROM roles")
        .fetch_all(&db.pool)
        .await?;
    assert_eq!(rows.len(), 3);

    let defaults: Vec<&str> = rows
        .iter()
        .filter(|row| row.get::<bool, _>("is_default"))
        .map(|row| row.get("name"))
        .collect();
    assert_eq!(defaults, vec!["User"]);

    let site_admin = rows
        .iter()
        .find(|row| row.get::<&str, _>("name") == "SiteAdmin")
        .context("SiteAdmin role missing")?;
    assert_eq!(site_admin.get::<i64, _>("permissions"), perm::ADMINISTRATOR);

    Ok(())
}

#[tokio::test]
async fn stored_credentials_gate_login() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    create_local_identity(&db.pool, "erin", "hunter2secret", true).await?;
    create_local_identity(&db.pool, "frank", "hunter2secret", false).await?;

    let identity = verify_local_credentials(&db.pool, "erin", "hunter2secret").await?;
    assert_eq!(identity.username, "erin%local");

    let err = verify_local_credentials(&db.pool, "erin", "wrong-password")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredential));

    let err = verify_local_credentials(&db.pool, "nobody", "hunter2secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::UnknownIdentity));

    let err = verify_local_credentials(&db.pool, "frank", "hunter2secret")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AccountNotActive));

    Ok(())
}

#[tokio::test]
async fn changing_email_rearms_validation() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let identity = create_local_identity(&db.pool, "dave", "hunter2secret", true).await?;

    let mut tx = db.pool.begin().await?;
    store::set_email_validated(&mut *tx, identity.id, true).await?;
    tx.commit().await?;

    let mut tx = db.pool.begin().await?;
    let unchanged =
        store::update_profile(&mut *tx, identity.id, "Dave", "Doe", &identity.email).await?;
    tx.commit().await?;
    assert!(unchanged.email_validated);

    let mut tx = db.pool.begin().await?;
    let changed =
        store::update_profile(&mut *tx, identity.id, "Dave", "Doe", "dave@new.example.com")
            .await?;
    tx.commit().await?;
    assert!(!changed.email_validated);
    assert_eq!(changed.email, "dave@new.example.com");

    Ok(())
}

#[tokio::test]
async fn deleted_account_invalidates_outstanding_links() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let globals = test_globals();
    let identity = create_local_identity(&db.pool, "carol", "hunter2secret", true).await?;

    let link_token = token::issue_token(&globals.secret_key, &identity.username, 60)?;
    assert!(token::verify_token(&db.pool, &globals.secret_key, &link_token)
        .await
        .is_some());

    let mut tx = db.pool.begin().await?;
    assert!(store::delete_identity(&mut *tx, identity.id).await?);
    tx.commit().await?;

    // the signature still checks out, but the subject is gone
    assert!(token::verify_token(&db.pool, &globals.secret_key, &link_token)
        .await
        .is_none());

    Ok(())
}

#[tokio::test]
async fn session_resolves_until_deleted() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let identity = create_local_identity(&db.pool, "grace", "hunter2secret", true).await?;

    let mut tx = db.pool.begin().await?;
    let session_token = session::create_session(&mut *tx, identity.id, 600).await?;
    tx.commit().await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {session_token}"))?,
    );

    let principal = session::resolve_principal(&headers, &db.pool).await?;
    let Principal::Authenticated(resolved) = principal else {
        bail!("expected an authenticated principal");
    };
    assert_eq!(resolved.id, identity.id);

    session::delete_session(&db.pool, &session::hash_session_token(&session_token)).await?;
    let principal = session::resolve_principal(&headers, &db.pool).await?;
    assert!(matches!(principal, Principal::Anonymous));

    Ok(())
}

#[tokio::test]
async fn handshake_state_is_single_use() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let state = oauth_bridge::create_state(&db.pool, OAuthIntent::Register, PROVIDER_GOOGLE)
        .await?;
    // 32 random bytes, url-safe unpadded
    assert_eq!(state.len(), 43);

    let consumed = oauth_bridge::consume_state(&db.pool, &state).await?;
    assert_eq!(
        consumed,
        Some((OAuthIntent::Register, PROVIDER_GOOGLE.to_string()))
    );
    assert!(oauth_bridge::consume_state(&db.pool, &state).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn provider_registration_signs_the_new_account_in() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    // deployments default to inactive accounts; the session is established
    // anyway, activation only gates privileged operations
    let globals = test_globals();
    let claims = ProviderClaims {
        nickname: Some("bob".to_string()),
        email: Some("bob@x.com".to_string()),
        fullname: Some("Bob Mars".to_string()),
    };

    let response =
        finish_registration(&db.pool, &globals, PROVIDER_GOOGLE, &claims, "test").await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let cookie = response
        .headers()
        .get(SET_COOKIE)
        .context("session cookie missing")?
        .to_str()?;
    let session_token = cookie
        .strip_prefix("janus_session=")
        .and_then(|rest| rest.split(';').next())
        .context("malformed session cookie")?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {session_token}"))?,
    );
    let principal = session::resolve_principal(&headers, &db.pool).await?;
    let Principal::Authenticated(identity) = principal else {
        bail!("expected an authenticated principal");
    };
    assert_eq!(identity.username, "bob%google-oauth2");
    assert!(!identity.active);

    Ok(())
}

#[tokio::test]
async fn confirmation_email_greets_with_full_name() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let globals = test_globals();
    let identity = create_local_identity(&db.pool, "jane", "hunter2secret", true).await?;
    let sender = CapturingSender::default();

    let mut tx = db.pool.begin().await?;
    email::request_email_confirmation(&mut *tx, &sender, &globals, &identity, "test").await?;
    tx.commit().await?;

    let sent = sender.sent.lock().unwrap();
    let (to, vars) = sent.first().context("no email captured")?;
    assert_eq!(to, &identity.email);
    assert_eq!(vars["name"], "Jane Doe");
    assert!(vars["link"]
        .as_str()
        .context("link missing")?
        .starts_with("http://localhost:8080/v1/email/confirm?token="));

    Ok(())
}

#[tokio::test]
async fn trail_appends_newest_first_and_purges() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    let mut tx = db.pool.begin().await?;
    activity::record_authentication(&mut *tx, "erin%local", "203.0.113.7", "Login").await?;
    activity::record_user_event(&mut *tx, "erin%local", "", "Register", Some("erin%local"))
        .await?;
    tx.commit().await?;

    let page = activity::list(&db.pool, 10, 0).await?;
    assert_eq!(page.len(), 2);
    assert_eq!(page[0].description, "Register");
    assert_eq!(page[0].origin, ORIGIN_NOT_SET);
    assert_eq!(page[1].description, "Login");
    assert_eq!(page[1].origin, "203.0.113.7");

    let mut tx = db.pool.begin().await?;
    assert_eq!(activity::purge(&mut *tx).await?, 2);
    tx.commit().await?;
    assert!(activity::list(&db.pool, 10, 0).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn admin_reset_restores_known_credentials() -> Result<()> {
    let Ok(db) = TestDb::new().await else {
        return Ok(());
    };

    store::establish_admin_defaults(&db.pool).await?;
    let admin = verify_local_credentials(&db.pool, "admin", "admin").await?;
    assert!(admin.is_administrator());

    // drift: the operator changed the password and got locked out
    let mut tx = db.pool.begin().await?;
    store::set_password_hash(&mut *tx, admin.id, &hash_password("forgotten-one-9")?).await?;
    tx.commit().await?;
    let err = verify_local_credentials(&db.pool, "admin", "admin")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidCredential));

    store::establish_admin_defaults(&db.pool).await?;
    let restored = verify_local_credentials(&db.pool, "admin", "admin").await?;
    assert!(restored.is_administrator());

    Ok(())
}
