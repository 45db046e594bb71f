//! Outbound mail seam.
//!
//! Handlers depend on the [`EmailSender`] trait so delivery stays swappable;
//! the default implementation only logs the message, which is enough for
//! development and for tests.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::PgConnection;
use tracing::info;

use crate::{
    activity,
    auth::{error::AuthError, principal::ANONYMOUS_USERNAME, token, Identity},
    cli::globals::GlobalArgs,
};

/// Email confirmation links stay valid for two days.
pub const EMAIL_CONFIRM_TTL_SECS: i64 = 48 * 3600;

/// Password reset links are short-lived on purpose.
pub const PASSWORD_RESET_TTL_SECS: i64 = 300;

#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        vars: Value,
    ) -> anyhow::Result<()>;
}

/// Logs outbound mail instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        vars: Value,
    ) -> anyhow::Result<()> {
        info!(to, subject, template, %vars, "Sending email");
        Ok(())
    }
}

/// Send a confirmation link to an identity whose address is still
/// unverified, and record the request. No-op for verified addresses.
pub async fn request_email_confirmation(
    conn: &mut PgConnection,
    sender: &dyn EmailSender,
    globals: &GlobalArgs,
    identity: &Identity,
    origin: &str,
) -> Result<(), AuthError> {
    if identity.email_validated {
        return Ok(());
    }

    let token = token::issue_token(
        &globals.secret_key,
        &identity.username,
        EMAIL_CONFIRM_TTL_SECS,
    )?;
    let link = format!("{}/v1/email/confirm?token={token}", globals.base_url);

    sender
        .send(
            &identity.email,
            "Confirm your email address",
            "email_confirm",
            json!({ "name": identity.full_name(), "link": link }),
        )
        .await
        .map_err(|err| AuthError::Email(err.to_string()))?;

    activity::record_user_event(
        conn,
        &identity.username,
        origin,
        "Request email address confirmation",
        Some(&identity.username),
    )
    .await
}

/// Send a short-lived reset link and record who asked for it.
pub async fn send_reset_password_link(
    conn: &mut PgConnection,
    sender: &dyn EmailSender,
    globals: &GlobalArgs,
    identity: &Identity,
    origin: &str,
) -> Result<(), AuthError> {
    let token = token::issue_token(
        &globals.secret_key,
        &identity.username,
        PASSWORD_RESET_TTL_SECS,
    )?;
    let link = format!("{}/v1/password/reset?token={token}", globals.base_url);

    sender
        .send(
            &identity.email,
            "Reset your password",
            "password_reset",
            json!({ "name": identity.full_name(), "link": link }),
        )
        .await
        .map_err(|err| AuthError::Email(err.to_string()))?;

    activity::record_user_event(
        conn,
        ANONYMOUS_USERNAME,
        origin,
        "Request password reset",
        Some(&identity.username),
    )
    .await
}
