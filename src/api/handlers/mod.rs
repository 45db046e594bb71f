//! HTTP handlers. Each file owns one resource; shared input validation and
//! the error-to-status mapping live here.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use regex::Regex;
use std::sync::OnceLock;
use tracing::error;

use crate::auth::error::AuthError;

pub mod activities;
pub mod email_confirm;
pub mod health;
pub mod login;
pub mod me;
pub mod oauth2;
pub mod password;
pub mod register;
pub mod users;

#[cfg(test)]
mod tests;

/// Password length bounds for local accounts.
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap()
    })
}

fn nickname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // No '%': it is the username/provider delimiter.
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_.\-]{1,40}$").unwrap())
}

#[must_use]
pub fn valid_email(email: &str) -> bool {
    email.len() <= 254 && email_regex().is_match(email)
}

#[must_use]
pub fn valid_nickname(nickname: &str) -> bool {
    nickname_regex().is_match(nickname)
}

#[must_use]
pub fn valid_password(password: &str) -> bool {
    (PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.len())
}

/// Uniform HTTP mapping for domain failures. Login has its own policy-driven
/// mapping and does not go through this.
#[derive(Debug)]
pub(crate) enum ServiceError {
    BadRequest(&'static str),
    Unauthorized(&'static str),
    Forbidden,
    NotFound,
    Conflict(&'static str),
    Internal(AuthError),
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message).into_response(),
            Self::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message).into_response(),
            Self::Forbidden => StatusCode::FORBIDDEN.into_response(),
            Self::NotFound => StatusCode::NOT_FOUND.into_response(),
            Self::Conflict(message) => (StatusCode::CONFLICT, message).into_response(),
            Self::Internal(err) => {
                error!("Failed to handle request: {err}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UnknownIdentity => Self::NotFound,
            AuthError::AccountNotActive => Self::Forbidden,
            AuthError::InvalidCredential => Self::Unauthorized("Invalid credentials."),
            AuthError::AlreadyRegistered | AuthError::DuplicateKey(_) => {
                Self::Conflict("User already exists.")
            }
            AuthError::InvalidOrExpiredToken => Self::BadRequest("This link has expired."),
            AuthError::NoIdentifiableClaim => {
                Self::BadRequest("Provider supplied no usable identity.")
            }
            AuthError::MissingEmailClaim => {
                Self::BadRequest("Provider supplied no email address.")
            }
            AuthError::Forbidden => Self::Forbidden,
            err @ (AuthError::AuditWriteFailure(_)
            | AuthError::PasswordHash
            | AuthError::Email(_)
            | AuthError::Database(_)) => Self::Internal(err),
        }
    }
}

#[cfg(test)]
mod validation_tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(valid_email("alice@example.com"));
        assert!(valid_email("a.b+c@sub.example.org"));
        assert!(!valid_email("alice"));
        assert!(!valid_email("alice@nodot"));
        assert!(!valid_email("a lice@example.com"));
        assert!(!valid_email(""));
    }

    #[test]
    fn nickname_rejects_delimiter_and_junk() {
        assert!(valid_nickname("alice"));
        assert!(valid_nickname("alice-smith_99"));
        assert!(!valid_nickname("alice%local"));
        assert!(!valid_nickname("alice smith"));
        assert!(!valid_nickname(""));
        assert!(!valid_nickname(&"a".repeat(41)));
    }

    #[test]
    fn password_length_bounds() {
        assert!(!valid_password("short"));
        assert!(valid_password("longenough"));
        assert!(valid_password(&"p".repeat(128)));
        assert!(!valid_password(&"p".repeat(129)));
    }
}
