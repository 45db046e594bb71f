//! Error taxonomy for the authentication, authorization and audit core.

use thiserror::Error;

/// Every failure a caller may need to render distinctly maps to its own kind.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No identity exists under the composed username.
    #[error("unknown identity")]
    UnknownIdentity,

    /// The identity exists but is not activated.
    #[error("account is not active")]
    AccountNotActive,

    /// The submitted password does not match the stored hash.
    #[error("invalid credential")]
    InvalidCredential,

    /// Registration attempted for an identity that already exists.
    #[error("already registered")]
    AlreadyRegistered,

    /// A signed token failed verification. Tampered, malformed and expired
    /// tokens are deliberately indistinguishable.
    #[error("invalid or expired token")]
    InvalidOrExpiredToken,

    /// The provider claims carried neither a nickname nor an email.
    #[error("no identifiable claim")]
    NoIdentifiableClaim,

    /// The provider claims named an account but carried no email address,
    /// which registration needs to store.
    #[error("missing email claim")]
    MissingEmailClaim,

    /// The authorization gate rejected the operation. Never carries which
    /// permission bit was missing.
    #[error("forbidden")]
    Forbidden,

    /// A store-level uniqueness violation, e.g. from a concurrent
    /// registration race.
    #[error("duplicate key on {0}")]
    DuplicateKey(String),

    /// An audit record could not be persisted. Fatal to the enclosing
    /// operation: success must not be reported without a trail.
    #[error("audit write failed")]
    AuditWriteFailure(#[source] sqlx::Error),

    #[error("password hashing failed")]
    PasswordHash,

    /// Outbound mail could not be handed to the sender.
    #[error("email delivery failed: {0}")]
    Email(String),

    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for AuthError {
    /// Surfaces Postgres unique violations as `DuplicateKey` so callers can
    /// report a registration race without string-matching error text.
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db) = err {
            if db.code().as_deref() == Some("23505") {
                let constraint = db.constraint().unwrap_or("unknown").to_string();
                return Self::DuplicateKey(constraint);
            }
        }
        Self::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_not_found_is_not_duplicate() {
        let err = AuthError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, AuthError::Database(_)));
    }

    #[test]
    fn forbidden_message_does_not_name_a_permission() {
        assert_eq!(AuthError::Forbidden.to_string(), "forbidden");
    }
}
