//! The current actor: either a resolved identity or the anonymous
//! placeholder. Both answer the same permission questions; anonymous always
//! answers no.

use super::{error::AuthError, identity::Identity};

/// Username recorded for requests without a session.
pub const ANONYMOUS_USERNAME: &str = "anonymous";

#[derive(Debug, Clone)]
pub enum Principal {
    Authenticated(Identity),
    Anonymous,
}

impl Principal {
    #[must_use]
    pub fn username(&self) -> &str {
        match self {
            Self::Authenticated(identity) => &identity.username,
            Self::Anonymous => ANONYMOUS_USERNAME,
        }
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            Self::Anonymous => None,
        }
    }

    #[must_use]
    pub fn can(&self, requested: i64) -> bool {
        match self {
            Self::Authenticated(identity) => identity.can(requested),
            Self::Anonymous => false,
        }
    }

    #[must_use]
    pub fn is_administrator(&self) -> bool {
        match self {
            Self::Authenticated(identity) => identity.is_administrator(),
            Self::Anonymous => false,
        }
    }

    /// The authorization gate: the identity is handed back only when it holds
    /// every requested bit. The error is a uniform `Forbidden` that never
    /// reveals which permission was missing.
    pub fn authorize(&self, requested: i64) -> Result<&Identity, AuthError> {
        match self {
            Self::Authenticated(identity) if identity.can(requested) => Ok(identity),
            _ => Err(AuthError::Forbidden),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::identity::RoleAssignment;
    use crate::auth::permissions::perm;
    use chrono::Utc;
    use uuid::Uuid;

    fn identity_with_mask(permissions: i64) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: "carol%local".to_string(),
            email: "carol@example.com".to_string(),
            email_validated: true,
            password_hash: None,
            created_at: Utc::now(),
            last_seen: Utc::now(),
            first_name: String::new(),
            last_name: String::new(),
            active: true,
            role: Some(RoleAssignment {
                id: 1,
                name: "Test".to_string(),
                permissions,
                is_default: false,
            }),
        }
    }

    #[test]
    fn anonymous_always_denied() {
        let anon = Principal::Anonymous;
        assert!(!anon.can(perm::READ_USER));
        assert!(!anon.can(0));
        assert!(!anon.is_administrator());
        assert!(anon.authorize(perm::READ_USER).is_err());
        assert_eq!(anon.username(), ANONYMOUS_USERNAME);
    }

    #[test]
    fn authorize_passes_with_all_bits() {
        let principal = Principal::Authenticated(identity_with_mask(perm::READ_USER));
        assert!(principal.authorize(perm::READ_USER).is_ok());
    }

    #[test]
    fn authorize_is_uniformly_forbidden() {
        let principal = Principal::Authenticated(identity_with_mask(perm::READ_USER));
        let err = principal
            .authorize(perm::READ_USER | perm::DELETE_USER)
            .unwrap_err();
        assert!(matches!(err, AuthError::Forbidden));
        assert_eq!(err.to_string(), "forbidden");
    }
}
