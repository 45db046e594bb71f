//! The identity data model and username composition rules.
//!
//! A username is the nickname, the `%` delimiter and the authentication
//! provider, e.g. `alice%local` or `bob@x.com%google-oauth2`. Uniqueness is
//! enforced over the full composed string, which lets the same person
//! register independently under different providers.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::permissions::{mask_allows, perm};

/// Provider tag for password-based accounts.
pub const PROVIDER_LOCAL: &str = "local";

/// Reserved delimiter between nickname and provider.
pub const USERNAME_DELIMITER: char = '%';

/// Sentinel provider for usernames without a delimiter.
pub const PROVIDER_NOT_SET: &str = "not-set";

/// The role assigned to an identity, loaded by join from the roles table.
#[derive(Debug, Clone)]
pub struct RoleAssignment {
    pub id: i32,
    pub name: String,
    pub permissions: i64,
    pub is_default: bool,
}

/// A registered user account, local or externally authenticated.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub email_validated: bool,
    /// Only set for local accounts; provider-backed identities carry none.
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    pub role: Option<RoleAssignment>,
}

impl Identity {
    /// The short username, without the provider suffix.
    #[must_use]
    pub fn nickname(&self) -> &str {
        self.username
            .split(USERNAME_DELIMITER)
            .next()
            .unwrap_or(&self.username)
    }

    /// The authentication provider encoded in the username.
    #[must_use]
    pub fn auth_provider(&self) -> &str {
        self.username
            .split_once(USERNAME_DELIMITER)
            .map_or(PROVIDER_NOT_SET, |(_, provider)| provider)
    }

    #[must_use]
    pub fn is_locally_authenticated(&self) -> bool {
        self.auth_provider() == PROVIDER_LOCAL
    }

    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string()
    }

    /// True iff the identity's role grants every bit of `requested`.
    /// An identity with no role has no permissions at all.
    #[must_use]
    pub fn can(&self, requested: i64) -> bool {
        self.role
            .as_ref()
            .is_some_and(|role| mask_allows(role.permissions, requested))
    }

    #[must_use]
    pub fn is_administrator(&self) -> bool {
        self.can(perm::ADMINISTRATOR)
    }
}

/// Compose the canonical username: prefer the nickname, fall back to the
/// email, append the provider. Returns `None` when neither is available.
#[must_use]
pub fn compose_username(
    nick: Option<&str>,
    email: Option<&str>,
    provider: &str,
) -> Option<String> {
    let local_part = nick
        .filter(|n| !n.is_empty())
        .or_else(|| email.filter(|e| !e.is_empty()))?;
    Some(format!("{local_part}{USERNAME_DELIMITER}{provider}"))
}

/// Split a full name into first and last name: the last whitespace-delimited
/// token is the last name, everything before it joins into the first name.
/// A single token is a last name; empty input yields empty names.
#[must_use]
pub fn split_full_name(fullname: &str) -> (String, String) {
    let words: Vec<&str> = fullname.split_whitespace().collect();
    match words.as_slice() {
        [] => (String::new(), String::new()),
        [last] => (String::new(), (*last).to_string()),
        [first @ .., last] => (first.join(" "), (*last).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(username: &str, permissions: Option<i64>) -> Identity {
        Identity {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: "user@example.com".to_string(),
            email_validated: false,
            password_hash: None,
            created_at: Utc::now(),
            last_seen: Utc::now(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            active: true,
            role: permissions.map(|permissions| RoleAssignment {
                id: 1,
                name: "Test".to_string(),
                permissions,
                is_default: false,
            }),
        }
    }

    #[test]
    fn compose_prefers_nickname() {
        assert_eq!(
            compose_username(Some("alice"), Some("alice@x.com"), PROVIDER_LOCAL).as_deref(),
            Some("alice%local")
        );
    }

    #[test]
    fn compose_falls_back_to_email() {
        assert_eq!(
            compose_username(None, Some("bob@x.com"), "google-oauth2").as_deref(),
            Some("bob@x.com%google-oauth2")
        );
    }

    #[test]
    fn compose_without_claims_is_none() {
        assert_eq!(compose_username(None, None, PROVIDER_LOCAL), None);
        assert_eq!(compose_username(Some(""), Some(""), PROVIDER_LOCAL), None);
    }

    #[test]
    fn nickname_and_provider_are_derived() {
        let user = identity("alice%local", None);
        assert_eq!(user.nickname(), "alice");
        assert_eq!(user.auth_provider(), "local");
        assert!(user.is_locally_authenticated());

        let external = identity("bob@x.com%google-oauth2", None);
        assert_eq!(external.nickname(), "bob@x.com");
        assert_eq!(external.auth_provider(), "google-oauth2");
        assert!(!external.is_locally_authenticated());
    }

    #[test]
    fn full_name_joins_and_trims() {
        let mut user = identity("alice%local", None);
        assert_eq!(user.full_name(), "Jane Doe");

        user.first_name = String::new();
        assert_eq!(user.full_name(), "Doe");

        user.last_name = String::new();
        assert_eq!(user.full_name(), "");
    }

    #[test]
    fn missing_delimiter_yields_sentinel_provider() {
        let user = identity("legacy", None);
        assert_eq!(user.nickname(), "legacy");
        assert_eq!(user.auth_provider(), PROVIDER_NOT_SET);
    }

    #[test]
    fn permissions_require_every_requested_bit() {
        let user = identity("alice%local", Some(0x09));
        assert!(user.can(0x09));
        assert!(user.can(0x08));
        assert!(user.can(0x01));
        assert!(!user.can(0x05));
        assert!(!user.can(0x04));
    }

    #[test]
    fn no_role_means_no_permissions() {
        let user = identity("alice%local", None);
        assert!(!user.can(0x01));
        assert!(!user.is_administrator());
    }

    #[test]
    fn administrator_needs_the_full_mask() {
        assert!(identity("root%local", Some(perm::ADMINISTRATOR)).is_administrator());
        assert!(!identity("ops%local", Some(0x0F)).is_administrator());
    }

    #[test]
    fn split_full_name_cases() {
        assert_eq!(split_full_name(""), (String::new(), String::new()));
        assert_eq!(split_full_name("Plato"), (String::new(), "Plato".into()));
        assert_eq!(
            split_full_name("Jane Doe"),
            ("Jane".to_string(), "Doe".to_string())
        );
        // all leading tokens are kept in the first name
        assert_eq!(
            split_full_name("Ana Maria Silva"),
            ("Ana Maria".to_string(), "Silva".to_string())
        );
    }
}
