//! Local credential verification: salted one-way password hashing and the
//! username/password check against stored identities.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use sqlx::PgPool;

use super::{
    error::AuthError,
    identity::{compose_username, Identity, PROVIDER_LOCAL},
    store,
};

/// Hash a password into a PHC string. Plaintext is never stored or logged.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

/// Constant-time check of a password against a stored PHC string.
#[must_use]
pub fn verify_password(stored_hash: &str, password: &str) -> bool {
    PasswordHash::new(stored_hash).is_ok_and(|parsed| {
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    })
}

/// Verify a local login attempt. Composes `<nickname>%local`, then checks
/// existence, password and activation in that order; each failure keeps its
/// own kind so the caller decides how much to reveal. Does not establish a
/// session.
pub async fn verify_local_credentials(
    pool: &PgPool,
    nickname: &str,
    password: &str,
) -> Result<Identity, AuthError> {
    let username = compose_username(Some(nickname), None, PROVIDER_LOCAL)
        .ok_or(AuthError::UnknownIdentity)?;

    let identity = store::find_by_username(pool, &username)
        .await?
        .ok_or(AuthError::UnknownIdentity)?;

    let matches = identity
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(hash, password));
    if !matches {
        return Err(AuthError::InvalidCredential);
    }

    if !identity.active {
        return Err(AuthError::AccountNotActive);
    }

    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_round_trip() {
        let hash = hash_password("secret").unwrap();
        assert_ne!(hash, "secret");
        assert!(verify_password(&hash, "secret"));
        assert!(!verify_password(&hash, "wrong"));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_password("secret").unwrap();
        let second = hash_password("secret").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn garbage_stored_hash_never_verifies() {
        assert!(!verify_password("not-a-phc-string", "secret"));
        assert!(!verify_password("", "secret"));
    }
}
