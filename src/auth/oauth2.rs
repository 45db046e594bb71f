//! OAuth2 identity bridge: maps an external provider's claims onto the local
//! username scheme and resolves or creates the matching identity.
//!
//! The provider handshake itself lives at the HTTP layer; this module only
//! sees the resulting claims payload. The chosen intent (login or register)
//! is carried across the redirect in a single-use `oauth_states` row.

use base64ct::{Base64UrlUnpadded, Encoding};
use rand::RngCore;
use sqlx::{PgConnection, PgPool};

use super::{
    error::AuthError,
    identity::{compose_username, split_full_name, Identity},
    store::{self, NewIdentity},
};

/// Provider tag appended to usernames for Google-backed identities.
pub const PROVIDER_GOOGLE: &str = "google-oauth2";

/// How long a handshake state nonce stays consumable.
const STATE_TTL_SECONDS: i64 = 600;

/// Claims received from the provider after the handshake.
#[derive(Debug, Clone, Default)]
pub struct ProviderClaims {
    pub nickname: Option<String>,
    pub email: Option<String>,
    pub fullname: Option<String>,
}

/// What the user asked for before being redirected to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OAuthIntent {
    Login,
    Register,
}

impl OAuthIntent {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Register => "register",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "login" => Some(Self::Login),
            "register" => Some(Self::Register),
            _ => None,
        }
    }
}

/// Compose the canonical username from the claims: nickname first, email as
/// the fallback. Fails when the claims identify nobody.
pub fn claims_username(provider: &str, claims: &ProviderClaims) -> Result<String, AuthError> {
    compose_username(claims.nickname.as_deref(), claims.email.as_deref(), provider)
        .ok_or(AuthError::NoIdentifiableClaim)
}

/// Registration additionally needs an email address to store; claims that
/// name an account but carry no email get their own kind.
fn registration_email(claims: &ProviderClaims) -> Result<String, AuthError> {
    claims.email.clone().ok_or(AuthError::MissingEmailClaim)
}

/// Login intent: resolve the composed username. No auto-provisioning; an
/// unknown identity or an inactive account is rejected with its own kind.
pub async fn bridge_login(
    pool: &PgPool,
    provider: &str,
    claims: &ProviderClaims,
) -> Result<Identity, AuthError> {
    let username = claims_username(provider, claims)?;

    let identity = store::find_by_username(pool, &username)
        .await?
        .ok_or(AuthError::UnknownIdentity)?;

    if !identity.active {
        return Err(AuthError::AccountNotActive);
    }

    Ok(identity)
}

/// Register intent: create an identity for the composed username, with no
/// password and `active` per deployment default. Duplicate registration
/// under the same provider identity is rejected.
pub async fn bridge_register(
    conn: &mut PgConnection,
    provider: &str,
    claims: &ProviderClaims,
    default_active: bool,
) -> Result<Identity, AuthError> {
    let username = claims_username(provider, claims)?;

    if store::find_by_username(&mut *conn, &username)
        .await?
        .is_some()
    {
        return Err(AuthError::AlreadyRegistered);
    }

    let email = registration_email(claims)?;
    let (first_name, last_name) = split_full_name(claims.fullname.as_deref().unwrap_or(""));

    store::create_identity(
        conn,
        &NewIdentity {
            username,
            email,
            password_hash: None,
            first_name,
            last_name,
            active: default_active,
        },
    )
    .await
}

/// Create a single-use handshake state row and return its nonce.
pub async fn create_state(
    pool: &PgPool,
    intent: OAuthIntent,
    provider: &str,
) -> Result<String, AuthError> {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let state = Base64UrlUnpadded::encode_string(&bytes);

    sqlx::query("INSERT INTO oauth_states (state, intent, provider) VALUES ($1, $2, $3)")
        .bind(&state)
        .bind(intent.as_str())
        .bind(provider)
        .execute(pool)
        .await?;

    Ok(state)
}

/// Consume a handshake state atomically. Stale or unknown nonces yield
/// `None`; a nonce can never be consumed twice.
pub async fn consume_state(
    pool: &PgPool,
    state: &str,
) -> Result<Option<(OAuthIntent, String)>, AuthError> {
    let row = sqlx::query(
        r"
        DELETE FROM oauth_states
        WHERE state = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
        RETURNING intent, provider
        ",
    )
    .bind(state)
    .bind(STATE_TTL_SECONDS)
    .fetch_optional(pool)
    .await?;

    Ok(row.and_then(|row| {
        use sqlx::Row;
        let intent = OAuthIntent::parse(row.get::<&str, _>("intent"))?;
        Some((intent, row.get::<String, _>("provider")))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_prefers_nickname_over_email() {
        let claims = ProviderClaims {
            nickname: Some("bob".to_string()),
            email: Some("bob@x.com".to_string()),
            fullname: None,
        };
        assert_eq!(
            claims_username(PROVIDER_GOOGLE, &claims).unwrap(),
            "bob%google-oauth2"
        );
    }

    #[test]
    fn username_falls_back_to_email() {
        let claims = ProviderClaims {
            email: Some("bob@x.com".to_string()),
            ..ProviderClaims::default()
        };
        assert_eq!(
            claims_username(PROVIDER_GOOGLE, &claims).unwrap(),
            "bob@x.com%google-oauth2"
        );
    }

    #[test]
    fn empty_claims_fail() {
        let err = claims_username(PROVIDER_GOOGLE, &ProviderClaims::default()).unwrap_err();
        assert!(matches!(err, AuthError::NoIdentifiableClaim));
    }

    #[test]
    fn nickname_only_claims_name_the_missing_email() {
        let claims = ProviderClaims {
            nickname: Some("bob".to_string()),
            ..ProviderClaims::default()
        };
        // identifiable for login, but registration has no address to store
        assert!(claims_username(PROVIDER_GOOGLE, &claims).is_ok());
        assert!(matches!(
            registration_email(&claims).unwrap_err(),
            AuthError::MissingEmailClaim
        ));

        let with_email = ProviderClaims {
            email: Some("bob@x.com".to_string()),
            ..claims
        };
        assert_eq!(registration_email(&with_email).unwrap(), "bob@x.com");
    }

    #[test]
    fn intent_round_trips_through_storage_form() {
        for intent in [OAuthIntent::Login, OAuthIntent::Register] {
            assert_eq!(OAuthIntent::parse(intent.as_str()), Some(intent));
        }
        assert_eq!(OAuthIntent::parse("chose"), None);
    }
}
