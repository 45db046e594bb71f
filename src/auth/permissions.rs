//! Permission bitmask constants and the fixed role catalog.
//!
//! A role's permission mask is the OR of individual capability bits; the mask
//! is the sole permission representation, there is no inheritance between
//! roles. The catalog below is reconciled into the `roles` table on every
//! startup by [`insert_default_roles`].

use sqlx::PgPool;
use tracing::info;

use super::error::AuthError;

/// Single place to define permission bits.
pub mod perm {
    pub const READ_USER: i64 = 0x01;
    pub const CREATE_USER: i64 = 0x02;
    pub const UPDATE_USER: i64 = 0x04;
    pub const DELETE_USER: i64 = 0x08;

    pub const READ_ACTIVITY: i64 = 0x0100;
    pub const DELETE_ACTIVITY: i64 = 0x0200;

    /// All bits set. Only the site administrator role carries this mask.
    pub const ADMINISTRATOR: i64 = 0xFFFF_FFFF;
}

/// One entry of the fixed role catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: &'static str,
    pub permissions: i64,
    pub is_default: bool,
}

pub const ROLE_USER: &str = "User";
pub const ROLE_ADMIN: &str = "Admin";
pub const ROLE_SITE_ADMIN: &str = "SiteAdmin";

/// The role catalog. Exactly one entry is the default role, assigned to
/// newly created identities when no explicit role is given.
#[must_use]
pub fn default_catalog() -> [RoleSpec; 3] {
    [
        RoleSpec {
            name: ROLE_USER,
            permissions: 0,
            is_default: true,
        },
        RoleSpec {
            name: ROLE_ADMIN,
            permissions: perm::READ_USER
                | perm::CREATE_USER
                | perm::UPDATE_USER
                | perm::DELETE_USER,
            is_default: false,
        },
        RoleSpec {
            name: ROLE_SITE_ADMIN,
            permissions: perm::ADMINISTRATOR,
            is_default: false,
        },
    ]
}

/// Upsert the role catalog by name. Idempotent: permissions and the default
/// flag are reset to the catalog values on every call, so it is safe to run
/// on each deployment.
pub async fn insert_default_roles(pool: &PgPool) -> Result<(), AuthError> {
    for spec in default_catalog() {
        sqlx::query(
            r"
            INSERT INTO roles (name, permissions, is_default)
            VALUES ($1, $2, $3)
            ON CONFLICT (name)
            DO UPDATE SET permissions = EXCLUDED.permissions, is_default = EXCLUDED.is_default
            ",
        )
        .bind(spec.name)
        .bind(spec.permissions)
        .bind(spec.is_default)
        .execute(pool)
        .await?;
    }

    info!("Role catalog reconciled");

    Ok(())
}

/// True iff every bit of `requested` is present in `mask`.
#[must_use]
pub const fn mask_allows(mask: i64, requested: i64) -> bool {
    mask & requested == requested
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_exactly_one_default_role() {
        let defaults = default_catalog()
            .iter()
            .filter(|spec| spec.is_default)
            .count();
        assert_eq!(defaults, 1);
    }

    #[test]
    fn default_role_grants_nothing() {
        let user = default_catalog()
            .into_iter()
            .find(|spec| spec.name == ROLE_USER)
            .unwrap();
        assert!(user.is_default);
        assert_eq!(user.permissions, 0);
        assert!(!mask_allows(user.permissions, perm::READ_USER));
    }

    #[test]
    fn site_admin_holds_all_bits() {
        let site_admin = default_catalog()
            .into_iter()
            .find(|spec| spec.name == ROLE_SITE_ADMIN)
            .unwrap();
        assert!(mask_allows(site_admin.permissions, perm::ADMINISTRATOR));
        assert!(mask_allows(
            site_admin.permissions,
            perm::DELETE_ACTIVITY | perm::READ_USER
        ));
    }

    #[test]
    fn admin_manages_users_but_not_activities() {
        let admin = default_catalog()
            .into_iter()
            .find(|spec| spec.name == ROLE_ADMIN)
            .unwrap();
        assert!(mask_allows(
            admin.permissions,
            perm::READ_USER | perm::CREATE_USER | perm::UPDATE_USER | perm::DELETE_USER
        ));
        assert!(!mask_allows(admin.permissions, perm::READ_ACTIVITY));
        assert!(!mask_allows(admin.permissions, perm::ADMINISTRATOR));
    }

    #[test]
    fn mask_requires_all_requested_bits() {
        // role mask 0x09: has 0x08 and 0x01, misses 0x04
        assert!(mask_allows(0x09, 0x09));
        assert!(mask_allows(0x09, 0x08));
        assert!(mask_allows(0x09, 0x01));
        assert!(!mask_allows(0x09, 0x05));
        assert!(!mask_allows(0x09, 0x04));
    }
}
