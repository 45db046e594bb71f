//! # Janus
//!
//! Server-side identity, access and audit service: local and Google OAuth2
//! registration and login, bitmask-based roles and permissions, signed
//! time-limited tokens for email confirmation and password reset, and an
//! append-only activity trail of security-relevant actions.
//!
//! ## Usernames
//!
//! Accounts are keyed by the composed username `<nickname>%<provider>`
//! (`alice%local`, `bob@x.com%google-oauth2`), so the same person may hold
//! independent accounts under different authentication providers.
//!
//! ## Audit trail
//!
//! The `activities` table stores actor and subject as strings copied at
//! write time. This is deliberate: audit truth is a point-in-time snapshot,
//! not a live join against mutable identity rows.

pub mod activity;
pub mod api;
pub mod auth;
pub mod cli;

#[cfg(test)]
pub(crate) mod test_support;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
