//! Authentication, authorization and identity domain core.

pub mod credentials;
pub mod error;
pub mod identity;
pub mod oauth2;
pub mod permissions;
pub mod principal;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use identity::Identity;
pub use principal::Principal;
