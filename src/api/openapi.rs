//! OpenAPI document for the HTTP surface. New endpoints must be listed here
//! so they show up in the served document.

use utoipa::OpenApi;

use super::handlers::{
    activities, email_confirm, health, login, me, oauth2, password, register, users,
};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "janus",
        description = "User registration, authentication, role-based access and audit trail",
        license(name = "BSD-3-Clause")
    ),
    paths(
        health::health,
        register::register,
        login::login,
        login::logout,
        login::session_info,
        me::get_me,
        me::patch_me,
        me::put_password,
        me::delete_me,
        password::forgot_password,
        password::reset_password,
        email_confirm::confirm_email,
        email_confirm::resend_confirmation,
        users::list_users,
        users::get_user,
        users::put_user_admin,
        users::delete_user,
        activities::list_activities,
        activities::purge_activities,
        oauth2::google_login,
        oauth2::google_register,
        oauth2::google_callback,
    ),
    components(schemas(
        health::Health,
        register::RegisterRequest,
        register::RegisterResponse,
        login::LoginRequest,
        login::SessionResponse,
        me::ProfileResponse,
        me::ProfileUpdateRequest,
        me::PasswordChangeRequest,
        password::ForgotPasswordRequest,
        password::ResetPasswordRequest,
        email_confirm::ConfirmEmailRequest,
        users::UserSummary,
        users::UserDetail,
        users::UserAdminRequest,
        activities::ActivityEntry,
    )),
    tags(
        (name = "health", description = "Service health"),
        (name = "auth", description = "Registration, login and account links"),
        (name = "me", description = "The caller's own account"),
        (name = "users", description = "Administrative user management"),
        (name = "activities", description = "Audit trail"),
        (name = "oauth2", description = "External provider handshakes"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_all_routes() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for expected in [
            "/health",
            "/v1/register",
            "/v1/login",
            "/v1/logout",
            "/v1/session",
            "/v1/me",
            "/v1/me/password",
            "/v1/password/forgot",
            "/v1/password/reset",
            "/v1/email/confirm",
            "/v1/email/resend",
            "/v1/users",
            "/v1/users/{username}",
            "/v1/users/{username}/admin",
            "/v1/activities",
            "/v1/oauth2/google/login",
            "/v1/oauth2/google/register",
            "/v1/oauth2/google/callback",
        ] {
            assert!(
                paths.iter().any(|path| path.as_str() == expected),
                "missing {expected} in OpenAPI document"
            );
        }
    }
}
