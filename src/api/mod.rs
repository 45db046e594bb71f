//! HTTP surface: router, middleware stack and server startup.

use anyhow::{Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Method, Request},
    routing::{get, post, put},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{auth::permissions, cli::globals::GlobalArgs};

pub mod email;
pub mod google;
pub mod handlers;
mod openapi;
pub mod session;

use handlers::{
    activities, email_confirm, health, login, me, oauth2, password, register, users,
};

/// Build the application router. The email sender is injected so tests can
/// swap delivery out.
#[must_use]
pub fn router(
    pool: sqlx::PgPool,
    globals: GlobalArgs,
    sender: Arc<dyn email::EmailSender>,
) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
        .allow_headers(Any)
        .allow_origin(Any);

    Router::new()
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .route("/health", get(health::health).options(health::health))
        .route("/v1/register", post(register::register))
        .route("/v1/login", post(login::login))
        .route("/v1/logout", post(login::logout))
        .route("/v1/session", get(login::session_info))
        .route(
            "/v1/me",
            get(me::get_me).patch(me::patch_me).delete(me::delete_me),
        )
        .route("/v1/me/password", put(me::put_password))
        .route("/v1/password/forgot", post(password::forgot_password))
        .route("/v1/password/reset", post(password::reset_password))
        .route("/v1/email/confirm", post(email_confirm::confirm_email))
        .route("/v1/email/resend", post(email_confirm::resend_confirmation))
        .route("/v1/users", get(users::list_users))
        .route(
            "/v1/users/:username",
            get(users::get_user).delete(users::delete_user),
        )
        .route("/v1/users/:username/admin", put(users::put_user_admin))
        .route(
            "/v1/activities",
            get(activities::list_activities).delete(activities::purge_activities),
        )
        .route("/v1/oauth2/google/login", get(oauth2::google_login))
        .route("/v1/oauth2/google/register", get(oauth2::google_register))
        .route("/v1/oauth2/google/callback", get(oauth2::google_callback))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(globals))
                .layer(Extension(sender))
                .layer(Extension(pool)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(port: u16, dsn: String, globals: GlobalArgs) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    // Reconcile the role catalog; the administrator account is only touched
    // by the explicit reset-admin action.
    permissions::insert_default_roles(&pool)
        .await
        .context("Failed to insert default roles")?;

    let sender: Arc<dyn email::EmailSender> = Arc::new(email::LogEmailSender);
    let app = router(pool, globals, sender);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
