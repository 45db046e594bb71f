use crate::auth::{permissions, store};
use crate::cli::actions::Action;
use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;

/// Handle the reset-admin action: reconcile the role catalog, then restore
/// the local administrator to its default credentials.
pub async fn handle(action: Action) -> Result<()> {
    let Action::ResetAdmin { dsn } = action else {
        return Ok(());
    };

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    permissions::insert_default_roles(&pool)
        .await
        .context("Failed to insert default roles")?;
    store::establish_admin_defaults(&pool)
        .await
        .context("Failed to establish administrator defaults")?;

    Ok(())
}
