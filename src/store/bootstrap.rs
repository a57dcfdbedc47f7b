use sqlx::PgPool;

use crate::auth::role::Role;
use crate::config::Config;
use crate::identity::{IdentityError, IdentityProvider};

/// Seed data every deployment needs: the monitoring site row and, on a fresh
/// install with credentials configured, the first administrator.
#[tracing::instrument(skip_all, err)]
pub async fn run(
    pool: &PgPool,
    identity: &dyn IdentityProvider,
    config: &Config,
) -> anyhow::Result<()> {
    let inserted = sqlx::query(
        "INSERT INTO monitoring_sites (id, nombre)
         VALUES ($1, $2)
         ON CONFLICT (id) DO NOTHING",
    )
    .bind(&config.monitoring_site_id)
    .bind(&config.monitoring_site_name)
    .execute(pool)
    .await?
    .rows_affected();

    if inserted > 0 {
        tracing::info!(site_id = %config.monitoring_site_id, "monitoring site seeded");
    }

    let (Some(email), Some(password)) = (
        config.admin_email.as_deref(),
        config.admin_password.as_deref(),
    ) else {
        return Ok(());
    };

    let admins: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = $1")
        .bind(Role::Admin.as_str())
        .fetch_one(pool)
        .await?;

    if admins > 0 {
        tracing::info!("bootstrap admin skipped, an administrator already exists");
        return Ok(());
    }

    tracing::info!("no administrator found, creating bootstrap admin");

    // The account may survive a previous run whose database was reset.
    let uid = match identity
        .create_account(email, password, "Administrador")
        .await
    {
        Ok(uid) => uid,
        Err(IdentityError::EmailExists) => identity.sign_in(email, password).await?.uid,
        Err(e) => return Err(e.into()),
    };

    sqlx::query(
        "INSERT INTO users (uid, name, email, role)
         VALUES ($1, 'Administrador', $2, $3)
         ON CONFLICT (uid) DO UPDATE SET role = EXCLUDED.role",
    )
    .bind(&uid)
    .bind(email)
    .bind(Role::Admin.as_str())
    .execute(pool)
    .await?;

    tracing::info!(%uid, "bootstrap admin created");
    Ok(())
}
