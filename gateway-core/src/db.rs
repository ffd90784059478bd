//! Shared PostgreSQL pool construction.

use crate::config::DatabaseConfig;
use crate::error::GatewayError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Open a connection pool with the gateway's standard pool settings.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, GatewayError> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .connect(&config.url)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

    info!("PostgreSQL connection pool established");

    Ok(pool)
}

/// Run the core migrations (idempotency records, audit entries).
pub async fn run_migrations(pool: &PgPool) -> Result<(), GatewayError> {
    info!("Running gateway-core migrations");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| GatewayError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
    Ok(())
}
