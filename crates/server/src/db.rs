use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{info, warn};

use shelf_core::config::PostgresConfig;

/// Create a PostgreSQL connection pool and run migrations.
/// Returns `None` when no database is configured.
pub async fn init_pg_pool(config: &PostgresConfig) -> anyhow::Result<Option<PgPool>> {
    if !config.is_configured() {
        warn!("PG_USERNAME not configured, using in-memory stores (nothing survives a restart)");
        return Ok(None);
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.connection_string())
        .await?;
    info!(host = %config.host, database = %config.database, "PostgreSQL connected");

    sqlx::migrate!("../../migrations").run(&pool).await?;
    info!("Database migrations applied successfully");
    Ok(Some(pool))
}
