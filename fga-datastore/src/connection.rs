// Datastore connection management
use crate::config::DatastoreConfig;
use crate::error::{DatabaseError, DatabaseResult};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use tracing::{info, warn};

/// Build a connection pool for the SQLite file at `uri` and verify it answers
pub async fn connect_pool(uri: &str, config: &DatastoreConfig) -> DatabaseResult<SqlitePool> {
    config.validate()?;
    let options = config.connect_options(uri)?;

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_open_conns)
        .min_connections(config.min_idle_conns)
        .idle_timeout(config.idle_timeout())
        .max_lifetime(config.max_lifetime())
        .connect_with(options)
        .await
        .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

    if let Err(e) = ping(&pool).await {
        pool.close().await;
        return Err(e);
    }

    info!(
        "Datastore connection pool created (max {} connections, journal_mode={}, synchronous={})",
        config.max_open_conns,
        config.journal_mode.pragma_value(),
        config.synchronous.pragma_value()
    );
    Ok(pool)
}

/// Run a trivial query against the pool
pub async fn ping(pool: &SqlitePool) -> DatabaseResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(|e| {
            warn!("Datastore health check failed: {}", e);
            DatabaseError::ConnectionFailed(e.to_string())
        })
}
