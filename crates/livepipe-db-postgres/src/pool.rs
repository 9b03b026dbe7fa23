//! Connection pool for the PostgreSQL entity store.

use std::time::Duration;

use sqlx_postgres::{PgPool, PgPoolOptions};
use tracing::info;

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Opens the pool described by `config`.
///
/// Each transaction holds one connection until it ends, so `pool_size`
/// bounds the number of concurrent transactions.
pub async fn create_pool(config: &PostgresConfig) -> Result<PgPool> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be at least 1"));
    }

    let mut options = PgPoolOptions::new()
        .max_connections(config.pool_size)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));
    if let Some(idle) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle));
    }

    let pool = options.connect(&config.url).await?;
    info!(
        url = %mask_password(&config.url),
        pool_size = config.pool_size,
        "Connected to PostgreSQL"
    );
    Ok(pool)
}

/// Replaces the password in a connection URL with `****`.
pub fn mask_password(url: &str) -> String {
    let scheme_end = url.find("://").map_or(0, |p| p + 3);
    let Some(at) = url.find('@') else {
        return url.to_string();
    };
    match url[scheme_end..at].find(':') {
        Some(colon) => {
            let colon = scheme_end + colon;
            format!("{}:****{}", &url[..colon], &url[at..])
        }
        None => url.to_string(),
    }
}
