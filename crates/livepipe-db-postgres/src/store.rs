//! PostgreSQL implementation of the EntityStore trait.

use async_trait::async_trait;
use sqlx_postgres::PgPool;

use livepipe_storage::{EntityStore, StorageError, StorageResult, StoreTransaction};

use crate::config::PostgresConfig;
use crate::migrations;
use crate::pool;
use crate::transaction::PostgresTransaction;

/// PostgreSQL entity store.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new `PostgresStore` with the given configuration.
    ///
    /// Creates the connection pool and runs migrations if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection pool cannot be created
    /// or if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, StorageError> {
        let pool = pool::create_pool(&config).await?;

        if config.run_migrations {
            migrations::run(&pool).await?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl EntityStore for PostgresStore {
    async fn begin(&self) -> StorageResult<Box<dyn StoreTransaction>> {
        let tx = self.pool.begin().await.map_err(|e| {
            StorageError::transaction_error(format!("Failed to begin transaction: {e}"))
        })?;
        Ok(Box::new(PostgresTransaction::new(tx)))
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
