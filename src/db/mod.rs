//! # PostgreSQL Store
//!
//! [`DbConnection`] owns the sqlx pool; [`PgIndexerStore`] implements the persistence port on
//! top of it using the queries in [`crate::repositories`].

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    ConnectOptions, Pool, Postgres,
};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    domain::{DomainBatch, VerifiedContract},
    errors::{IndexerError, Result},
    repositories::{block_batch, cursor, verified_contract},
    store::IndexerStore,
    types::Cursor,
};


/// Writes are issued from a single loop, so a small pool is enough.
pub const DB_MAX_CONNECTIONS: u32 = 10;

const CONNECT_MAX_RETRIES: u32 = 3;

pub struct DbConnection {
    pub pool: Pool<Postgres>,
}

impl DbConnection {
    pub async fn new(db_conn_string: String) -> Result<Arc<Self>> {
        let conn_options: PgConnectOptions = db_conn_string.parse().map_err(|e| {
            IndexerError::configuration("db_conn_string", format!("Invalid connection string: {e}"))
        })?;
        let conn_options = conn_options
            .log_slow_statements(tracing::log::LevelFilter::Debug, Duration::new(120, 0));

        let mut attempts = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(DB_MAX_CONNECTIONS)
                .connect_with(conn_options.clone())
                .await
            {
                Ok(pool) => return Ok(Arc::new(Self { pool })),
                Err(e) => {
                    let err = IndexerError::from(e);
                    if !err.is_systemic() || attempts >= CONNECT_MAX_RETRIES {
                        return Err(err);
                    }
                    attempts += 1;
                    let backoff = Duration::from_secs(2_u64.pow(attempts));
                    warn!(
                        "[db] Connection failed with error: {}. Retrying in {:?} (Attempt {}/{})",
                        err, backoff, attempts, CONNECT_MAX_RETRIES
                    );
                    sleep(backoff).await;
                }
            }
        }
    }
}

/// [`IndexerStore`] backed by PostgreSQL.
pub struct PgIndexerStore {
    db: Arc<DbConnection>,
}

impl PgIndexerStore {
    #[must_use]
    pub const fn new(db: Arc<DbConnection>) -> Self {
        Self { db }
    }

    pub async fn connect(db_conn_string: String) -> Result<Self> {
        Ok(Self::new(DbConnection::new(db_conn_string).await?))
    }

    /// Applies the embedded schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("[db] Running migrations");
        sqlx::migrate!().run(&self.db.pool).await.map_err(|e| {
            IndexerError::database_connection(format!("Failed to run database migrations: {e}"))
        })
    }
}

#[async_trait]
impl IndexerStore for PgIndexerStore {
    async fn get_forward_cursor(&self) -> Result<Option<Cursor>> {
        cursor::get_cursor(&self.db.pool, cursor::FORWARD_CURSOR_ID).await
    }

    async fn set_forward_cursor(&self, value: &Cursor) -> Result<()> {
        cursor::set_cursor(&self.db.pool, cursor::FORWARD_CURSOR_ID, value).await
    }

    async fn get_backfill_cursor(&self) -> Result<Option<Cursor>> {
        cursor::get_cursor(&self.db.pool, cursor::BACKFILL_CURSOR_ID).await
    }

    async fn set_backfill_cursor(&self, value: &Cursor) -> Result<()> {
        cursor::set_cursor(&self.db.pool, cursor::BACKFILL_CURSOR_ID, value).await
    }

    async fn upsert_verified_contract(&self, contract: &VerifiedContract) -> Result<()> {
        verified_contract::upsert_verified_contract(&self.db.pool, contract).await
    }

    async fn insert_batch(&self, batch: &DomainBatch) -> Result<()> {
        let mut tx = self.db.pool.begin().await?;
        // Dropping the transaction on error rolls the whole block back.
        block_batch::insert_block_batch(&mut tx, batch).await?;
        tx.commit().await.map_err(|e| {
            IndexerError::database_query(format!(
                "Failed to commit block {}: {e}",
                batch.height
            ))
        })
    }

    async fn close(&self) -> Result<()> {
        info!("[db] Closing connection pool");
        self.db.pool.close().await;
        Ok(())
    }
}
