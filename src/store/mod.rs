//! # Persistence Port
//!
//! [`IndexerStore`] is everything the indexer needs from durable storage: the two progress
//! cursors, the verified-contract registry and per-block batch insertion. The PostgreSQL
//! implementation lives in [`crate::db`]; [`MemoryStore`] keeps everything in process.

mod memory;

use async_trait::async_trait;

use crate::{
    domain::{DomainBatch, VerifiedContract},
    errors::Result,
    types::Cursor,
};

pub use memory::MemoryStore;

#[async_trait]
pub trait IndexerStore: Send + Sync {
    /// Last height fully processed by forward sync.
    async fn get_forward_cursor(&self) -> Result<Option<Cursor>>;

    async fn set_forward_cursor(&self, cursor: &Cursor) -> Result<()>;

    /// Lowest height reached by backfill.
    async fn get_backfill_cursor(&self) -> Result<Option<Cursor>>;

    async fn set_backfill_cursor(&self, cursor: &Cursor) -> Result<()>;

    /// Idempotent.
    async fn upsert_verified_contract(&self, contract: &VerifiedContract) -> Result<()>;

    /// Persists one block's records atomically. A failure leaves no partial rows behind.
    async fn insert_batch(&self, batch: &DomainBatch) -> Result<()>;

    /// Flushes and releases the underlying connections.
    async fn close(&self) -> Result<()>;
}
