use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    domain::{DomainBatch, VerifiedContract},
    errors::{IndexerError, Result},
    store::IndexerStore,
    types::{BlockHeight, Cursor},
};

#[derive(Debug, Default)]
struct State {
    forward: Option<Cursor>,
    backfill: Option<Cursor>,
    forward_history: Vec<Cursor>,
    backfill_history: Vec<Cursor>,
    verified_contracts: BTreeMap<String, VerifiedContract>,
    batches: BTreeMap<BlockHeight, DomainBatch>,
    insert_order: Vec<BlockHeight>,
    failing_inserts: HashSet<BlockHeight>,
    fail_cursor_writes: bool,
    closed: bool,
}

/// In-process [`IndexerStore`] that keeps every write for later inspection.
///
/// Tests drive the whole pipeline against it and can inject insert failures per height.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from previously persisted cursors.
    #[must_use]
    pub fn with_cursors(forward: Option<Cursor>, backfill: Option<Cursor>) -> Self {
        Self {
            state: Mutex::new(State {
                forward,
                backfill,
                ..State::default()
            }),
        }
    }

    /// Makes `insert_batch` fail for the given height.
    pub async fn fail_inserts_at(&self, height: BlockHeight) {
        self.state.lock().await.failing_inserts.insert(height);
    }

    /// Makes every cursor write fail until reset.
    pub async fn set_fail_cursor_writes(&self, fail: bool) {
        self.state.lock().await.fail_cursor_writes = fail;
    }

    /// Heights in the order `insert_batch` succeeded for them.
    pub async fn insert_order(&self) -> Vec<BlockHeight> {
        self.state.lock().await.insert_order.clone()
    }

    pub async fn batch(&self, height: BlockHeight) -> Option<DomainBatch> {
        self.state.lock().await.batches.get(&height).cloned()
    }

    pub async fn forward_history(&self) -> Vec<Cursor> {
        self.state.lock().await.forward_history.clone()
    }

    pub async fn backfill_history(&self) -> Vec<Cursor> {
        self.state.lock().await.backfill_history.clone()
    }

    pub async fn verified_contract(&self, id: &str) -> Option<VerifiedContract> {
        self.state.lock().await.verified_contracts.get(id).cloned()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl IndexerStore for MemoryStore {
    async fn get_forward_cursor(&self) -> Result<Option<Cursor>> {
        Ok(self.state.lock().await.forward.clone())
    }

    async fn set_forward_cursor(&self, cursor: &Cursor) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_cursor_writes {
            return Err(IndexerError::database_connection("cursor write rejected"));
        }
        state.forward = Some(cursor.clone());
        state.forward_history.push(cursor.clone());
        Ok(())
    }

    async fn get_backfill_cursor(&self) -> Result<Option<Cursor>> {
        Ok(self.state.lock().await.backfill.clone())
    }

    async fn set_backfill_cursor(&self, cursor: &Cursor) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.fail_cursor_writes {
            return Err(IndexerError::database_connection("cursor write rejected"));
        }
        state.backfill = Some(cursor.clone());
        state.backfill_history.push(cursor.clone());
        Ok(())
    }

    async fn upsert_verified_contract(&self, contract: &VerifiedContract) -> Result<()> {
        self.state
            .lock()
            .await
            .verified_contracts
            .insert(contract.id.clone(), contract.clone());
        Ok(())
    }

    async fn insert_batch(&self, batch: &DomainBatch) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.failing_inserts.contains(&batch.height) {
            return Err(IndexerError::database_query(format!(
                "insert of block {} rejected",
                batch.height
            )));
        }
        debug!("[db] stored block #{} in memory", batch.height);
        state.batches.insert(batch.height, batch.clone());
        state.insert_order.push(batch.height);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.lock().await.closed = true;
        Ok(())
    }
}
