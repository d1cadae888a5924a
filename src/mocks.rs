//! # Mock Implementations for Testing
//!
//! mockall mocks of the ports, for tests that need exact control over what a collaborator
//! returns for each call.
//!
//! - [`MockChainRpc`] - Mock implementation of [`crate::rpc::ChainRpcProvider`]

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use async_trait::async_trait;
use mockall::mock;

use crate::{
    errors::Result,
    rpc::{ChainRpcProvider, RawBlock},
    types::{BlockHash, BlockHeight},
};

mock! {
    /// Mock implementation of the chain RPC provider trait.
    ///
    /// ```rust,ignore
    /// let mut rpc = MockChainRpc::new();
    /// rpc.expect_get_finalized_head_height()
    ///     .times(1)
    ///     .returning(|| Ok(BlockHeight::from_trusted(12345)));
    /// ```
    pub ChainRpc {}

    #[async_trait]
    impl ChainRpcProvider for ChainRpc {
        async fn get_finalized_head_height(&self) -> Result<BlockHeight>;
        async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash>;
        async fn get_raw_block(&self, hash: &BlockHash, include_extrinsics: bool) -> Result<RawBlock>;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{atomic::AtomicBool, Arc};

    use mockall::predicate::eq;

    use super::*;
    use crate::{
        errors::IndexerError,
        indexer::{
            batch_processor::BatchProcessor,
            scheduler::{SchedulerState, StartOptions},
        },
        parser::ReefBlockParser,
        store::MemoryStore,
        types::{Cursor, Direction},
    };

    fn hash(height: i64) -> BlockHash {
        BlockHash::from_trusted(format!("0x{height:064x}"))
    }

    fn raw_block(number: i64) -> RawBlock {
        RawBlock {
            number,
            hash: hash(number).into_value(),
            timestamp: Some(1_700_000_000_000),
            ..RawBlock::default()
        }
    }

    fn processor(
        rpc: MockChainRpc,
        store: &Arc<MemoryStore>,
    ) -> BatchProcessor<MockChainRpc, MemoryStore> {
        BatchProcessor::new(
            Arc::new(rpc),
            Arc::new(ReefBlockParser::new()),
            store.clone(),
            2,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[tokio::test]
    async fn test_mismatched_block_number_is_a_block_failure() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_get_block_hash()
            .with(eq(BlockHeight::from_trusted(5)))
            .times(1)
            .returning(|h| Ok(hash(h.value())));
        // The node answers with a different block than the one asked for.
        rpc.expect_get_raw_block()
            .times(1)
            .returning(|_, _| Ok(raw_block(6)));

        let store = Arc::new(MemoryStore::new());
        let outcome = processor(rpc, &store)
            .process_batch(
                BlockHeight::from_trusted(5),
                BlockHeight::from_trusted(5),
                Direction::Forward,
            )
            .await
            .unwrap();

        assert_eq!(outcome.stats.failed, 1);
        assert!(outcome.halted.is_none());
        assert!(store.insert_order().await.is_empty());
        assert_eq!(
            outcome.last_processed,
            Some(Cursor::unresolved(BlockHeight::from_trusted(5)))
        );
    }

    #[tokio::test]
    async fn test_missing_block_is_skipped_during_backfill() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_get_block_hash().times(2).returning(|h| {
            if h.value() == 3 {
                Err(IndexerError::block_not_found(h.to_string()))
            } else {
                Ok(hash(h.value()))
            }
        });
        rpc.expect_get_raw_block()
            .withf(|_, include_extrinsics| !*include_extrinsics)
            .times(1)
            .returning(|hash, _| {
                let digits = hash.value().trim_start_matches("0x");
                Ok(raw_block(i64::from_str_radix(digits, 16).unwrap()))
            });

        let store = Arc::new(MemoryStore::new());
        let outcome = processor(rpc, &store)
            .process_batch(
                BlockHeight::from_trusted(3),
                BlockHeight::from_trusted(4),
                Direction::Backward,
            )
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(outcome.stats.failed, 1);
        assert_eq!(store.insert_order().await, vec![BlockHeight::from_trusted(4)]);
        assert_eq!(
            outcome.last_processed,
            Some(Cursor::new(BlockHeight::from_trusted(4), hash(4)))
        );
    }

    #[tokio::test]
    async fn test_saved_cursor_skips_head_lookup() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_get_finalized_head_height().never();

        let saved = Cursor::new(BlockHeight::from_trusted(77), hash(77));
        let store = MemoryStore::with_cursors(Some(saved), None);
        let options = StartOptions {
            start_block: 10,
            backfill: false,
            backfill_target: 1,
            default_lookback: 1000,
        };

        let state = SchedulerState::load(&rpc, &store, &options).await.unwrap();
        assert_eq!(state.forward.cursor, BlockHeight::from_trusted(77));
    }

    #[tokio::test]
    async fn test_head_lookup_failure_surfaces_at_startup() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_get_finalized_head_height()
            .times(1)
            .returning(|| Err(IndexerError::rpc_timeout(30)));

        let store = MemoryStore::new();
        let options = StartOptions {
            start_block: 0,
            backfill: false,
            backfill_target: 1,
            default_lookback: 1000,
        };

        let err = SchedulerState::load(&rpc, &store, &options).await.unwrap_err();
        assert!(err.is_systemic());
    }
}
