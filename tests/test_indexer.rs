#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]


#[cfg(test)]
mod indexer_tests {
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };

    use crate::test_utils::{hash_for, start_mock_chain_server};
    use axum::http::StatusCode;
    use reef_chain_indexer::{
        indexer::{
            batch_processor::BatchProcessor,
            lib::{run_indexer, IndexingConfig, IndexingConfigBuilder},
            scheduler::SchedulerState,
        },
        parser::ReefBlockParser,
        rpc::SubstrateJsonRpcClient,
        store::{IndexerStore, MemoryStore},
        BlockHash, BlockHeight, Cursor, Direction,
    };
    use tokio::time::{sleep, Instant};

    fn config(start_block: i64) -> IndexingConfig {
        IndexingConfigBuilder::testing()
            .rpc_url("http://127.0.0.1:9")
            .db_conn_string("postgres://unused")
            .start_block(start_block)
            .build()
            .unwrap()
    }

    fn client(url: &str) -> Arc<SubstrateJsonRpcClient> {
        Arc::new(SubstrateJsonRpcClient::new(url, Duration::from_secs(5), 0))
    }

    fn height(value: i64) -> BlockHeight {
        BlockHeight::from_trusted(value)
    }

    async fn reached(store: &MemoryStore, forward: i64, backfill: Option<i64>) -> bool {
        let forward_done = store
            .get_forward_cursor()
            .await
            .unwrap()
            .is_some_and(|cursor| cursor.height.value() >= forward);
        let backfill_done = match backfill {
            Some(target) => store
                .get_backfill_cursor()
                .await
                .unwrap()
                .is_some_and(|cursor| cursor.height.value() <= target),
            None => true,
        };
        forward_done && backfill_done
    }

    /// Runs the indexer until the cursors reach their targets or `timeout` passes, then
    /// requests termination and waits for a clean stop.
    async fn run_until(
        config: &IndexingConfig,
        rpc: Arc<SubstrateJsonRpcClient>,
        store: Arc<MemoryStore>,
        forward: i64,
        backfill: Option<i64>,
        timeout: Duration,
    ) -> SchedulerState {
        let should_terminate = Arc::new(AtomicBool::new(false));

        let watcher = async {
            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline && !reached(&store, forward, backfill).await {
                sleep(Duration::from_millis(20)).await;
            }
            should_terminate.store(true, Ordering::SeqCst);
        };

        let (state, ()) = tokio::join!(
            run_indexer(config, rpc, store.clone(), should_terminate.clone()),
            watcher
        );
        state.unwrap()
    }

    #[tokio::test]
    async fn should_index_forward_to_head_in_order() {
        let chain = start_mock_chain_server(30).await.unwrap();
        let store = Arc::new(MemoryStore::new());

        let state = run_until(
            &config(1),
            client(&chain.url),
            store.clone(),
            30,
            None,
            Duration::from_secs(20),
        )
        .await;

        assert_eq!(state.forward.cursor, height(30));
        assert!(store.is_closed().await);

        let order: Vec<i64> = store.insert_order().await.iter().map(|h| h.value()).collect();
        assert_eq!(order, (1..=30).collect::<Vec<_>>());

        let cursor = store.get_forward_cursor().await.unwrap().unwrap();
        assert_eq!(cursor, Cursor::new(height(30), BlockHash::new(hash_for(30)).unwrap()));

        let batch = store.batch(height(12)).await.unwrap();
        assert_eq!(batch.transfers.len(), 1);
        assert_eq!(batch.transfers[0].amount, "1000");
        // The timestamp inherent is not an extrinsic record.
        assert_eq!(batch.extrinsics.len(), 1);
        assert!(batch.extrinsics[0].success);
        assert!(chain.decoded_requests().iter().all(|(_, with_extrinsics)| *with_extrinsics));
    }

    #[tokio::test]
    async fn should_mark_unparsable_block_and_keep_going() {
        let chain = start_mock_chain_server(20).await.unwrap();
        chain.fail_parse_at(5);
        let store = Arc::new(MemoryStore::new());

        let state = run_until(
            &config(1),
            client(&chain.url),
            store.clone(),
            20,
            None,
            Duration::from_secs(20),
        )
        .await;

        assert_eq!(state.forward.cursor, height(20));
        assert_eq!(store.insert_order().await.len(), 19);
        assert!(store.batch(height(5)).await.is_none());
        assert!(store
            .forward_history()
            .await
            .contains(&Cursor::unresolved(height(5))));
    }

    #[tokio::test]
    async fn should_follow_a_moving_head() {
        let chain = start_mock_chain_server(10).await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = config(1);
        let rpc = client(&chain.url);

        let should_terminate = Arc::new(AtomicBool::new(false));
        let driver = async {
            let deadline = Instant::now() + Duration::from_secs(20);
            while Instant::now() < deadline && !reached(&store, 10, None).await {
                sleep(Duration::from_millis(20)).await;
            }
            chain.set_head(25);
            while Instant::now() < deadline && !reached(&store, 25, None).await {
                sleep(Duration::from_millis(20)).await;
            }
            should_terminate.store(true, Ordering::SeqCst);
        };

        let (state, ()) = tokio::join!(
            run_indexer(&config, rpc, store.clone(), should_terminate.clone()),
            driver
        );

        assert_eq!(state.unwrap().forward.cursor, height(25));
        let order: Vec<i64> = store.insert_order().await.iter().map(|h| h.value()).collect();
        assert_eq!(order, (1..=25).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn should_backfill_down_to_target_without_extrinsics() {
        let chain = start_mock_chain_server(40).await.unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = IndexingConfigBuilder::testing()
            .rpc_url(chain.url.clone())
            .db_conn_string("postgres://unused")
            .start_block(30)
            .backfill(true)
            .backfill_target(11)
            .build()
            .unwrap();

        let state = run_until(
            &config,
            client(&chain.url),
            store.clone(),
            40,
            Some(11),
            Duration::from_secs(20),
        )
        .await;

        assert_eq!(state.forward.cursor, height(40));
        assert!(state.backfill.unwrap().is_complete());

        let mut heights: Vec<i64> = store.insert_order().await.iter().map(|h| h.value()).collect();
        heights.sort_unstable();
        assert_eq!(heights, (11..=40).collect::<Vec<_>>());

        let reached: Vec<i64> = store
            .backfill_history()
            .await
            .iter()
            .map(|cursor| cursor.height.value())
            .collect();
        assert_eq!(reached, vec![20, 11]);

        // Historical blocks are fetched and parsed without extrinsics.
        assert!(store.batch(height(15)).await.unwrap().extrinsics.is_empty());
        assert_eq!(store.batch(height(35)).await.unwrap().extrinsics.len(), 1);
        assert!(chain
            .decoded_requests()
            .iter()
            .all(|(h, with_extrinsics)| *with_extrinsics == (*h >= 30)));
    }

    #[tokio::test]
    async fn should_resume_after_saved_cursor() {
        let chain = start_mock_chain_server(25).await.unwrap();
        let saved = Cursor::new(height(20), BlockHash::new(hash_for(20)).unwrap());
        let store = Arc::new(MemoryStore::with_cursors(Some(saved), None));

        let state = run_until(
            &config(1),
            client(&chain.url),
            store.clone(),
            25,
            None,
            Duration::from_secs(20),
        )
        .await;

        assert_eq!(state.forward.cursor, height(25));
        let order: Vec<i64> = store.insert_order().await.iter().map(|h| h.value()).collect();
        assert_eq!(order, vec![21, 22, 23, 24, 25]);
    }

    #[tokio::test]
    async fn should_not_advance_while_node_is_unreachable() {
        let saved = Cursor::new(height(10), BlockHash::new(hash_for(10)).unwrap());
        let store = Arc::new(MemoryStore::with_cursors(Some(saved.clone()), None));

        // Nothing listens on the discard port.
        let state = run_until(
            &config(1),
            client("http://127.0.0.1:9"),
            store.clone(),
            11,
            None,
            Duration::from_millis(500),
        )
        .await;

        assert_eq!(state.forward.cursor, height(10));
        assert!(store.insert_order().await.is_empty());
        assert!(store.forward_history().await.is_empty());
        assert_eq!(store.get_forward_cursor().await.unwrap(), Some(saved));
        assert!(store.is_closed().await);
    }

    #[tokio::test]
    async fn should_halt_batch_when_node_returns_http_errors() {
        let chain = start_mock_chain_server(20).await.unwrap();
        let store = Arc::new(MemoryStore::new());

        for status in [
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::BAD_GATEWAY,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            chain.fail_with_status(status);
            let processor = BatchProcessor::new(
                client(&chain.url),
                Arc::new(ReefBlockParser::new()),
                store.clone(),
                5,
                Arc::new(AtomicBool::new(false)),
            );

            let outcome = processor
                .process_batch(height(1), height(5), Direction::Forward)
                .await
                .unwrap();

            assert!(outcome.halted.as_ref().is_some_and(|e| e.is_systemic()), "{status}");
            assert!(outcome.last_processed.is_none());
            assert_eq!(outcome.stats.failed, 0);
        }

        assert!(store.forward_history().await.is_empty());
        assert!(store.insert_order().await.is_empty());
    }

    #[tokio::test]
    async fn should_hold_cursor_through_gateway_outage_and_resume() {
        let chain = start_mock_chain_server(20).await.unwrap();
        chain.fail_with_status(StatusCode::SERVICE_UNAVAILABLE);
        let saved = Cursor::new(height(10), BlockHash::new(hash_for(10)).unwrap());
        let store = Arc::new(MemoryStore::with_cursors(Some(saved.clone()), None));
        let config = config(1);
        let rpc = client(&chain.url);

        let should_terminate = Arc::new(AtomicBool::new(false));
        let driver = async {
            sleep(Duration::from_millis(500)).await;
            assert_eq!(store.get_forward_cursor().await.unwrap(), Some(saved.clone()));
            assert!(store.forward_history().await.is_empty());

            chain.recover();
            let deadline = Instant::now() + Duration::from_secs(20);
            while Instant::now() < deadline && !reached(&store, 20, None).await {
                sleep(Duration::from_millis(20)).await;
            }
            should_terminate.store(true, Ordering::SeqCst);
        };

        let (state, ()) = tokio::join!(
            run_indexer(&config, rpc, store.clone(), should_terminate.clone()),
            driver
        );

        assert_eq!(state.unwrap().forward.cursor, height(20));
        let order: Vec<i64> = store.insert_order().await.iter().map(|h| h.value()).collect();
        assert_eq!(order, (11..=20).collect::<Vec<_>>());
        assert!(store
            .forward_history()
            .await
            .iter()
            .all(|cursor| !cursor.hash.is_zero()));
    }
}
