use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    errors::{IndexerError, Result},
    rpc::{ChainRpcProvider, RawBlock},
    types::{BlockHash, BlockHeight},
};

/// Deterministic hash for a scripted height.
pub fn hash_for(height: i64) -> BlockHash {
    BlockHash::from_trusted(format!("0x{height:064x}"))
}

/// Scripted chain for tests.
///
/// Every height up to the head exists. Heights can be made unparsable, unreachable or slow,
/// and the provider tracks how many block fetches are in flight at once.
///
/// This struct is used internally for testing and is not part of the public API.
#[doc(hidden)]
#[derive(Default)]
pub struct MockRpcProvider {
    head: AtomicI64,
    head_unreachable: AtomicBool,
    unparsable: Mutex<HashSet<i64>>,
    unreachable: Mutex<HashSet<i64>>,
    latency: Mutex<HashMap<i64, Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hash_calls: AtomicUsize,
    fetched: Mutex<Vec<(i64, bool)>>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[allow(clippy::unwrap_used)]
impl MockRpcProvider {
    pub fn with_head(head: i64) -> Self {
        let provider = Self::default();
        provider.set_head(head);
        provider
    }

    pub fn set_head(&self, head: i64) {
        self.head.store(head, Ordering::SeqCst);
    }

    pub fn set_head_unreachable(&self, unreachable: bool) {
        self.head_unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// The node serves garbage for this height, so parsing fails.
    pub fn fail_parse_at(&self, height: i64) {
        self.unparsable.lock().unwrap().insert(height);
    }

    /// Fetches for this height fail with a connection error.
    pub fn fail_connection_at(&self, height: i64) {
        self.unreachable.lock().unwrap().insert(height);
    }

    pub fn clear_connection_failures(&self) {
        self.unreachable.lock().unwrap().clear();
    }

    pub fn delay_at(&self, height: i64, delay: Duration) {
        self.latency.lock().unwrap().insert(height, delay);
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn hash_calls(&self) -> usize {
        self.hash_calls.load(Ordering::SeqCst)
    }

    /// `(height, include_extrinsics)` for every block content fetch, in call order.
    pub fn fetched(&self) -> Vec<(i64, bool)> {
        self.fetched.lock().unwrap().clone()
    }

    fn check_reachable(&self, height: i64) -> Result<()> {
        if self.unreachable.lock().unwrap().contains(&height) {
            return Err(IndexerError::rpc_connection(format!(
                "connection refused fetching {height}"
            )));
        }
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[async_trait]
impl ChainRpcProvider for MockRpcProvider {
    async fn get_finalized_head_height(&self) -> Result<BlockHeight> {
        if self.head_unreachable.load(Ordering::SeqCst) {
            return Err(IndexerError::rpc_connection("connection refused"));
        }
        Ok(BlockHeight::from_trusted(self.head.load(Ordering::SeqCst)))
    }

    async fn get_block_hash(&self, height: BlockHeight) -> Result<BlockHash> {
        self.hash_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable(height.value())?;
        if height.value() > self.head.load(Ordering::SeqCst) {
            return Err(IndexerError::block_not_found(height.to_string()));
        }
        Ok(hash_for(height.value()))
    }

    async fn get_raw_block(&self, hash: &BlockHash, include_extrinsics: bool) -> Result<RawBlock> {
        let height = i64::from_str_radix(hash.value().trim_start_matches("0x"), 16)
            .map_err(|_| IndexerError::block_not_found(hash.to_string()))?;

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        let delay = self.latency.lock().unwrap().get(&height).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        } else {
            tokio::task::yield_now().await;
        }

        self.check_reachable(height)?;
        self.fetched.lock().unwrap().push((height, include_extrinsics));

        let hash = if self.unparsable.lock().unwrap().contains(&height) {
            "0xnot-a-hash".to_string()
        } else {
            hash.to_string()
        };

        Ok(RawBlock {
            number: height,
            hash,
            timestamp: Some(1_600_000_000_000 + height * 6_000),
            ..RawBlock::default()
        })
    }
}
