//! # Batch Processor
//!
//! Processes one inclusive height range in a given direction. Heights are fetched and parsed
//! concurrently in chunks of `concurrency`, and each chunk fully settles before the next one
//! starts. Results are then persisted one by one in the range's canonical order, whatever
//! order the fetches completed in.
//!
//! Block-level failures stay inside the batch and show up in [`BatchStats`]. A systemic
//! failure halts the batch at the failing height and is handed back in [`BatchOutcome`].

use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::{
    domain::DomainBatch,
    errors::{IndexerError, Result},
    parser::BlockParser,
    rpc::ChainRpcProvider,
    store::IndexerStore,
    types::{BlockHeight, Cursor, Direction},
    utils::truncate_error,
};

/// Aggregate counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Heights visited, whatever their outcome.
    pub blocks: usize,
    pub transfers: usize,
    pub accounts: usize,
    pub contracts: usize,
    pub staking_events: usize,
    pub era_validators: usize,
    pub nfts: usize,
    /// Heights that could not be fetched or parsed.
    pub failed: usize,
    /// Heights that parsed but whose insert was rejected.
    pub insert_failed: usize,
    pub elapsed: Duration,
}

impl BatchStats {
    fn record(&mut self, batch: &DomainBatch) {
        self.transfers += batch.transfers.len();
        self.accounts += batch.accounts.len();
        self.contracts += batch.contracts.len();
        self.staking_events += batch.staking_events.len();
        self.era_validators += batch.era_validators.len();
        self.nfts += batch.nfts.len();
    }

    #[must_use]
    pub const fn inserted(&self) -> usize {
        self.blocks - self.failed - self.insert_failed
    }
}

/// `N tx, N acc[, N tokens][, N stk][, N val][, N nft]`
impl fmt::Display for BatchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} tx, {} acc", self.transfers, self.accounts)?;
        if self.contracts > 0 {
            write!(f, ", {} tokens", self.contracts)?;
        }
        if self.staking_events > 0 {
            write!(f, ", {} stk", self.staking_events)?;
        }
        if self.era_validators > 0 {
            write!(f, ", {} val", self.era_validators)?;
        }
        if self.nfts > 0 {
            write!(f, ", {} nft", self.nfts)?;
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct BatchOutcome {
    pub stats: BatchStats,
    /// The last height visited in canonical order that may be recorded as reached.
    ///
    /// Forward: a failed height is recorded with the sentinel hash. Backfill: a failed height
    /// is skipped and never recorded.
    pub last_processed: Option<Cursor>,
    /// Termination was requested before every chunk ran.
    pub interrupted: bool,
    /// The systemic error the batch halted on, if any.
    pub halted: Option<IndexerError>,
}

impl BatchOutcome {
    /// True when every height of the range was visited.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !self.interrupted && self.halted.is_none()
    }
}

pub struct BatchProcessor<R: ?Sized, S: ?Sized> {
    rpc: Arc<R>,
    parser: Arc<dyn BlockParser>,
    store: Arc<S>,
    concurrency: usize,
    should_terminate: Arc<AtomicBool>,
}

impl<R, S> BatchProcessor<R, S>
where
    R: ChainRpcProvider + ?Sized,
    S: IndexerStore + ?Sized,
{
    pub fn new(
        rpc: Arc<R>,
        parser: Arc<dyn BlockParser>,
        store: Arc<S>,
        concurrency: usize,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rpc,
            parser,
            store,
            concurrency: concurrency.max(1),
            should_terminate,
        }
    }

    #[must_use]
    pub const fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Processes `from..=to` in `direction` order.
    ///
    /// Errors only when `from > to`, or when the sentinel cursor for a failed forward block
    /// cannot be written.
    pub async fn process_batch(
        &self,
        from: BlockHeight,
        to: BlockHeight,
        direction: Direction,
    ) -> Result<BatchOutcome> {
        if from > to {
            return Err(IndexerError::invalid_range(from.value(), to.value()));
        }

        let started = Instant::now();
        let tag = direction.tag();
        let heights = direction.ordered_heights(from, to);
        let mut outcome = BatchOutcome {
            stats: BatchStats::default(),
            last_processed: None,
            interrupted: false,
            halted: None,
        };

        for chunk in heights.chunks(self.concurrency) {
            if self.should_terminate.load(Ordering::Relaxed) {
                info!("[{}] Termination requested. Stopping batch #{}-#{}.", tag, from, to);
                outcome.interrupted = true;
                break;
            }

            let results = join_all(
                chunk
                    .iter()
                    .map(|&height| self.fetch_and_parse(height, direction)),
            )
            .await;

            for (&height, result) in chunk.iter().zip(results) {
                if let Err(e) = self.persist(height, result, direction, &mut outcome).await {
                    outcome.stats.elapsed = started.elapsed();
                    return Err(e);
                }
                if outcome.halted.is_some() {
                    break;
                }
            }

            if outcome.halted.is_some() {
                break;
            }
        }

        outcome.stats.elapsed = started.elapsed();
        debug!(
            "[{}] Batch #{}-#{}: {} visited, {} inserted, {} failed",
            tag,
            from,
            to,
            outcome.stats.blocks,
            outcome.stats.inserted(),
            outcome.stats.failed
        );
        Ok(outcome)
    }

    async fn fetch_and_parse(&self, height: BlockHeight, direction: Direction) -> Result<DomainBatch> {
        let historical = direction == Direction::Backward;
        let hash = self.rpc.get_block_hash(height).await?;
        let raw = self.rpc.get_raw_block(&hash, !historical).await?;

        if raw.number != height.value() {
            return Err(IndexerError::block_parse(
                height.value(),
                format!("node returned block #{} for this height", raw.number),
            ));
        }

        self.parser.parse(&raw, historical, historical)
    }

    /// Applies the failure policy to one settled result.
    async fn persist(
        &self,
        height: BlockHeight,
        result: Result<DomainBatch>,
        direction: Direction,
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let tag = direction.tag();

        let batch = match result {
            Ok(batch) => batch,
            Err(e) if e.is_systemic() => {
                warn!("[{}] Block #{} unreachable, halting batch: {}", tag, height, truncate_error(&e));
                outcome.halted = Some(e);
                return Ok(());
            }
            Err(e) => {
                outcome.stats.blocks += 1;
                outcome.stats.failed += 1;
                warn!("[{}] Block #{} failed: {}", tag, height, truncate_error(&e));

                if direction == Direction::Forward {
                    let sentinel = Cursor::unresolved(height);
                    self.store.set_forward_cursor(&sentinel).await?;
                    warn!("[{}] Block #{} marked as indexed with zero hash", tag, height);
                    outcome.last_processed = Some(sentinel);
                }
                return Ok(());
            }
        };

        match self.store.insert_batch(&batch).await {
            Ok(()) => {
                outcome.stats.blocks += 1;
                outcome.stats.record(&batch);
                outcome.last_processed = Some(Cursor::new(height, batch.hash));
            }
            Err(e) if e.is_systemic() => {
                warn!("[{}] Storage unavailable at block #{}, halting batch: {}", tag, height, truncate_error(&e));
                outcome.halted = Some(e);
            }
            Err(e) => {
                outcome.stats.blocks += 1;
                outcome.stats.insert_failed += 1;
                warn!("[{}] Insert failed for block #{}: {}", tag, height, truncate_error(&e));
                outcome.last_processed = Some(Cursor::new(height, batch.hash));
            }
        }

        Ok(())
    }
}
