//! # Indexer Scheduler
//!
//! Drives two progress tracks from one loop. Each [`Scheduler::tick`] runs at most one forward
//! batch toward the finalized head and at most one backfill batch toward the floor, then
//! yields briefly. All progress lives in the [`SchedulerState`] handed in and returned, and
//! the store is the only durable copy of it.

use std::{
    cmp::{max, min},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::{
    errors::Result,
    indexer::batch_processor::{BatchOutcome, BatchProcessor, BatchStats},
    parser::BlockParser,
    rpc::ChainRpcProvider,
    store::IndexerStore,
    types::{BlockHeight, Cursor, Direction},
    utils::truncate_error,
};

/// Longest uninterrupted sleep; termination is checked between slices.
const SLEEP_SLICE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    CatchingUp,
    Idle,
    Erroring,
    /// Backfill only: the floor was reached and no more work is scheduled.
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardTrack {
    /// Last height processed; the next batch starts right after it.
    pub cursor: BlockHeight,
    pub status: TrackStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillTrack {
    /// Lowest height reached so far.
    pub cursor: BlockHeight,
    /// Lowest height backfill will ever visit.
    pub floor: BlockHeight,
    pub status: TrackStatus,
}

impl BackfillTrack {
    #[must_use]
    pub fn new(cursor: BlockHeight, floor: BlockHeight) -> Self {
        let status = if cursor <= floor {
            TrackStatus::Complete
        } else {
            TrackStatus::CatchingUp
        };
        Self {
            cursor,
            floor,
            status,
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status == TrackStatus::Complete
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerState {
    pub forward: ForwardTrack,
    pub backfill: Option<BackfillTrack>,
}

/// Settings that only matter when the state is first resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOptions {
    /// Explicit start height used when no forward cursor exists. Zero means automatic.
    pub start_block: i64,
    pub backfill: bool,
    pub backfill_target: i64,
    /// How far below the head an automatic start begins.
    pub default_lookback: i64,
}

impl SchedulerState {
    /// Resolves the starting state from the persisted cursors.
    ///
    /// The chain head is only read when there is no forward cursor to resume from.
    pub async fn load<R, S>(rpc: &R, store: &S, options: &StartOptions) -> Result<Self>
    where
        R: ChainRpcProvider + ?Sized,
        S: IndexerStore + ?Sized,
    {
        let saved_forward = store.get_forward_cursor().await?;
        let head = match saved_forward {
            Some(_) => None,
            None => Some(rpc.get_finalized_head_height().await?),
        };
        let saved_backfill = if options.backfill {
            store.get_backfill_cursor().await?
        } else {
            None
        };

        Ok(Self::resolve(
            saved_forward.as_ref(),
            saved_backfill.as_ref(),
            head,
            options,
        ))
    }

    /// Pure start-point resolution.
    ///
    /// Forward resumes after a saved cursor, else starts at `min(start_block, head)`, else at
    /// `max(1, head - default_lookback)`. Backfill runs only when enabled with a start block
    /// above the floor, and starts from the saved backfill cursor or the start block.
    #[must_use]
    pub fn resolve(
        saved_forward: Option<&Cursor>,
        saved_backfill: Option<&Cursor>,
        head: Option<BlockHeight>,
        options: &StartOptions,
    ) -> Self {
        let start = match (saved_forward, head) {
            (Some(cursor), _) => cursor.height + 1,
            (None, Some(head)) if options.start_block > 0 => {
                let start = min(BlockHeight::from_trusted(options.start_block), head);
                if options.start_block > head.value() {
                    warn!(
                        "[indexer] START_BLOCK={} is above head #{}, clamped to #{}",
                        options.start_block, head, start
                    );
                }
                start
            }
            (None, Some(head)) => max(
                BlockHeight::from_trusted(1),
                head.saturating_sub(options.default_lookback),
            ),
            (None, None) => BlockHeight::from_trusted(1),
        };
        info!("[indexer] Starting forward from block #{}", start);

        let backfill = if !options.backfill {
            None
        } else if options.start_block > options.backfill_target {
            let cursor = saved_backfill.map_or(
                BlockHeight::from_trusted(options.start_block),
                |cursor| cursor.height,
            );
            let floor = BlockHeight::from_trusted(options.backfill_target);
            let track = BackfillTrack::new(cursor, floor);
            if track.is_complete() {
                info!("[backfill] Backfill already complete");
            } else {
                info!("[backfill] Backfill enabled: #{} -> #{}", track.cursor - 1, track.floor);
            }
            Some(track)
        } else {
            warn!(
                "[backfill] BACKFILL is set but START_BLOCK={} is not above BACKFILL_TARGET={}. Backfill disabled.",
                options.start_block, options.backfill_target
            );
            None
        };

        Self {
            forward: ForwardTrack {
                cursor: start.saturating_sub(1),
                status: TrackStatus::CatchingUp,
            },
            backfill,
        }
    }
}

/// The next forward range `[cursor + 1, min(cursor + batch_size, head)]`, or `None` when
/// the cursor has reached the head.
#[must_use]
pub fn next_forward_range(
    cursor: BlockHeight,
    head: BlockHeight,
    batch_size: u32,
) -> Option<(BlockHeight, BlockHeight)> {
    if cursor >= head {
        return None;
    }
    Some((cursor + 1, min(cursor + i64::from(batch_size.max(1)), head)))
}

/// The next backfill range `[max(cursor - batch_size, floor), cursor - 1]`, or `None` once
/// the cursor is at the floor.
#[must_use]
pub fn next_backfill_range(
    cursor: BlockHeight,
    floor: BlockHeight,
    batch_size: u32,
) -> Option<(BlockHeight, BlockHeight)> {
    if cursor <= floor {
        return None;
    }
    Some((max(cursor - i64::from(batch_size.max(1)), floor), cursor - 1))
}

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Stats of the forward batch, when one ran.
    pub forward: Option<BatchStats>,
    /// Stats of the backfill batch, when one ran.
    pub backfill: Option<BatchStats>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub batch_size: u32,
    pub poll_interval: Duration,
    pub forward_backoff: Duration,
    pub backfill_backoff: Duration,
    pub tick_yield: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval: Duration::from_millis(6000),
            forward_backoff: Duration::from_millis(5000),
            backfill_backoff: Duration::from_millis(2000),
            tick_yield: Duration::from_millis(100),
        }
    }
}

pub struct Scheduler<R: ?Sized, S: ?Sized> {
    rpc: Arc<R>,
    store: Arc<S>,
    processor: BatchProcessor<R, S>,
    config: SchedulerConfig,
    should_terminate: Arc<AtomicBool>,
}

impl<R, S> Scheduler<R, S>
where
    R: ChainRpcProvider + ?Sized,
    S: IndexerStore + ?Sized,
{
    pub fn new(
        rpc: Arc<R>,
        parser: Arc<dyn BlockParser>,
        store: Arc<S>,
        config: SchedulerConfig,
        concurrency: usize,
        should_terminate: Arc<AtomicBool>,
    ) -> Self {
        let processor = BatchProcessor::new(
            rpc.clone(),
            parser,
            store.clone(),
            concurrency,
            should_terminate.clone(),
        );
        Self {
            rpc,
            store,
            processor,
            config: SchedulerConfig {
                batch_size: config.batch_size.max(1),
                ..config
            },
            should_terminate,
        }
    }

    /// Ticks until termination is requested, then closes the store.
    pub async fn run(&self, mut state: SchedulerState) -> Result<SchedulerState> {
        info!(
            "[indexer] Batch size: {}, concurrency: {}, poll interval: {:?}",
            self.config.batch_size,
            self.processor.concurrency(),
            self.config.poll_interval
        );

        while !self.is_terminating() {
            let (next, report) = self.tick(state).await;
            debug!("[indexer] Tick finished: {:?}", report);
            state = next;
        }

        info!("[indexer] Process terminating.");
        self.store.close().await?;
        Ok(state)
    }

    /// One forward step, one backfill step, then the tick yield.
    pub async fn tick(&self, state: SchedulerState) -> (SchedulerState, TickReport) {
        let mut report = TickReport::default();

        let (forward, stats) = self.forward_step(state.forward).await;
        report.forward = stats;

        let backfill = match state.backfill {
            Some(track) if !self.is_terminating() => {
                let (track, stats) = self.backfill_step(track).await;
                report.backfill = stats;
                Some(track)
            }
            other => other,
        };

        self.pause(self.config.tick_yield).await;
        (SchedulerState { forward, backfill }, report)
    }

    async fn forward_step(&self, mut track: ForwardTrack) -> (ForwardTrack, Option<BatchStats>) {
        let head = match self.rpc.get_finalized_head_height().await {
            Ok(head) => head,
            Err(e) => {
                error!("[forward] Failed to read finalized head: {}", truncate_error(&e));
                track.status = TrackStatus::Erroring;
                self.pause(self.config.forward_backoff).await;
                return (track, None);
            }
        };

        let Some((from, to)) = next_forward_range(track.cursor, head, self.config.batch_size) else {
            if track.status != TrackStatus::Idle {
                info!("[forward] Caught up at #{}, waiting...", head);
            }
            track.status = TrackStatus::Idle;
            self.pause(self.config.poll_interval).await;
            return (track, None);
        };

        let outcome = match self.processor.process_batch(from, to, Direction::Forward).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[forward] Batch #{}..#{} failed: {}", from, to, truncate_error(&e));
                track.status = TrackStatus::Erroring;
                self.pause(self.config.forward_backoff).await;
                return (track, None);
            }
        };

        if let Some(reached) = &outcome.last_processed {
            if let Err(e) = self.store.set_forward_cursor(reached).await {
                error!("[forward] Failed to save cursor {}: {}", reached, truncate_error(&e));
                track.status = TrackStatus::Erroring;
                self.pause(self.config.forward_backoff).await;
                return (track, Some(outcome.stats));
            }
            track.cursor = reached.height;
        }

        track.status = self.settle(&outcome, Direction::Forward).await;
        if outcome.is_complete() {
            let behind = head - to;
            info!(
                "[forward] #{}..#{} ({} blocks) {} {}ms {}",
                from,
                to,
                outcome.stats.blocks,
                outcome.stats,
                outcome.stats.elapsed.as_millis(),
                if behind > 0 {
                    format!("{behind} blocks behind")
                } else {
                    "synced".to_string()
                }
            );
        }

        (track, Some(outcome.stats))
    }

    async fn backfill_step(&self, mut track: BackfillTrack) -> (BackfillTrack, Option<BatchStats>) {
        if track.is_complete() {
            return (track, None);
        }
        let Some((from, to)) =
            next_backfill_range(track.cursor, track.floor, self.config.batch_size)
        else {
            track.status = TrackStatus::Complete;
            return (track, None);
        };

        let outcome = match self.processor.process_batch(from, to, Direction::Backward).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[backfill] Batch #{}..#{} failed: {}", to, from, truncate_error(&e));
                track.status = TrackStatus::Erroring;
                self.pause(self.config.backfill_backoff).await;
                return (track, None);
            }
        };

        // A complete batch reaches its lower bound even when that height itself was skipped.
        let reached = if outcome.is_complete() {
            match &outcome.last_processed {
                Some(cursor) if cursor.height == from => Some(cursor.clone()),
                _ => Some(Cursor::unresolved(from)),
            }
        } else {
            outcome.last_processed.clone()
        };

        if let Some(reached) = reached {
            if let Err(e) = self.store.set_backfill_cursor(&reached).await {
                error!("[backfill] Failed to save cursor {}: {}", reached, truncate_error(&e));
                track.status = TrackStatus::Erroring;
                self.pause(self.config.backfill_backoff).await;
                return (track, Some(outcome.stats));
            }
            track.cursor = reached.height;
        }

        track.status = self.settle(&outcome, Direction::Backward).await;
        if outcome.is_complete() {
            let remaining = from - track.floor;
            info!(
                "[backfill] #{}..#{} ({} blocks) {} {}ms {}",
                to,
                from,
                outcome.stats.blocks,
                outcome.stats,
                outcome.stats.elapsed.as_millis(),
                if remaining > 0 {
                    format!("{remaining} blocks remaining")
                } else {
                    "backfill complete".to_string()
                }
            );
            if track.cursor <= track.floor {
                info!("[backfill] Backfill complete! Indexed down to block #{}", track.floor);
                track.status = TrackStatus::Complete;
            }
        }

        (track, Some(outcome.stats))
    }

    /// Status after a batch, applying the backoff when it halted.
    async fn settle(&self, outcome: &BatchOutcome, direction: Direction) -> TrackStatus {
        match &outcome.halted {
            Some(e) => {
                error!(
                    "[{}] Batch halted after {} blocks: {}",
                    direction.tag(),
                    outcome.stats.blocks,
                    truncate_error(e)
                );
                let backoff = match direction {
                    Direction::Forward => self.config.forward_backoff,
                    Direction::Backward => self.config.backfill_backoff,
                };
                self.pause(backoff).await;
                TrackStatus::Erroring
            }
            None => TrackStatus::CatchingUp,
        }
    }

    fn is_terminating(&self) -> bool {
        self.should_terminate.load(Ordering::Relaxed)
    }

    /// Sleeps for `duration`, returning early once termination is requested.
    async fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.is_terminating() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(min(deadline - now, SLEEP_SLICE)).await;
        }
    }
}
