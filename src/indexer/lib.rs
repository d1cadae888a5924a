use std::{
    sync::{atomic::AtomicBool, Arc},
    time::Duration,
};

use eyre::{Result, WrapErr};
use tracing::{info, warn};

use crate::{
    db::PgIndexerStore,
    domain::VerifiedContract,
    errors::IndexerError,
    indexer::scheduler::{Scheduler, SchedulerConfig, SchedulerState, StartOptions},
    parser::ReefBlockParser,
    rpc::{ChainRpcProvider, SubstrateJsonRpcClient},
    store::IndexerStore,
};

const MIN_POLL_INTERVAL_MS: u64 = 100;
const MIN_BACKOFF_MS: u64 = 100;

#[derive(Debug, Clone)]
pub struct IndexingConfig {
    pub rpc_url: String,
    pub db_conn_string: String,
    pub batch_size: u32,
    pub poll_interval_ms: u64,
    pub concurrency: u32,
    /// Used only when no forward cursor exists. Zero picks a start below the head.
    pub start_block: i64,
    pub backfill: bool,
    pub backfill_target: i64,
    pub rpc_timeout_secs: u64,
    pub rpc_max_retries: u32,
    pub forward_backoff_ms: u64,
    pub backfill_backoff_ms: u64,
    pub tick_yield_ms: u64,
    pub default_lookback: i64,
    pub run_migrations: bool,
}

impl IndexingConfig {
    #[must_use]
    pub const fn builder() -> IndexingConfigBuilder {
        IndexingConfigBuilder::new()
    }

    #[must_use]
    pub const fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            forward_backoff: Duration::from_millis(self.forward_backoff_ms),
            backfill_backoff: Duration::from_millis(self.backfill_backoff_ms),
            tick_yield: Duration::from_millis(self.tick_yield_ms),
        }
    }

    #[must_use]
    pub const fn start_options(&self) -> StartOptions {
        StartOptions {
            start_block: self.start_block,
            backfill: self.backfill,
            backfill_target: self.backfill_target,
            default_lookback: self.default_lookback,
        }
    }
}

pub struct IndexingConfigBuilder {
    rpc_url: Option<String>,
    db_conn_string: Option<String>,
    batch_size: u32,
    poll_interval_ms: u64,
    concurrency: u32,
    start_block: i64,
    backfill: bool,
    backfill_target: i64,
    rpc_timeout_secs: u64,
    rpc_max_retries: u32,
    forward_backoff_ms: u64,
    backfill_backoff_ms: u64,
    tick_yield_ms: u64,
    default_lookback: i64,
    run_migrations: bool,
}

impl IndexingConfigBuilder {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rpc_url: None,
            db_conn_string: None,
            batch_size: 10,
            poll_interval_ms: 6000,
            concurrency: 5,
            start_block: 0,
            backfill: false,
            backfill_target: 1,
            rpc_timeout_secs: 30,
            rpc_max_retries: 3,
            forward_backoff_ms: 5000,
            backfill_backoff_ms: 2000,
            tick_yield_ms: 100,
            default_lookback: 1000,
            run_migrations: true,
        }
    }

    #[must_use]
    pub const fn development() -> Self {
        Self::new()
            .batch_size(5)
            .concurrency(2)
            .poll_interval_ms(3000)
            .rpc_max_retries(1)
            .default_lookback(100)
    }

    #[must_use]
    pub const fn testing() -> Self {
        Self::new()
            .batch_size(10)
            .concurrency(5)
            .poll_interval_ms(MIN_POLL_INTERVAL_MS)
            .rpc_timeout_secs(5)
            .rpc_max_retries(0)
            .forward_backoff_ms(MIN_BACKOFF_MS)
            .backfill_backoff_ms(MIN_BACKOFF_MS)
            .tick_yield_ms(10)
            .run_migrations(false)
    }

    #[must_use]
    pub const fn production() -> Self {
        Self::new()
            .batch_size(10)
            .concurrency(5)
            .poll_interval_ms(6000)
            .rpc_timeout_secs(30)
            .rpc_max_retries(3)
    }

    #[must_use]
    pub fn rpc_url<S: Into<String>>(mut self, rpc_url: S) -> Self {
        self.rpc_url = Some(rpc_url.into());
        self
    }

    #[must_use]
    pub fn db_conn_string<S: Into<String>>(mut self, db_conn_string: S) -> Self {
        self.db_conn_string = Some(db_conn_string.into());
        self
    }

    #[must_use]
    pub const fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub const fn poll_interval_ms(mut self, poll_interval_ms: u64) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }

    #[must_use]
    pub const fn concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub const fn start_block(mut self, start_block: i64) -> Self {
        self.start_block = start_block;
        self
    }

    #[must_use]
    pub const fn backfill(mut self, backfill: bool) -> Self {
        self.backfill = backfill;
        self
    }

    #[must_use]
    pub const fn backfill_target(mut self, backfill_target: i64) -> Self {
        self.backfill_target = backfill_target;
        self
    }

    #[must_use]
    pub const fn rpc_timeout_secs(mut self, rpc_timeout_secs: u64) -> Self {
        self.rpc_timeout_secs = rpc_timeout_secs;
        self
    }

    #[must_use]
    pub const fn rpc_max_retries(mut self, rpc_max_retries: u32) -> Self {
        self.rpc_max_retries = rpc_max_retries;
        self
    }

    #[must_use]
    pub const fn forward_backoff_ms(mut self, forward_backoff_ms: u64) -> Self {
        self.forward_backoff_ms = forward_backoff_ms;
        self
    }

    #[must_use]
    pub const fn backfill_backoff_ms(mut self, backfill_backoff_ms: u64) -> Self {
        self.backfill_backoff_ms = backfill_backoff_ms;
        self
    }

    #[must_use]
    pub const fn tick_yield_ms(mut self, tick_yield_ms: u64) -> Self {
        self.tick_yield_ms = tick_yield_ms;
        self
    }

    #[must_use]
    pub const fn default_lookback(mut self, default_lookback: i64) -> Self {
        self.default_lookback = default_lookback;
        self
    }

    #[must_use]
    pub const fn run_migrations(mut self, run_migrations: bool) -> Self {
        self.run_migrations = run_migrations;
        self
    }

    /// Fails only on a missing endpoint. Out-of-range values are clamped with a warning.
    pub fn build(self) -> crate::errors::Result<IndexingConfig> {
        let rpc_url = self
            .rpc_url
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| IndexerError::configuration("rpc_url", "RPC URL is required"))?;

        let db_conn_string = self
            .db_conn_string
            .filter(|conn| !conn.trim().is_empty())
            .ok_or_else(|| {
                IndexerError::configuration(
                    "db_conn_string",
                    "Database connection string is required",
                )
            })?;

        Ok(IndexingConfig {
            rpc_url,
            db_conn_string,
            batch_size: at_least("batch_size", self.batch_size, 1),
            poll_interval_ms: at_least(
                "poll_interval_ms",
                self.poll_interval_ms,
                MIN_POLL_INTERVAL_MS,
            ),
            concurrency: at_least("concurrency", self.concurrency, 1),
            start_block: at_least("start_block", self.start_block, 0),
            backfill: self.backfill,
            backfill_target: at_least("backfill_target", self.backfill_target, 0),
            rpc_timeout_secs: at_least("rpc_timeout_secs", self.rpc_timeout_secs, 1),
            rpc_max_retries: self.rpc_max_retries,
            forward_backoff_ms: at_least(
                "forward_backoff_ms",
                self.forward_backoff_ms,
                MIN_BACKOFF_MS,
            ),
            backfill_backoff_ms: at_least(
                "backfill_backoff_ms",
                self.backfill_backoff_ms,
                MIN_BACKOFF_MS,
            ),
            tick_yield_ms: self.tick_yield_ms,
            default_lookback: at_least("default_lookback", self.default_lookback, 0),
            run_migrations: self.run_migrations,
        })
    }
}

impl Default for IndexingConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn at_least<T>(parameter: &str, value: T, minimum: T) -> T
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if value < minimum {
        warn!(
            "[indexer] {} = {} is below the minimum, clamped to {}",
            parameter, value, minimum
        );
        minimum
    } else {
        value
    }
}

/// Connects to PostgreSQL and the chain node, then indexes until `should_terminate` is set.
pub async fn start_indexing_services(
    indexing_config: IndexingConfig,
    should_terminate: Arc<AtomicBool>,
) -> Result<()> {
    info!("[indexer] Connecting to DB");
    let store = Arc::new(
        PgIndexerStore::connect(indexing_config.db_conn_string.clone())
            .await
            .wrap_err("Failed to connect to the database")?,
    );

    if indexing_config.run_migrations {
        store
            .run_migrations()
            .await
            .wrap_err("Failed to run database migrations")?;
    }

    info!("[indexer] Connecting to {}", indexing_config.rpc_url);
    let rpc = Arc::new(SubstrateJsonRpcClient::new(
        indexing_config.rpc_url.clone(),
        Duration::from_secs(indexing_config.rpc_timeout_secs),
        indexing_config.rpc_max_retries,
    ));

    run_indexer(&indexing_config, rpc, store, should_terminate).await?;
    Ok(())
}

/// Seeds reference data, resolves the starting state and runs the scheduler on any backend.
pub async fn run_indexer<R, S>(
    indexing_config: &IndexingConfig,
    rpc: Arc<R>,
    store: Arc<S>,
    should_terminate: Arc<AtomicBool>,
) -> Result<SchedulerState>
where
    R: ChainRpcProvider + ?Sized,
    S: IndexerStore + ?Sized,
{
    store
        .upsert_verified_contract(&VerifiedContract::reef())
        .await
        .wrap_err("Failed to seed the REEF verified contract")?;

    let options = indexing_config.start_options();
    let state = SchedulerState::load(rpc.as_ref(), store.as_ref(), &options)
        .await
        .wrap_err("Failed to resolve the starting point")?;

    let scheduler = Scheduler::new(
        rpc,
        Arc::new(ReefBlockParser::new()),
        store,
        indexing_config.scheduler_config(),
        indexing_config.concurrency as usize,
        should_terminate,
    );

    let state = scheduler
        .run(state)
        .await
        .wrap_err("Failed to close the store")?;

    info!("[indexer] Stopped at forward cursor #{}", state.forward.cursor);
    Ok(state)
}
