use clap::Parser;
use eyre::{Context, Result};
use reef_chain_indexer::indexer::lib::{start_indexing_services, IndexingConfig};
use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Continuous forward + backfill block indexer for Reef Chain
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Chain node JSON-RPC endpoint
    #[arg(long, env = "RPC_URL", default_value = "https://rpc.reefscan.info")]
    rpc_url: String,

    /// PostgreSQL connection string
    #[arg(long, env = "DB_CONNECTION_STRING")]
    db_connection_string: String,

    /// Blocks per batch
    #[arg(long, env = "BATCH_SIZE", default_value_t = 10)]
    batch_size: u32,

    /// Wait between head polls once synced
    #[arg(long, env = "POLL_INTERVAL_MS", default_value_t = 6000)]
    poll_interval_ms: u64,

    /// Blocks fetched concurrently inside a batch
    #[arg(long, env = "CONCURRENCY", default_value_t = 5)]
    concurrency: u32,

    /// First block when no forward cursor exists (0 = near the head)
    #[arg(long, env = "START_BLOCK", default_value_t = 0)]
    start_block: i64,

    /// Walk history down from START_BLOCK to BACKFILL_TARGET
    #[arg(long, env = "BACKFILL", default_value_t = false, action = clap::ArgAction::Set)]
    backfill: bool,

    #[arg(long, env = "BACKFILL_TARGET", default_value_t = 1)]
    backfill_target: i64,

    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value_t = 30)]
    rpc_timeout_secs: u64,

    #[arg(long, env = "RPC_MAX_RETRIES", default_value_t = 3)]
    rpc_max_retries: u32,

    #[arg(long, env = "FORWARD_BACKOFF_MS", default_value_t = 5000)]
    forward_backoff_ms: u64,

    #[arg(long, env = "BACKFILL_BACKOFF_MS", default_value_t = 2000)]
    backfill_backoff_ms: u64,

    #[arg(long, env = "TICK_YIELD_MS", default_value_t = 100)]
    tick_yield_ms: u64,

    /// Blocks below the head to start from when nothing else says where
    #[arg(long, env = "DEFAULT_LOOKBACK", default_value_t = 1000)]
    default_lookback: i64,

    #[arg(long, env = "RUN_MIGRATIONS", default_value_t = true, action = clap::ArgAction::Set)]
    run_migrations: bool,
}

impl Cli {
    fn into_config(self) -> Result<IndexingConfig> {
        IndexingConfig::builder()
            .rpc_url(self.rpc_url)
            .db_conn_string(self.db_connection_string)
            .batch_size(self.batch_size)
            .poll_interval_ms(self.poll_interval_ms)
            .concurrency(self.concurrency)
            .start_block(self.start_block)
            .backfill(self.backfill)
            .backfill_target(self.backfill_target)
            .rpc_timeout_secs(self.rpc_timeout_secs)
            .rpc_max_retries(self.rpc_max_retries)
            .forward_backoff_ms(self.forward_backoff_ms)
            .backfill_backoff_ms(self.backfill_backoff_ms)
            .tick_yield_ms(self.tick_yield_ms)
            .default_lookback(self.default_lookback)
            .run_migrations(self.run_migrations)
            .build()
            .context("Invalid indexer configuration")
    }
}

#[tokio::main]
pub async fn main() -> Result<()> {
    if env::var("IS_DEV").is_ok_and(|v| v.parse().unwrap_or(false)) {
        dotenvy::dotenv()?;
    }

    // Initialize tracing subscriber
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let indexing_config = Cli::parse().into_config()?;
    info!(
        "[indexer] Backfill config: BACKFILL={}, START_BLOCK={}, BACKFILL_TARGET={}",
        indexing_config.backfill, indexing_config.start_block, indexing_config.backfill_target
    );

    let should_terminate = Arc::new(AtomicBool::new(false));
    setup_ctrlc_handler(Arc::clone(&should_terminate))?;

    start_indexing_services(indexing_config, should_terminate).await?;

    info!("[indexer] Shutdown complete");
    Ok(())
}

fn setup_ctrlc_handler(should_terminate: Arc<AtomicBool>) -> Result<()> {
    ctrlc::set_handler(move || {
        info!("Received termination signal");
        info!("Waiting for the current chunk to finish...");
        should_terminate.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")
}
