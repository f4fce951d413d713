//! Statline Ingest - box score ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use statline_common::logging::{init_logging, LogConfig};
use statline_common::types::Category;
use statline_ingest::config::{
    checkpoint_scope, parse_category_filter, CheckpointBackend, ProviderConfig, RunConfig,
};
use statline_ingest::db::{self, DbConfig};
use statline_ingest::pipeline::{CoverageIndex, IngestCoordinator, ProgressReporter, WorkEnumerator};
use statline_ingest::provider::HttpStatProvider;
use statline_ingest::store::{CheckpointStore, FileCheckpointStore, PgCheckpointStore, PgStore};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "statline-ingest")]
#[command(author, version, about = "Resumable box score ingestion")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest stat lines for every completed game that has none yet
    Run(RunArgs),

    /// Show coverage, backlog size and the saved checkpoint
    Status(ScopeArgs),

    /// Forget the saved checkpoint so the next run starts from the beginning
    ResetCheckpoint(ScopeArgs),

    /// Apply database migrations
    Migrate,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Category to ingest (nba, nfl, mlb, nhl or all)
    #[arg(short, long)]
    category: Option<String>,

    /// Maximum fetches in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Buffered records that trigger a flush
    #[arg(long)]
    batch_size: Option<usize>,

    /// Seconds since the last flush that trigger a flush
    #[arg(long)]
    flush_interval_secs: Option<u64>,

    /// Retries after the first attempt
    #[arg(long)]
    max_retries: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(long)]
    fetch_timeout_secs: Option<u64>,

    /// Process at most this many work items
    #[arg(short, long)]
    limit: Option<usize>,

    /// Ignore the saved checkpoint cursor
    #[arg(long)]
    no_resume: bool,

    /// Provider base URL (defaults to STATLINE_PROVIDER_URL)
    #[arg(long)]
    provider_url: Option<String>,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    #[command(flatten)]
    checkpoint: CheckpointArgs,
}

#[derive(Args, Debug)]
struct ScopeArgs {
    /// Category (nba, nfl, mlb, nhl or all)
    #[arg(short, long, default_value = "all")]
    category: String,

    #[command(flatten)]
    checkpoint: CheckpointArgs,
}

#[derive(Args, Debug)]
struct CheckpointArgs {
    /// Checkpoint backend: postgres or file
    #[arg(long)]
    checkpoint_backend: Option<String>,

    /// Directory for file checkpoints
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,
}

impl CheckpointArgs {
    fn backend(&self) -> Result<CheckpointBackend> {
        let mut backend = match self.checkpoint_backend {
            Some(ref kind) => CheckpointBackend::parse(kind, self.checkpoint_dir.clone())?,
            None => CheckpointBackend::from_env()?,
        };
        if let (CheckpointBackend::File { dir }, Some(over)) = (&mut backend, &self.checkpoint_dir) {
            *dir = over.clone();
        }
        Ok(backend)
    }

    fn store(&self, pool: &PgPool) -> Result<Arc<dyn CheckpointStore>> {
        let store: Arc<dyn CheckpointStore> = match self.backend()? {
            CheckpointBackend::Postgres => Arc::new(PgCheckpointStore::new(pool.clone())),
            CheckpointBackend::File { dir } => {
                info!(dir = %dir.display(), "Using file checkpoints");
                Arc::new(FileCheckpointStore::new(dir))
            },
        };
        Ok(store)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::from_env()
        .unwrap_or_default()
        .with_verbose(cli.verbose);
    let _log_guard = init_logging(&log_config)?;

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Status(args) => status(args).await,
        Command::ResetCheckpoint(args) => reset_checkpoint(args).await,
        Command::Migrate => {
            let pool = connect().await?;
            db::run_migrations(&pool).await?;
            info!("Migrations complete");
            Ok(())
        },
    }
}

async fn connect() -> Result<PgPool> {
    let config = DbConfig::from_env()?;
    let pool = db::create_pool(&config)
        .await
        .context("Failed to connect to database")?;
    db::health_check(&pool).await.context("Database health check failed")?;
    Ok(pool)
}

fn provider_config(url_override: Option<String>) -> Result<ProviderConfig> {
    let Some(url) = url_override else {
        return Ok(ProviderConfig::from_env()?);
    };

    let mut config = ProviderConfig::new(url);
    config.api_key = std::env::var("STATLINE_PROVIDER_API_KEY")
        .ok()
        .filter(|k| !k.is_empty());
    if let Ok(agent) = std::env::var("STATLINE_PROVIDER_USER_AGENT") {
        config.user_agent = agent;
    }
    config.validate()?;
    Ok(config)
}

fn run_config(args: &RunArgs) -> Result<RunConfig> {
    let mut config = RunConfig::from_env().context("Invalid STATLINE_* run settings")?;

    if let Some(ref category) = args.category {
        config.category = parse_category_filter(category)?;
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(batch_size) = args.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(secs) = args.flush_interval_secs {
        config.flush_interval = Duration::from_secs(secs);
    }
    if let Some(max_retries) = args.max_retries {
        config.max_retries = max_retries;
    }
    if let Some(secs) = args.fetch_timeout_secs {
        config.fetch_timeout = Duration::from_secs(secs);
    }
    if args.limit.is_some() {
        config.limit = args.limit;
    }
    if args.no_resume {
        config.resume = false;
    }

    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<()> {
    let config = run_config(&args)?;
    let provider = HttpStatProvider::new(provider_config(args.provider_url.clone())?, config.fetch_timeout)?;

    let pool = connect().await?;
    let store = Arc::new(PgStore::new(pool.clone()));
    let checkpoints = args.checkpoint.store(&pool)?;

    let reporter = if args.no_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::with_progress_bar()
    };
    let coordinator = IngestCoordinator::new(store.clone(), store, checkpoints, Arc::new(provider))
        .with_reporter(Arc::new(reporter));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight work");
            on_signal.cancel();
        }
    });

    let summary = coordinator.run_with_cancel(&config, cancel).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn status(args: ScopeArgs) -> Result<()> {
    let category: Option<Category> = parse_category_filter(&args.category)?;
    let scope = checkpoint_scope(category);

    let pool = connect().await?;
    let store = PgStore::new(pool.clone());
    let checkpoints = args.checkpoint.store(&pool)?;

    let checkpoint = checkpoints.load(&scope).await?;
    let coverage = CoverageIndex::load(&store, category).await?;
    let records = store.record_count(category).await?;

    let enumerator = WorkEnumerator::new(&store, RunConfig::default().page_size);
    let backlog = enumerator.enumerate(category, None, &coverage, None).await?;
    let after_cursor = match checkpoint.last_completed_work_id {
        Some(cursor) => backlog.iter().filter(|item| item.id > cursor).count(),
        None => backlog.len(),
    };

    println!("Scope:            {}", scope);
    println!("Covered games:    {}", coverage.len());
    println!("Stat records:     {}", records);
    println!("Backlog:          {} ({} after checkpoint)", backlog.len(), after_cursor);
    match checkpoint.last_completed_work_id {
        Some(id) => println!("Checkpoint:       work id {}", id),
        None => println!("Checkpoint:       none"),
    }
    println!(
        "Counters:         processed {} | ok {} | failed {} | skipped {} | not found {}",
        checkpoint.processed_count,
        checkpoint.success_count,
        checkpoint.failure_count,
        checkpoint.skipped_count,
        checkpoint.not_found_count
    );
    if let Some(saved_at) = checkpoint.saved_at {
        println!("Saved at:         {}", saved_at.to_rfc3339());
    }
    Ok(())
}

async fn reset_checkpoint(args: ScopeArgs) -> Result<()> {
    let scope = checkpoint_scope(parse_category_filter(&args.category)?);

    let pool = connect().await?;
    let checkpoints = args.checkpoint.store(&pool)?;
    checkpoints.reset(&scope).await?;

    info!(scope = %scope, "Checkpoint reset");
    println!("Checkpoint for '{}' cleared", scope);
    Ok(())
}
