//! recallctl - personal conversation archive with hybrid retrieval
//!
//! Subcommands cover the whole pipeline: import export files, run the
//! embedding worker pool, poll a watch folder, and query the archive with
//! hybrid search or contextual windows.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use recall_embed::{Embedder, HttpEmbedder, EMBEDDING_DIM};
use recall_import::{ImportService, LicenseManager};
use recall_search::{
    strategy_by_name, ContextualRetrieval, RetrievalParams, SearchConfig, SearchService,
};
use recall_store::UnitOfWork;
use recall_worker::{
    embedding::run_queue_maintenance, EmbeddingWorkerConfig, RunFlag, WatchFolderWorker,
    WorkerPool,
};

mod config;

use config::RecallConfig;

#[derive(Parser, Debug)]
#[command(
    name = "recallctl",
    author,
    version,
    about = "Personal conversation archive with hybrid full-text + vector retrieval",
    long_about = "Import chat exports (ChatGPT, Claude, OpenWebUI, YouTube watch history), \
                  generate embeddings asynchronously, and search across your conversation \
                  history with hybrid ranking and contextual windows."
)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import a conversation export file (JSON)
    Import(ImportArgs),
    /// Hybrid search over archived messages
    Search(SearchArgs),
    /// Retrieve context windows around matches (for RAG)
    Context(ContextArgs),
    /// Run the embedding worker pool
    Worker(WorkerArgs),
    /// Run the watch-folder poller
    Watch(WatchArgs),
    /// Job queue statistics and maintenance
    Queue(QueueArgs),
    /// Archive statistics
    Stats,
}

#[derive(Parser, Debug)]
struct ImportArgs {
    /// Path to the export JSON file
    file: PathBuf,

    /// License key (falls back to RECALL_LICENSE_KEY, then settings)
    #[arg(long)]
    license_key: Option<String>,
}

#[derive(Parser, Debug)]
struct SearchArgs {
    /// Natural language query
    query: String,

    /// Named strategy (baseline, fts_heavy, vector_heavy, high_recall,
    /// recency_boost, recency_exact, fts_only, vector_only)
    #[arg(long)]
    strategy: Option<String>,

    #[arg(long)]
    limit: Option<usize>,

    /// Restrict to one conversation
    #[arg(long)]
    conversation: Option<Uuid>,
}

#[derive(Parser, Debug)]
struct ContextArgs {
    /// Natural language query
    query: String,

    #[arg(long, default_value = "8")]
    top_k: usize,

    /// Messages before/after each match
    #[arg(long, default_value = "3")]
    window: usize,

    /// Token budget per window
    #[arg(long)]
    max_tokens: Option<usize>,

    /// Omit [CTX_START]/[MATCH_START] markers
    #[arg(long)]
    no_markers: bool,
}

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Number of worker tasks
    #[arg(long, short = 'w')]
    workers: Option<usize>,

    #[arg(long)]
    batch_size: Option<usize>,

    /// Idle poll interval in seconds
    #[arg(long, default_value = "2")]
    poll_interval: u64,

    #[arg(long, default_value = "3")]
    max_attempts: i32,
}

#[derive(Parser, Debug)]
struct WatchArgs {
    /// Configure and enable this folder before starting the poller
    #[arg(long)]
    folder: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct QueueArgs {
    #[command(subcommand)]
    command: QueueCommands,
}

#[derive(Subcommand, Debug)]
enum QueueCommands {
    /// Show job counts by status and pending backlog by kind
    Stats,
    /// Reclaim stuck jobs and prune old completed ones
    Cleanup {
        #[arg(long, default_value = "2")]
        stuck_hours: i64,
        #[arg(long, default_value = "7")]
        keep_days: i64,
    },
}

fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .compact()
        .init();
}

async fn connect() -> Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    recall_store::connect(&database_url).await
}

/// Embedding oracle: RECALL_EMBED_URL / RECALL_EMBED_MODEL override the
/// config file; RECALL_EMBED_API_KEY stays environment-only.
fn build_embedder(config: &RecallConfig) -> Result<Arc<dyn Embedder>> {
    let base_url = std::env::var("RECALL_EMBED_URL")
        .unwrap_or_else(|_| config.embedding.endpoint.clone());
    let api_key = std::env::var("RECALL_EMBED_API_KEY").ok();
    let model =
        std::env::var("RECALL_EMBED_MODEL").unwrap_or_else(|_| config.embedding.model.clone());
    Ok(Arc::new(HttpEmbedder::new(
        base_url,
        api_key,
        model,
        EMBEDDING_DIM,
    )?))
}

/// Wire SIGINT/SIGTERM to the shared run flag.
fn install_signal_handlers(running: RunFlag) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {},
                _ = sigterm.recv() => {},
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        running.stop();
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    dotenvy::dotenv().ok();

    let config = RecallConfig::load();

    match cli.command {
        Commands::Import(args) => cmd_import(args).await,
        Commands::Search(args) => cmd_search(args, &config).await,
        Commands::Context(args) => cmd_context(args, &config).await,
        Commands::Worker(args) => cmd_worker(args, &config).await,
        Commands::Watch(args) => cmd_watch(args).await,
        Commands::Queue(args) => cmd_queue(args).await,
        Commands::Stats => cmd_stats().await,
    }
}

async fn cmd_import(args: ImportArgs) -> Result<()> {
    let pool = connect().await?;
    let raw = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let data: serde_json::Value = serde_json::from_str(&raw).context("invalid JSON file")?;

    let license = LicenseManager::load(&pool, args.license_key).await?;
    let service = ImportService::new(pool, Arc::new(license));
    let result = service.import_json(&data).await?;

    for note in &result.notes {
        println!("{note}");
    }
    for error in &result.errors {
        eprintln!("error: {error}");
    }
    println!("{result}");
    Ok(())
}

async fn cmd_search(args: SearchArgs, config: &RecallConfig) -> Result<()> {
    let strategy_name = args
        .strategy
        .as_deref()
        .unwrap_or(&config.search.default_strategy);
    let strategy = strategy_by_name(strategy_name)?;
    let limit = args.limit.unwrap_or(config.search.default_limit);

    let pool = connect().await?;
    let embedder = build_embedder(config)?;
    let service = SearchService::new(pool, embedder, SearchConfig::default());

    let results = service
        .run_strategy(strategy, &args.query, Some(limit), args.conversation)
        .await?;

    if results.is_empty() {
        println!("no matches found");
        return Ok(());
    }
    for result in results {
        println!(
            "[{:.3}] {} | {} | {}\n{}\n",
            result.combined_score,
            result.created_at.format("%Y-%m-%d %H:%M"),
            result.conversation_title,
            result.role,
            result.content
        );
    }
    Ok(())
}

async fn cmd_context(args: ContextArgs, config: &RecallConfig) -> Result<()> {
    let pool = connect().await?;
    let embedder = build_embedder(config)?;
    let search = Arc::new(SearchService::new(
        pool.clone(),
        embedder,
        SearchConfig::default(),
    ));
    let retrieval = ContextualRetrieval::new(pool, search);

    let params = RetrievalParams {
        top_k_windows: args.top_k,
        context_window: args.window,
        max_tokens: args.max_tokens,
        include_markers: !args.no_markers,
        ..RetrievalParams::default()
    };
    let windows = retrieval.retrieve_with_context(&args.query, &params).await?;

    if windows.is_empty() {
        println!("no matches found");
        return Ok(());
    }
    for window in windows {
        println!(
            "=== {} (score {:.3}, {} messages) ===\n{}\n",
            window.metadata.conversation_title,
            window.metadata.aggregated_score,
            window.metadata.window_size,
            window.content
        );
    }
    Ok(())
}

async fn cmd_worker(args: WorkerArgs, config: &RecallConfig) -> Result<()> {
    let pool = connect().await?;
    let embedder = build_embedder(config)?;

    // Reclaim anything a previous crash left in `running`.
    run_queue_maintenance(&pool, 2, 7).await?;

    let running = RunFlag::new();
    install_signal_handlers(running.clone());

    let worker_config = EmbeddingWorkerConfig {
        batch_size: args.batch_size.unwrap_or(config.worker.batch_size),
        poll_interval: Duration::from_secs(args.poll_interval),
        max_attempts: args.max_attempts,
        ..EmbeddingWorkerConfig::default()
    };
    let workers = args.workers.unwrap_or(config.worker.workers);
    let worker_pool = WorkerPool::spawn(workers, pool, embedder, worker_config, running.clone());

    // Block until a signal flips the flag, then give workers a few seconds.
    while running.is_running() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    worker_pool.shutdown(Duration::from_secs(5)).await;
    Ok(())
}

async fn cmd_watch(args: WatchArgs) -> Result<()> {
    let pool = connect().await?;

    if let Some(folder) = &args.folder {
        recall_worker::watch::validate_folder(folder)?;
        let mut uow = UnitOfWork::begin(&pool).await?;
        uow.settings()
            .put(
                recall_worker::watch::SETTING_WATCH_PATH,
                &folder.display().to_string(),
                "import",
            )
            .await?;
        uow.settings()
            .put(recall_worker::watch::SETTING_WATCH_ENABLED, "true", "import")
            .await?;
        uow.commit().await?;
        info!(folder = %folder.display(), "watch folder configured");
    }

    let license = LicenseManager::load(&pool, None).await?;
    let import = Arc::new(ImportService::new(pool.clone(), Arc::new(license)));

    let running = RunFlag::new();
    install_signal_handlers(running.clone());

    let worker = WatchFolderWorker::new(pool, import, running);
    worker.run().await;
    Ok(())
}

async fn cmd_queue(args: QueueArgs) -> Result<()> {
    let pool = connect().await?;
    match args.command {
        QueueCommands::Stats => {
            let mut uow = UnitOfWork::begin(&pool).await?;
            let by_status = uow.jobs().status_counts().await?;
            let pending = uow.jobs().pending_by_kind().await?;
            uow.commit().await?;

            println!("jobs by status:");
            for (status, count) in by_status {
                println!("  {status}: {count}");
            }
            if !pending.is_empty() {
                println!("pending by kind:");
                for (kind, count) in pending {
                    println!("  {kind}: {count}");
                }
            }
        }
        QueueCommands::Cleanup {
            stuck_hours,
            keep_days,
        } => {
            let (reclaimed, pruned) = run_queue_maintenance(&pool, stuck_hours, keep_days).await?;
            println!("reclaimed {reclaimed} stuck jobs, pruned {pruned} completed jobs");
        }
    }
    Ok(())
}

async fn cmd_stats() -> Result<()> {
    let pool = connect().await?;
    let mut uow = UnitOfWork::begin(&pool).await?;
    let conversations = uow.conversations().count().await?;
    let messages = uow.messages().count().await?;
    let (total, embedded, stale) = uow.embeddings().coverage().await?;
    uow.commit().await?;

    println!("conversations: {conversations}");
    println!("messages: {messages}");
    let coverage = if total > 0 {
        embedded as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    println!("embeddings: {embedded}/{total} ({coverage:.1}% coverage, {stale} stale)");
    Ok(())
}
