//! fleetschedd: the fleetsched daemon.
//!
//! Loads cluster inventories into the capacity cache and runs the
//! scheduler against them:
//! - `run` keeps the cache expiry loop and the statistics reporter alive
//! - `schedule` places one batch of instances and prints the result
//! - `stats` prints a single capacity report
//!
//! # Usage
//!
//! ```text
//! fleetschedd run --config fleetsched.toml --inventory clusters.json
//! fleetschedd schedule --inventory clusters.json --request batch.json --dry-run
//! ```

mod inventory;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use fleetsched_cache::CapacityCache;
use fleetsched_core::{InstanceRequest, SchedulerConfig};
use fleetsched_scheduler::{Scheduler, StaticCatalog, StatisticsReporter};

use crate::inventory::Inventory;

#[derive(Parser)]
#[command(name = "fleetschedd", about = "Multi-cluster instance scheduler")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve from a loaded inventory until interrupted.
    Run {
        /// Scheduler configuration (TOML).
        #[arg(long)]
        config: Option<PathBuf>,

        /// Recorded cluster watch events (JSON).
        #[arg(long)]
        inventory: PathBuf,
    },
    /// Place a batch of instances.
    Schedule {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        inventory: PathBuf,

        /// Instance requests (JSON array).
        #[arg(long)]
        request: PathBuf,

        /// Release the reservations after placement.
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a capacity report.
    Stats {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        inventory: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, inventory } => run(config.as_deref(), &inventory).await,
        Command::Schedule {
            config,
            inventory,
            request,
            dry_run,
        } => schedule(config.as_deref(), &inventory, &request, dry_run).await,
        Command::Stats { config, inventory } => stats(config.as_deref(), &inventory).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,fleetsched=debug,fleetschedd=debug"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SchedulerConfig> {
    match path {
        Some(path) => SchedulerConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(SchedulerConfig::default()),
    }
}

/// Build a scheduler over a cache filled from `inventory`.
async fn bootstrap(config: Option<&Path>, inventory: &Path) -> anyhow::Result<Arc<Scheduler>> {
    let config = load_config(config)?;
    let cache = Arc::new(CapacityCache::new(
        config.assume_ttl(),
        config.cleanup_period(),
    ));
    Inventory::from_file(inventory)?
        .load(&config, cache.clone())
        .await?;
    cache.dump().await;
    Ok(Arc::new(Scheduler::new(cache, config)))
}

async fn run(config: Option<&Path>, inventory: &Path) -> anyhow::Result<()> {
    info!("fleetsched daemon starting");
    let scheduler = bootstrap(config, inventory).await?;
    let catalog = Arc::new(StaticCatalog::from_config(scheduler.config()));

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let cache_shutdown = shutdown_rx.clone();
    let stats_shutdown = shutdown_rx;

    // ── Start background tasks ─────────────────────────────────

    let cache = scheduler.cache().clone();
    let cache_handle = tokio::spawn(async move {
        cache.run(cache_shutdown).await;
    });

    let reporter = StatisticsReporter::new(scheduler.clone(), catalog);
    let stats_handle = tokio::spawn(async move {
        reporter.run(stats_shutdown).await;
    });

    tokio::signal::ctrl_c()
        .await
        .context("installing ctrl-c handler")?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = cache_handle.await;
    let _ = stats_handle.await;

    info!("fleetsched daemon stopped");
    Ok(())
}

async fn schedule(
    config: Option<&Path>,
    inventory: &Path,
    request: &Path,
    dry_run: bool,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(request)
        .with_context(|| format!("reading request {}", request.display()))?;
    let instances: Vec<InstanceRequest> = serde_json::from_str(&content)
        .with_context(|| format!("parsing request {}", request.display()))?;

    let scheduler = bootstrap(config, inventory).await?;
    let response = scheduler.schedule(&instances, dry_run).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn stats(config: Option<&Path>, inventory: &Path) -> anyhow::Result<()> {
    let scheduler = bootstrap(config, inventory).await?;
    let catalog = StaticCatalog::from_config(scheduler.config());
    let report = scheduler.statistics(&catalog).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
