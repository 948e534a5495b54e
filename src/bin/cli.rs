//! Taxwatch CLI
//!
//! Local execution entry point: runs extractions over HTTP and inspects
//! stored runs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use futures::StreamExt;
use taxwatch::{
    config::load_config,
    error::{AppError, Result},
    events::{EventHub, EventStream},
    models::RunId,
    pipeline::RunOrchestrator,
    services::{HttpSession, ReqwestFetcher},
    storage::{LocalStorage, RunStore},
};

/// Taxwatch - property tax portal monitor
#[derive(Parser, Debug)]
#[command(name = "taxwatch", version, about = "Property tax portal monitor")]
struct Cli {
    /// Path to storage directory containing config.toml
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Execute one run and print its event stream
    Run {
        /// Profile name
        #[arg(long)]
        source: String,
    },

    /// Validate configuration files
    Validate,

    /// List recent runs of a source
    Runs {
        /// Profile name
        #[arg(long)]
        source: String,

        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// Print a run with its snapshots as JSON
    Show {
        run_id: RunId,
    },
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, default_level: &str) {
    let level = if verbose { "debug" } else { default_level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.storage_dir)?;
    init_logging(cli.verbose, &config.logging.level);

    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let storage = Arc::new(LocalStorage::new(&config.storage.root_dir));

    match cli.command {
        Command::Run { source } => {
            let hub = EventHub::new();
            let keepalive = Duration::from_secs(config.events.keepalive_secs);
            let fetcher = ReqwestFetcher::new(&config.http)?;
            let mut session =
                HttpSession::new(fetcher, Duration::from_millis(config.http.poll_interval_ms));
            let orchestrator =
                RunOrchestrator::new(Arc::new(config), storage.clone(), Arc::clone(&hub));

            let run = orchestrator.launch(&source).await?;
            let frames = EventStream::new(hub.subscribe(run.id), keepalive).into_stream();

            let print = frames.for_each(|frame| async move {
                print!("{frame}");
            });
            let (result, ()) = tokio::join!(orchestrator.execute(run, &mut session), print);

            if !result.is_success() {
                return Err(AppError::validation(
                    result
                        .error_summary
                        .unwrap_or_else(|| format!("run {} failed", result.run_id)),
                ));
            }
            log::info!(
                "Run {} committed {} snapshot(s)",
                result.run_id,
                result.snapshot_count
            );
        }

        Command::Validate => {
            log::info!("Validating configuration...");
            for profile in &config.profiles {
                println!(
                    "{}: {} source(s), {} direct item(s), {} pre-step(s), checkpoint {}",
                    profile.name,
                    profile.sources.len(),
                    profile.direct_items().map_or(0, <[String]>::len),
                    profile.pre_steps.len(),
                    profile.checkpoint_selector.as_deref().unwrap_or("none")
                );
            }
            log::info!("✓ Config OK ({} profile(s))", config.profiles.len());
        }

        Command::Runs { source, limit } => {
            let runs = storage.list_runs(&source, limit).await?;
            if runs.is_empty() {
                log::info!("No runs found for '{}'", source);
            }
            for run in runs {
                println!(
                    "{:>6}  {:<8}  {}  {}",
                    run.id,
                    run.status,
                    run.started_at.format("%Y-%m-%d %H:%M:%S"),
                    run.error_summary.unwrap_or_default()
                );
            }
        }

        Command::Show { run_id } => {
            let run = storage
                .get_run(run_id)
                .await?
                .ok_or_else(|| AppError::storage(format!("run {run_id} not found")))?;
            let snapshots = storage.snapshots_for_run(run_id).await?;
            let json = serde_json::json!({ "run": run, "snapshots": snapshots });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }

    Ok(())
}
