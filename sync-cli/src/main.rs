use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use multisync::{LogReporter, PlanAction, RunSummary, SyncCoordinator, TargetPlan};
use tracing::{info, warn};

mod config;
mod legacy;
mod logging;

use config::{config_path, FileConfig, Overrides, ResolvedConfig};
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "multisync")]
#[command(about = "Sync a built site to one or more storage targets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to ./multisync.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory of the build output, used by legacy options
    #[arg(long, global = true, default_value = "build")]
    build_dir: PathBuf,

    /// Print summaries and plans as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Report skipped files, phases and retries
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Re-upload every source file
    #[arg(long, global = true)]
    force: bool,

    /// Plan and report without writing to any target
    #[arg(long, global = true)]
    dry_run: bool,

    /// Concurrent transfers per target
    #[arg(long, global = true)]
    pool_size: Option<usize>,

    /// Attempts per file before giving up
    #[arg(long, global = true)]
    max_attempts: Option<u32>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync every configured target
    Run,
    /// Show what a sync would do
    Plan,
    /// Hook for the build pipeline; syncs only when run_on_build is set
    PostBuild,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(&cli)?;

    logging::init_logging(config.options.verbose, cli.log_format)?;
    for warning in &config.warnings {
        warn!("{}", warning);
    }

    execute(&cli.command, &config, cli.json).await
}

fn load_config(cli: &Cli) -> Result<ResolvedConfig> {
    let path = config_path(cli.config.clone());
    let overrides = Overrides {
        force: cli.force,
        verbose: cli.verbose,
        dry_run: cli.dry_run,
        pool_size: cli.pool_size,
        max_attempts: cli.max_attempts,
    };
    FileConfig::load(&path)?
        .resolve(&overrides, &cli.build_dir)
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

async fn execute(command: &Commands, config: &ResolvedConfig, json: bool) -> Result<ExitCode> {
    match command {
        Commands::Run => sync(config, json).await,
        Commands::Plan => plan(config, json).await,
        Commands::PostBuild => {
            if !config.options.run_on_build {
                info!("run_on_build is disabled, skipping sync");
                return Ok(ExitCode::SUCCESS);
            }
            sync(config, json).await
        }
    }
}

async fn sync(config: &ResolvedConfig, json: bool) -> Result<ExitCode> {
    let summaries = SyncCoordinator::new()
        .run(&config.sources, &config.targets, &config.options, &LogReporter)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else {
        for summary in &summaries {
            println!("{}", summary.line());
        }
    }

    Ok(ExitCode::from(exit_status(&summaries)))
}

async fn plan(config: &ResolvedConfig, json: bool) -> Result<ExitCode> {
    let plans = SyncCoordinator::new()
        .preview(&config.sources, &config.targets, &config.options)
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plans)?);
        return Ok(ExitCode::SUCCESS);
    }

    for target_plan in &plans {
        match target_plan {
            TargetPlan::Planned(plan) => {
                let summary = &plan.summary;
                println!(
                    "{}: {} to upload, {} to update, {} to delete, {} in sync ({})",
                    plan.target,
                    summary.uploads,
                    summary.updates,
                    summary.deletes,
                    summary.skips,
                    multisync::format_bytes(summary.total_bytes_to_transfer)
                );
                for item in plan.items() {
                    if item.action != PlanAction::Skip || config.options.verbose {
                        println!("  {:<6} {}", item.action.to_string(), item.path);
                    }
                }
            }
            TargetPlan::Unavailable { target, error } => {
                println!("{}: unavailable ({})", target, error);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// 0 when every target succeeded, 1 otherwise
fn exit_status(summaries: &[RunSummary]) -> u8 {
    if summaries.iter().all(RunSummary::is_success) {
        0
    } else {
        1
    }
}
