//! pg-d1-migrate CLI - resumable PostgreSQL to Cloudflare D1 migration.

use clap::{Args, Parser, Subcommand};
use pg_d1_migrate::{
    Config, MigrateError, Orchestrator, ResetScope, RunSummary, StatusReport,
    VerificationReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "pg-d1-migrate")]
#[command(about = "Resumable, checkpointed PostgreSQL to Cloudflare D1 migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file (environment variables override it)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan (or resume) checkpoints and process every eligible one
    Run {
        /// Override the table profile to migrate
        #[arg(long)]
        table: Option<String>,

        /// Override the number of source ids per checkpoint
        #[arg(long)]
        checkpoint_size: Option<i64>,

        /// Override rows per insert (clamped to the parameter limit)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Discard existing checkpoints and replan
        #[arg(long)]
        fresh: bool,
    },

    /// Record checkpoints without processing them
    Plan {
        /// Print the partition without touching the destination
        #[arg(long)]
        dry_run: bool,
    },

    /// Show checkpoint progress for the configured table
    Status,

    /// Manually recover checkpoint state
    Reset(ResetArgs),

    /// Compare source and destination row counts
    Validate,

    /// Test source and destination connectivity
    HealthCheck,
}

#[derive(Args)]
struct ResetArgs {
    /// Move in_progress checkpoints back to pending
    #[arg(long, required_unless_present = "all", conflicts_with = "all")]
    stuck: bool,

    /// Delete every checkpoint of the table (requires --force)
    #[arg(long)]
    all: bool,

    /// Confirm --all
    #[arg(long, requires = "all")]
    force: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::assemble(cli.config.as_deref(), std::env::vars())?;
    match &cli.config {
        Some(path) => info!("Loaded configuration from {:?}", path),
        None => info!("Loaded configuration from environment"),
    }

    if let Commands::Run {
        table,
        checkpoint_size,
        batch_size,
        fresh,
    } = &cli.command
    {
        if let Some(table) = table {
            config.migration.table = table.clone();
        }
        if let Some(size) = checkpoint_size {
            config.migration.checkpoint_size = *size;
        }
        if batch_size.is_some() {
            config.migration.batch_size = *batch_size;
        }
        if *fresh {
            config.migration.resume = false;
        }
    }
    config.validate()?;

    match cli.command {
        Commands::Run { .. } => {
            let cancel_token = setup_signal_handler();
            let orchestrator = Orchestrator::new(config).await?;
            let summary = orchestrator.run(&cancel_token).await?;

            if cli.output_json {
                println!("{}", summary.to_json()?);
            } else {
                print_summary(&summary);
            }

            if let Some(err) = summary.verification.as_ref().and_then(|v| v.mismatch_error()) {
                return Err(err);
            }
        }

        Commands::Plan { dry_run } => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.plan(dry_run).await?;

            if cli.output_json {
                println!("{}", report.to_json()?);
            } else {
                println!(
                    "\n{}{}: {:?}",
                    if dry_run { "[dry run] " } else { "" },
                    report.outcome.table,
                    report.outcome.action
                );
                println!(
                    "  Source: {} rows, ids {:?}..{:?}",
                    report.outcome.stats.count,
                    report.outcome.stats.min_id,
                    report.outcome.stats.max_id
                );
                println!("  Checkpoint size: {}", report.checkpoint_size);
                match report.batch_clamped_from {
                    Some(requested) => println!(
                        "  Batch size: {} rows (requested {}, clamped to the parameter limit)",
                        report.batch_size, requested
                    ),
                    None => println!("  Batch size: {} rows", report.batch_size),
                }
                println!("  Checkpoints: {}", report.ranges.len());
                for (start, end) in &report.ranges {
                    println!("    [{}, {}]", start, end);
                }
            }
        }

        Commands::Status => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.status().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
        }

        Commands::Reset(args) => {
            let scope = if args.stuck {
                ResetScope::Stuck
            } else if args.force {
                ResetScope::All
            } else {
                return Err(MigrateError::Config(
                    "reset --all deletes every checkpoint; pass --force to confirm".to_string(),
                ));
            };

            let orchestrator = Orchestrator::new(config).await?;
            let affected = orchestrator.reset(scope).await?;

            if cli.output_json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "table": orchestrator.profile().table_name(),
                        "scope": if args.stuck { "stuck" } else { "all" },
                        "affected": affected,
                    }))?
                );
            } else {
                println!(
                    "Reset {} checkpoint(s) of {}",
                    affected,
                    orchestrator.profile()
                );
            }
        }

        Commands::Validate => {
            let orchestrator = Orchestrator::new(config).await?;
            let report = orchestrator.validate().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_verification(&report);
            }

            if let Some(err) = report.mismatch_error() {
                return Err(err);
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::new(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (PostgreSQL): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Destination (D1): {} ({}ms)",
                    if result.destination_connected { "OK" } else { "FAILED" },
                    result.destination_latency_ms
                );
                if let Some(ref err) = result.destination_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                let err = match (result.source_error, result.destination_error) {
                    (Some(e), _) => MigrateError::connection(e, "health check"),
                    (None, Some(e)) => MigrateError::remote(None, e),
                    (None, None) => MigrateError::Config("Health check failed".to_string()),
                };
                return Err(err);
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun completed!");
    println!("  Run ID: {}", summary.run_id);
    println!("  Table: {}", summary.table);
    println!("  Duration: {:.2}s", summary.duration_seconds);
    println!("  Rows: {}", summary.rows_processed);
    println!("  Throughput: {} rows/sec", summary.rows_per_second);
    println!("  Batch size: {} rows", summary.batch_size);
    println!(
        "  Checkpoints: {} completed, {} failed",
        summary.checkpoints_completed, summary.checkpoints_failed
    );
    match &summary.verification {
        Some(report) => print_verification(report),
        None => println!("  Verification: skipped (checkpoints still pending)"),
    }
}

fn print_verification(report: &VerificationReport) {
    println!(
        "  Verification: source={} destination={} ({})",
        report.source_count,
        report.target_count,
        if report.matches { "match" } else { "MISMATCH" }
    );
}

fn print_status(report: &StatusReport) {
    println!("Checkpoint status for {}:", report.table);
    println!("  Pending:     {}", report.counts.pending);
    println!("  In progress: {}", report.counts.in_progress);
    println!("  Completed:   {}", report.counts.completed);
    println!("  Failed:      {}", report.counts.failed);
    println!(
        "  Eligible:    {} of {}",
        report.counts.eligible(),
        report.counts.total()
    );
    println!("  Records processed: {}", report.records_processed);
    if let Some(ref last) = report.last_completed {
        println!("  Last completed: {}", last.range_label());
    }
    if !report.eligible.is_empty() {
        println!("  Next ranges:");
        for (start, end) in &report.eligible {
            println!("    [{}, {}]", start, end);
        }
    }
    if report.counts.in_progress > 0 {
        println!("  Run `reset --stuck` to make in_progress checkpoints eligible again.");
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Cancel the returned token on SIGINT or SIGTERM. The processor stops before
/// claiming the next checkpoint.
#[cfg(unix)]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();

    for (kind, name) in [
        (SignalKind::interrupt(), "SIGINT"),
        (SignalKind::terminate(), "SIGTERM"),
    ] {
        let token = cancel_token.clone();
        tokio::spawn(async move {
            let mut stream = match signal(kind) {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("Cannot install {} handler: {}", name, e);
                    return;
                }
            };
            stream.recv().await;
            eprintln!(
                "\nReceived {}. Finishing the current checkpoint before stopping...",
                name
            );
            token.cancel();
        });
    }

    cancel_token
}

#[cfg(not(unix))]
fn setup_signal_handler() -> CancellationToken {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Cannot install Ctrl-C handler: {}", e);
            return;
        }
        eprintln!("\nReceived Ctrl-C. Finishing the current checkpoint before stopping...");
        token.cancel();
    });

    cancel_token
}
