use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitsaver::config::LoggingConfig;
use gitsaver::github::{GitHubClient, GitHubSettings};
use gitsaver::health::CheckResult;
use gitsaver::orchestrator::plan_backup;
use gitsaver::{run_backup, Config, HealthCheck, RunResult, Scheduler};

#[derive(Parser)]
#[command(name = "gitsaver")]
#[command(about = "Back up GitHub repositories as tarballs or full git clones")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backup now
    Run,

    /// List repositories and whether they would be backed up
    List {
        /// Only show repositories that would be backed up
        #[arg(long)]
        eligible: bool,
    },

    /// Run backups on the configured cron schedule until Ctrl+C
    Daemon,

    /// System health check and diagnostics
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging)?;
    info!("Starting gitsaver v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run => cmd_run(&config).await,
        Commands::List { eligible } => cmd_list(eligible, &config).await,
        Commands::Daemon => cmd_daemon(config).await,
        Commands::Doctor => cmd_doctor(&config).await,
    }
}

/// Initialize logging: `RUST_LOG` wins, then `--verbose`, then the config level
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry.with(fmt::layer().json()).try_init(),
        _ => registry.with(fmt::layer().compact()).try_init(),
    }
    .context("Failed to initialize logging")?;

    Ok(())
}

/// Load configuration from specified path or default location
fn load_config(config_path: Option<&std::path::Path>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load_with_env(path),
        None => Config::load_or_default(),
    }
}

/// Cancel `token` on Ctrl+C
fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupted, cancelling backup...");
                token.cancel();
            }
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
    });
}

async fn cmd_run(config: &Config) -> Result<()> {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());

    let result = run_backup(config, cancel).await?;
    print_run_summary(&result);
    Ok(())
}

async fn cmd_list(eligible_only: bool, config: &Config) -> Result<()> {
    let client = GitHubClient::authenticate(&GitHubSettings::from_config(config)).await?;
    let plan = plan_backup(&client, &config.backup_policy(), &CancellationToken::new()).await?;

    let eligible = plan.iter().filter(|p| p.skip.is_none()).count();
    println!(
        "Repositories ({} listed, {} would be backed up):",
        plan.len(),
        eligible
    );

    for planned in &plan {
        match planned.skip {
            None => println!("  ✅ {}", planned.repo.full_name()),
            Some(reason) if !eligible_only => {
                println!("  ⏭️  {} ({})", planned.repo.full_name(), reason)
            }
            Some(_) => {}
        }
    }

    Ok(())
}

async fn cmd_daemon(config: Config) -> Result<()> {
    println!("🚀 Starting gitsaver scheduler (Ctrl+C to stop)");
    let scheduler = Scheduler::new(config).context("Failed to create scheduler")?;
    scheduler.run().await
}

async fn cmd_doctor(config: &Config) -> Result<()> {
    let health = HealthCheck::run(config).await;
    print_health_report(&health);

    if !health.all_passed() {
        std::process::exit(1);
    }
    Ok(())
}

fn print_run_summary(result: &RunResult) {
    println!("\n🎉 Backup Complete!");
    println!("   📊 Repositories considered: {}", result.considered);
    println!("   ✅ Backed up: {}", result.succeeded);
    println!("   ❌ Failed: {}", result.failed);
    println!("   ⏭️  Skipped: {}", result.skipped);
    println!("   ⏱️  Duration: {:.2}s", result.duration.as_secs_f64());

    if result.has_failures() {
        println!("\n🔍 Failed Repositories:");
        for failure in &result.failures {
            println!(
                "   ❌ {}: {}",
                failure.repo,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

/// Print health check report to stdout
fn print_health_report(health: &HealthCheck) {
    fn print_check(name: &str, result: &CheckResult) {
        println!("{}:", name);
        let icon = if result.passed {
            if result.is_warning {
                "⚠️ "
            } else {
                "✅"
            }
        } else {
            "❌"
        };
        println!("  {} {}", icon, result.message);
        if let Some(details) = &result.details {
            for line in details.lines() {
                println!("     {}", line);
            }
        }
    }

    println!("🔍 gitsaver System Diagnostics");
    println!();

    for (name, result) in health.all_checks() {
        print_check(name, result);
        println!();
    }

    if health.all_passed() {
        println!("✅ All checks passed");
    } else {
        println!("❌ Some checks failed");
    }
}
