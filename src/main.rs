use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, trace, warn};

use vigil::client::{GithubClient, SecurityClient};
use vigil::config::Config;
use vigil::scan::checkpoint::{CheckpointManager, CheckpointPhase};
use vigil::scan::report::{render_summary, save_report};
use vigil::scan::state::{MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use vigil::scan::{ScanHandle, ScanRunner};

/// Scan GitHub organizations for security compliance
#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Resumable security compliance scanner for GitHub organizations", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace, -vvv for all)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan every repository in an organization
    Scan {
        /// GitHub organization to scan
        org: String,

        /// Repositories checked concurrently per batch (1-50)
        #[arg(short = 'b', long)]
        batch_size: Option<usize>,

        /// Resume the organization's saved scan instead of starting over
        #[arg(long)]
        resume: bool,

        /// Where to write the JSON report (default: security-scan-<org>.json)
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Skip writing the JSON report file
        #[arg(long)]
        no_save: bool,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Show the saved progress of an interrupted scan
    Status {
        /// GitHub organization
        org: String,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
    /// Delete an organization's saved scan
    Clean {
        /// GitHub organization
        org: String,

        /// Path to configuration file
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        2 => "trace",
        _ => "trace,hyper=debug,reqwest=debug", // -vvv shows everything including dependencies
    };

    tracing_subscriber::fmt()
        .with_env_filter(log_level)
        .with_target(cli.verbose >= 2) // Show target module for -vv and above
        .with_thread_ids(cli.verbose >= 3) // Show thread IDs for -vvv
        .with_line_number(cli.verbose >= 3) // Show line numbers for -vvv
        .init();

    debug!("vigil started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let result = match cli.command {
        Commands::Scan { org, batch_size, resume, output, no_save, config } => {
            run_scan(ScanArgs { org, batch_size, resume, output, no_save, config }).await
        }
        Commands::Status { org, config } => show_status(&org, config.as_deref()).await,
        Commands::Clean { org, config } => clean_scan(&org, config.as_deref()).await,
    };

    if let Err(e) = result {
        error!("Fatal error: {e:#}");
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

struct ScanArgs {
    org: String,
    batch_size: Option<usize>,
    resume: bool,
    output: Option<PathBuf>,
    no_save: bool,
    config: Option<PathBuf>,
}

async fn run_scan(args: ScanArgs) -> anyhow::Result<()> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&batch_size) {
            anyhow::bail!(
                "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {batch_size}"
            );
        }
        config.scan.batch_size = batch_size;
    }

    let client: Arc<dyn SecurityClient> =
        Arc::new(GithubClient::new(&config.github.api_base, config.github.token.clone())?);
    let checkpoints = CheckpointManager::new(config.checkpoint_dir(), config.codec());
    let runner = ScanRunner::new(client, checkpoints.clone(), config.scan_options());

    let (handle, active) = if args.resume {
        runner.resume(&args.org).await?
    } else {
        if checkpoints.exists(&args.org).await {
            warn!("Overwriting existing saved scan for '{}'", args.org);
            println!(
                "⚠️  A saved scan exists for '{}'; starting fresh replaces it (use --resume to continue it)",
                args.org
            );
        }
        runner.start(&args.org)
    };

    println!("🔍 Scanning organization '{}'...", args.org);

    // First Ctrl-C cancels at the next batch boundary; a second aborts.
    let cancel_handle = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupt received; finishing the current batch (Ctrl-C again to abort)");
            cancel_handle.cancel("Interrupted by operator").await;
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });

    let progress_handle = handle.clone();
    let progress_task = tokio::spawn(render_progress(progress_handle));

    let outcome = active.run().await;
    let _ = progress_task.await;
    let report = outcome?;

    println!("{}", render_summary(&report));
    if !args.no_save {
        let path = args
            .output
            .unwrap_or_else(|| PathBuf::from(format!("security-scan-{}.json", args.org)));
        save_report(&report, &path).await?;
        println!("💾 Report written to {}", path.display());
    }
    Ok(())
}

/// Live progress bar fed from scan snapshots. Ends when the scan
/// publishes a terminal status or closes its snapshot channel.
async fn render_progress(mut handle: ScanHandle) {
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    let bar = ProgressBar::new(0).with_style(style);

    loop {
        let state = handle.progress();
        bar.set_length(state.total_repos as u64);
        bar.set_position(state.processed_repos() as u64);
        bar.set_message(format!(
            "{} | compliant {} | errors {}",
            state.status, state.compliant_repos, state.error_repos
        ));
        if state.status.is_terminal() {
            break;
        }
        if handle.changed().await.is_err() {
            break;
        }
    }
    bar.finish_and_clear();
}

async fn show_status(org: &str, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let checkpoints = CheckpointManager::new(config.checkpoint_dir(), config.codec());
    let checkpoint = checkpoints.load(org).await?;

    let state = vigil::scan::ScanState::restored(
        org,
        checkpoint.batch_size,
        checkpoint.continuation_count,
        checkpoint.total_repos(),
        &checkpoint.results,
    );

    println!("📋 Saved scan for '{org}'");
    println!(
        "   Progress:      {}/{} repositories ({:.1}%)",
        state.processed_repos(),
        state.total_repos,
        state.percent_complete()
    );
    println!(
        "   Compliant:     {}   Non-compliant: {}   Errors: {}",
        state.compliant_repos, state.non_compliant_repos, state.error_repos
    );
    println!("   Batch size:    {}", checkpoint.batch_size);
    if checkpoint.continuation_count > 0 {
        println!("   Continuations: {}", checkpoint.continuation_count);
    }
    if let CheckpointPhase::Paused { resume_at } = checkpoint.phase {
        println!("   Paused until:  {resume_at}");
    }
    println!("   Saved at:      {}", checkpoint.saved_at);
    println!("\nResume with: vigil scan {org} --resume");
    Ok(())
}

async fn clean_scan(org: &str, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let checkpoints = CheckpointManager::new(config.checkpoint_dir(), config.codec());
    if checkpoints.delete(org).await? {
        println!("✅ Removed saved scan for '{org}'");
    } else {
        println!("No saved scan found for '{org}'");
    }
    Ok(())
}
