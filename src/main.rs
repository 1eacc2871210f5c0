//! gitsync - reconcile one git working copy with its remote
//!
//! Run with `gitsync <path>` or `gitsync --help` for usage.

use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser};
use color_eyre::eyre::Result;
use tracing::info;

use gitsync::{APP_NAME, Config, SyncOutcome, VERSION, logging::setup_logging, report};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "Reconcile a git working copy with its remote: commit, merge, push")]
#[command(long_about = None)]
struct Cli {
    /// Path to the local working copy
    path: Option<PathBuf>,

    /// Verify commit signatures before merging or pushing
    #[arg(short = 's', long)]
    require_signature: bool,

    /// Require the signer identity to contain this text (implies -s)
    #[arg(short = 'k', long, value_name = "NAME")]
    required_signer: Option<String>,

    /// Merge unrelated histories instead of stopping
    #[arg(long)]
    allow_unrelated_histories: bool,

    /// Remote to reconcile against
    #[arg(short, long)]
    remote: Option<String>,

    /// Branch to reconcile (defaults to the checked-out branch)
    #[arg(short, long)]
    branch: Option<String>,

    /// Print the outcome as a single JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Layer CLI flags over the loaded configuration
    fn apply(&self, config: &mut Config) {
        if self.require_signature || self.required_signer.is_some() {
            config.require_signature = true;
        }
        if let Some(signer) = &self.required_signer {
            config.required_signer = Some(signer.clone());
        }
        if self.allow_unrelated_histories {
            config.allow_unrelated_histories = true;
        }
        if let Some(remote) = &self.remote {
            config.remote = remote.clone();
        }
        if let Some(branch) = &self.branch {
            config.branch = Some(branch.clone());
        }
        if self.debug {
            config.debug = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install color-eyre error hooks
    color_eyre::install()?;

    let cli = Cli::parse();

    if cli.path.is_none() && !cli.print_config {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    cli.apply(&mut config);
    config.validate()?;

    if cli.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let Some(path) = cli.path.clone() else {
        return Ok(());
    };

    setup_logging(config.debug, config.log_file.as_deref())?;
    info!("gitsync v{} reconciling {}", VERSION, path.display());

    let outcome = run(&path, &config).await;

    if cli.json {
        println!("{}", report::outcome_json(&outcome)?);
    } else {
        println!("{}", report::format_outcome(&outcome));
    }

    std::process::exit(outcome.exit_code());
}

/// Reconcile within the configured time budget
async fn run(path: &Path, config: &Config) -> SyncOutcome {
    let work = gitsync::sync_repository(path, config);
    match config.task_timeout() {
        Some(limit) => tokio::time::timeout(limit, work)
            .await
            .unwrap_or_else(|_| SyncOutcome::timed_out(path, limit)),
        None => work.await,
    }
}
