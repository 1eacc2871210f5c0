//! multisync - reconcile every repository in a list, a few at a time
//!
//! `multisync <tool> <list>` runs `<tool> <path>` once per listed path.

use std::path::{Path, PathBuf};

use clap::Parser;
use color_eyre::eyre::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use gitsync::{
    APP_NAME, Config, VERSION,
    logging::setup_logging,
    orchestrator::{InProcessTask, RepoTask, RunSummary, ToolTask, WorkerPool, read_repo_list},
    report,
};

#[derive(Parser)]
#[command(name = "multisync")]
#[command(version = VERSION)]
#[command(about = "Reconcile many git working copies in parallel")]
#[command(long_about = None)]
struct Cli {
    /// Single-repository tool to run per path (e.g. gitsync)
    tool: PathBuf,

    /// File listing one repository path per line
    list: PathBuf,

    /// Maximum repositories reconciled at the same time
    #[arg(short = 'j', long)]
    max_concurrency: Option<usize>,

    /// Per-repository timeout in seconds (0 disables)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Exit with 1 when any repository failed
    #[arg(long)]
    fail_on_error: bool,

    /// Reconcile inside this process instead of spawning the tool
    #[arg(long)]
    in_process: bool,

    /// Do not pass --json to the tool; judge by exit status only
    #[arg(long)]
    no_json: bool,

    /// Forwarded: verify commit signatures
    #[arg(short = 's', long)]
    require_signature: bool,

    /// Forwarded: required signer identity substring
    #[arg(short = 'k', long, value_name = "NAME")]
    required_signer: Option<String>,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    /// Arguments passed through to the tool before the repository path
    fn forwarded_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.require_signature {
            args.push("--require-signature".to_string());
        }
        if let Some(signer) = &self.required_signer {
            args.push("--required-signer".to_string());
            args.push(signer.clone());
        }
        args
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(max) = cli.max_concurrency {
        config.max_concurrency = max;
    }
    if let Some(secs) = cli.timeout_secs {
        config.task_timeout_secs = secs;
    }
    if cli.require_signature || cli.required_signer.is_some() {
        config.require_signature = true;
    }
    if let Some(signer) = &cli.required_signer {
        config.required_signer = Some(signer.clone());
    }
    config.debug |= cli.debug;
    config.validate()?;

    setup_logging(config.debug, config.log_file.as_deref())?;

    if !cli.in_process && !cli.tool.exists() && which(&cli.tool).is_none() {
        error!("Tool not found: {}", cli.tool.display());
        std::process::exit(1);
    }
    if !cli.list.exists() {
        error!("Repository list not found: {}", cli.list.display());
        std::process::exit(1);
    }

    let repos = match read_repo_list(&cli.list).await {
        Ok(repos) => repos,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!(
        "{} v{}: {} repositories, {} at a time",
        APP_NAME,
        VERSION,
        repos.len(),
        config.max_concurrency
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: finishing running repositories, skipping the rest");
            let _ = shutdown_tx.send(true);
        }
    });

    let summary = if cli.in_process {
        run(InProcessTask::new(config.clone()), &config, &repos, shutdown_rx).await
    } else {
        let task = ToolTask::new(&cli.tool)
            .with_args(cli.forwarded_args())
            .with_json(!cli.no_json);
        run(task, &config, &repos, shutdown_rx).await
    };

    if cli.json {
        println!("{}", report::summary_json(&summary)?);
    } else {
        println!("{}", report::format_summary(&summary));
    }

    std::process::exit(summary.exit_code(cli.fail_on_error));
}

async fn run<T: RepoTask>(
    task: T,
    config: &Config,
    repos: &[PathBuf],
    shutdown: watch::Receiver<bool>,
) -> RunSummary {
    WorkerPool::new(task)
        .with_max_concurrency(config.max_concurrency)
        .with_timeout(config.task_timeout())
        .with_shutdown(shutdown)
        .run(repos)
        .await
}

/// Resolve a bare tool name against `PATH`
fn which(tool: &Path) -> Option<PathBuf> {
    if tool.components().count() != 1 {
        return None;
    }
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(tool))
            .find(|candidate| candidate.is_file())
    })
}
