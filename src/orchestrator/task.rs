//! Per-repository work units

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::config::Config;
use crate::sync::{SyncOutcome, sync_repository};

/// One reconciliation of one repository
///
/// Implementations never fail: every problem is captured in the returned
/// outcome.
#[async_trait]
pub trait RepoTask: Send + Sync + 'static {
    async fn run(&self, repo: &Path) -> SyncOutcome;
}

/// Runs the reconciler inside this process
#[derive(Debug, Clone)]
pub struct InProcessTask {
    config: Config,
}

impl InProcessTask {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RepoTask for InProcessTask {
    async fn run(&self, repo: &Path) -> SyncOutcome {
        sync_repository(repo, &self.config).await
    }
}

/// Runs an external single-repository tool per path
///
/// With `json` enabled the tool is asked for `--json` output and its
/// outcome is used verbatim. Otherwise, or when the output does not
/// parse, the exit status decides.
#[derive(Debug, Clone)]
pub struct ToolTask {
    tool: PathBuf,
    args: Vec<String>,
    json: bool,
}

impl ToolTask {
    pub fn new(tool: impl Into<PathBuf>) -> Self {
        Self {
            tool: tool.into(),
            args: Vec::new(),
            json: true,
        }
    }

    /// Extra arguments placed before the repository path
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Full argument list for one repository
    pub fn command_args(&self, repo: &Path) -> Vec<String> {
        let mut args = self.args.clone();
        if self.json {
            args.push("--json".to_string());
        }
        args.push(repo.display().to_string());
        args
    }
}

#[async_trait]
impl RepoTask for ToolTask {
    #[instrument(skip_all, fields(tool = %self.tool.display(), repo = %repo.display()))]
    async fn run(&self, repo: &Path) -> SyncOutcome {
        let mut command = Command::new(&self.tool);
        command
            .args(self.command_args(repo))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Ctrl-C in the terminal must not interrupt a repository mid-push
        #[cfg(unix)]
        command.process_group(0);

        let output = command.output().await;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                warn!("Failed to start tool: {}", e);
                return SyncOutcome::backend_failure(
                    repo,
                    format!("failed to run {}: {}", self.tool.display(), e),
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        if self.json {
            if let Some(outcome) = parse_outcome(&stdout) {
                return outcome;
            }
            debug!("Tool output is not an outcome, using exit status");
        }

        if output.status.success() {
            return SyncOutcome::new(repo);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("no output")
            .trim()
            .to_string();
        SyncOutcome::backend_failure(
            repo,
            format!("{} exited with {}: {}", self.tool.display(), output.status, detail),
        )
    }
}

/// Last JSON object line of the tool's stdout
fn parse_outcome(stdout: &str) -> Option<SyncOutcome> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}
