//! `git` binary adapter
//!
//! Note: gitoxide is used for opening the repository and reading its
//! configuration; every mutation (stage, commit, merge, push) goes through
//! the git CLI so hooks, signing, and credential helpers behave exactly as
//! they do for the user.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, instrument, trace};

use super::parse::{
    classify_merge_failure, is_push_rejection, parse_commit_line, parse_commit_list,
    parse_porcelain_z, parse_signature_line, summarize_stderr,
};
use super::{CommitRef, MergeOutcome, PushOutcome, SignatureStatus, StatusEntry, VcsBackend};
use crate::error::{GitError, Result};

/// `%H<sep>%ct`
const COMMIT_FORMAT: &str = "--format=%H%x1f%ct";

/// `%G?<sep>%GS<sep>%GK`
const SIGNATURE_FORMAT: &str = "--format=%G?%x1f%GS%x1f%GK";

/// Git backend over the `git` executable
#[derive(Debug, Clone)]
pub struct GitCli {
    /// Working copy root
    path: PathBuf,
    /// Git executable
    program: String,
    /// Configured remote names, read at open time
    remotes: Vec<String>,
    /// Checked-out branch at open time
    branch: Option<String>,
}

impl GitCli {
    /// Open an existing working copy
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, program: impl Into<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.is_dir() {
            return Err(GitError::NotARepository(path).into());
        }

        let repo = gix::open(&path).map_err(|e| match e {
            gix::open::Error::NotARepository { .. } => GitError::NotARepository(path.clone()),
            other => GitError::from(other),
        })?;

        // Bare repositories have no working copy to reconcile
        let workdir = repo
            .work_dir()
            .map(Path::to_path_buf)
            .ok_or_else(|| GitError::NotARepository(path.clone()))?;

        let remotes = repo
            .remote_names()
            .iter()
            .map(|name| name.to_string())
            .collect();

        let branch = match repo.head() {
            Ok(head) => match head.kind {
                gix::head::Kind::Symbolic(reference) => Some(reference.name.shorten().to_string()),
                gix::head::Kind::Unborn(full_name) => Some(full_name.shorten().to_string()),
                gix::head::Kind::Detached { .. } => None,
            },
            Err(e) => return Err(GitError::Gix(e.to_string()).into()),
        };

        debug!("Opened repository at {:?} (branch {:?})", workdir, branch);

        Ok(Self {
            path: workdir,
            program: program.into(),
            remotes,
            branch,
        })
    }

    /// Get the repository name (directory name)
    pub fn repo_name(&self) -> String {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string()
    }

    /// Run git, returning the raw output regardless of exit status
    async fn run(&self, args: &[&str]) -> Result<Output> {
        trace!("git {}", args.join(" "));

        let output = self
            .command(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(args, e))?;

        Ok(output)
    }

    /// Build a git invocation in the working copy
    ///
    /// Git runs in its own process group so a terminal interrupt reaches
    /// only the supervising process, never a commit or push halfway through.
    fn command(&self, args: &[&str]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .current_dir(&self.path)
            .args(args)
            .env("LC_ALL", "C")
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        command.process_group(0);
        command
    }

    fn spawn_error(&self, args: &[&str], e: std::io::Error) -> GitError {
        GitError::Spawn(format!("{} {}: {}", self.program, args.join(" "), e))
    }

    /// Run git and fail on a non-zero exit status
    async fn run_checked(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(command_failed(args, &output).into())
        }
    }

    /// Run a predicate command: exit 0 → true, exit 1 → false
    async fn run_predicate(&self, args: &[&str]) -> Result<bool> {
        let output = self.run(args).await?;

        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(command_failed(args, &output).into()),
        }
    }

    /// Run a command that takes a pathspec list
    ///
    /// Paths are streamed NUL-separated on stdin, so the list is not bounded
    /// by the argument size limit.
    async fn run_with_paths(&self, args: &[&str], paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }

        let mut full: Vec<&str> = args.to_vec();
        full.extend(["--pathspec-from-file=-", "--pathspec-file-nul"]);

        let mut child = self
            .command(&full)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| self.spawn_error(&full, e))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| GitError::Spawn(format!("git {}: stdin unavailable", full.join(" "))))?;
        let input = pathspec_input(paths);
        let write = async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        };

        let (written, output) = tokio::join!(write, child.wait_with_output());
        let output = output.map_err(|e| self.spawn_error(&full, e))?;

        if !output.status.success() {
            return Err(command_failed(&full, &output).into());
        }
        written.map_err(|e| self.spawn_error(&full, e))?;

        trace!("git {} ({} paths)", full.join(" "), paths.len());
        Ok(())
    }
}

/// NUL-terminated pathspecs for `--pathspec-file-nul`
fn pathspec_input(paths: &[String]) -> Vec<u8> {
    let mut input = Vec::with_capacity(paths.iter().map(|p| p.len() + 1).sum());
    for path in paths {
        input.extend_from_slice(path.as_bytes());
        input.push(0);
    }
    input
}

fn command_failed(args: &[&str], output: &Output) -> GitError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() { stdout } else { stderr };

    GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: summarize_stderr(&detail),
    }
}

#[async_trait]
impl VcsBackend for GitCli {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_remote(&self, remote: &str) -> bool {
        self.remotes.iter().any(|r| r == remote)
    }

    fn current_branch(&self) -> Option<String> {
        self.branch.clone()
    }

    #[instrument(skip(self), fields(repo = %self.repo_name()))]
    async fn fetch(&self, remote: &str) -> Result<()> {
        self.run_checked(&["fetch", "--prune", "--quiet", remote]).await?;
        debug!("Fetched {}", remote);
        Ok(())
    }

    async fn resolve(&self, rev: &str) -> Result<Option<CommitRef>> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self
            .run(&["log", "-1", COMMIT_FORMAT, spec.as_str(), "--"])
            .await?;

        if !output.status.success() {
            return Ok(None);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout.trim();
        if line.is_empty() {
            return Ok(None);
        }

        Ok(Some(parse_commit_line(line)?))
    }

    async fn status(&self) -> Result<Vec<StatusEntry>> {
        let stdout = self
            .run_checked(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])
            .await?;
        Ok(parse_porcelain_z(&stdout)?)
    }

    async fn diff_paths(&self, rev: &str) -> Result<Vec<String>> {
        let stdout = self
            .run_checked(&["diff", "--name-only", rev, "--"])
            .await?;
        Ok(stdout
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(String::from)
            .collect())
    }

    async fn stage(&self, paths: &[String]) -> Result<()> {
        self.run_with_paths(&["add"], paths).await
    }

    async fn stage_removal(&self, paths: &[String]) -> Result<()> {
        self.run_with_paths(&["rm", "--cached", "--quiet", "--ignore-unmatch"], paths)
            .await
    }

    async fn has_staged_changes(&self) -> Result<bool> {
        // `diff --quiet` exits 1 when there are differences
        Ok(!self.run_predicate(&["diff", "--cached", "--quiet"]).await?)
    }

    #[instrument(skip(self), fields(repo = %self.repo_name()))]
    async fn commit(&self, message: &str) -> Result<CommitRef> {
        self.run_checked(&["commit", "--quiet", "-m", message]).await?;

        self.resolve("HEAD")
            .await?
            .ok_or_else(|| GitError::InvalidRef("HEAD missing after commit".to_string()).into())
    }

    #[instrument(skip(self), fields(repo = %self.repo_name()))]
    async fn merge(&self, rev: &str, allow_unrelated: bool) -> Result<MergeOutcome> {
        let mut args = vec!["merge", "--no-edit"];
        if allow_unrelated {
            args.push("--allow-unrelated-histories");
        }
        args.push(rev);

        let output = self.run(&args).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        if output.status.success() {
            return Ok(MergeOutcome::Merged {
                fast_forward: stdout.contains("Fast-forward"),
            });
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        match classify_merge_failure(&stdout, &stderr) {
            Some(MergeOutcome::Conflict { paths }) => {
                // The index is authoritative for unmerged paths
                let unmerged = self
                    .run_checked(&["diff", "--name-only", "--diff-filter=U"])
                    .await
                    .map(|out| out.lines().map(String::from).collect::<Vec<_>>())
                    .unwrap_or_default();
                let paths = if unmerged.is_empty() { paths } else { unmerged };
                Ok(MergeOutcome::Conflict { paths })
            }
            Some(outcome) => Ok(outcome),
            None => Err(command_failed(&args, &output).into()),
        }
    }

    #[instrument(skip(self), fields(repo = %self.repo_name()))]
    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<PushOutcome> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let mut args = vec!["push", "--porcelain"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote);
        args.push(refspec.as_str());

        let output = self.run(&args).await?;
        if output.status.success() {
            return Ok(PushOutcome::Pushed);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        if is_push_rejection(&stderr) || is_push_rejection(&stdout) {
            Ok(PushOutcome::Rejected {
                reason: summarize_stderr(&stderr),
            })
        } else {
            Err(command_failed(&args, &output).into())
        }
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        self.run_predicate(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let args = ["merge-base", a, b];
        let output = self.run(&args).await?;

        match output.status.code() {
            Some(0) => Ok(Some(
                String::from_utf8_lossy(&output.stdout).trim().to_string(),
            )),
            Some(1) => Ok(None),
            _ => Err(command_failed(&args, &output).into()),
        }
    }

    async fn list_commits_in_range(
        &self,
        exclude: Option<&str>,
        include: &str,
    ) -> Result<Vec<CommitRef>> {
        let exclusion = exclude.map(|e| format!("^{}", e));
        let mut args = vec!["log", COMMIT_FORMAT, include];
        if let Some(ref exclusion) = exclusion {
            args.push(exclusion.as_str());
        }
        args.push("--");

        let stdout = self.run_checked(&args).await?;
        Ok(parse_commit_list(&stdout)?)
    }

    async fn verify_signature(&self, commit: &CommitRef) -> Result<SignatureStatus> {
        let stdout = self
            .run_checked(&["log", "-1", SIGNATURE_FORMAT, commit.id.as_str(), "--"])
            .await?;

        Ok(parse_signature_line(&stdout))
    }
}
