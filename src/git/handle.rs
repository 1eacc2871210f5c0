//! Repository handle
//!
//! One working copy and its single tracked remote. Caches the local head
//! and the remote head; the remote head is only trusted right after a
//! fetch (`is_remote_fresh`), before that it is whatever the
//! remote-tracking ref last recorded.

use std::path::Path;

use tracing::{debug, instrument};

use super::{CommitRef, GitCli, VcsBackend};
use crate::config::Config;
use crate::error::{Error, GitError, Result, SyncError};

/// Handle over one working copy
pub struct RepositoryHandle<B = GitCli> {
    backend: B,
    remote: String,
    branch: String,
    local_head: Option<CommitRef>,
    remote_head: Option<CommitRef>,
    fetched: bool,
}

impl RepositoryHandle<GitCli> {
    /// Open a working copy with the git CLI backend
    pub async fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let backend = GitCli::open(path, config.git_program.clone())?;
        Self::with_backend(backend, &config.remote, config.branch.clone()).await
    }
}

impl<B: VcsBackend> RepositoryHandle<B> {
    /// Wrap an already-open backend
    ///
    /// Fails with `NoRemoteConfigured` when `remote` is absent. `branch`
    /// defaults to the checked-out branch.
    #[instrument(skip(backend), fields(path = %backend.path().display()))]
    pub async fn with_backend(backend: B, remote: &str, branch: Option<String>) -> Result<Self> {
        if !backend.has_remote(remote) {
            return Err(SyncError::NoRemoteConfigured(remote.to_string()).into());
        }

        let branch = branch.or_else(|| backend.current_branch()).ok_or_else(|| {
            GitError::InvalidRef("HEAD is detached; configure a branch to reconcile".to_string())
        })?;

        let local_head = backend.resolve("HEAD").await?;
        let remote_head = backend.resolve(&tracking_ref(remote, &branch)).await?;

        debug!(
            "Opened {} on {} (local {:?}, cached remote {:?})",
            backend.path().display(),
            branch,
            local_head.as_ref().map(CommitRef::short_id),
            remote_head.as_ref().map(CommitRef::short_id),
        );

        Ok(Self {
            backend,
            remote: remote.to_string(),
            branch,
            local_head,
            remote_head,
            fetched: false,
        })
    }

    pub fn path(&self) -> &Path {
        self.backend.path()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Full remote-tracking ref, e.g. `refs/remotes/origin/main`
    pub fn tracking_ref(&self) -> String {
        tracking_ref(&self.remote, &self.branch)
    }

    /// Short remote branch name, e.g. `origin/main`
    pub fn remote_branch(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }

    /// Fetch the remote and refresh both cached heads
    ///
    /// Network failures surface as `SyncError::NetworkFailure`.
    pub async fn fetch_remote(&mut self) -> Result<()> {
        self.backend
            .fetch(&self.remote)
            .await
            .map_err(|e| match e {
                Error::Git(git) => Error::Sync(SyncError::NetworkFailure(git.to_string())),
                other => other,
            })?;

        self.fetched = true;
        self.remote_head = self.backend.resolve(&self.tracking_ref()).await?;
        self.refresh_local_head().await?;
        Ok(())
    }

    /// Re-read the local head after a commit or merge
    pub async fn refresh_local_head(&mut self) -> Result<Option<&CommitRef>> {
        self.local_head = self.backend.resolve("HEAD").await?;
        Ok(self.local_head.as_ref())
    }

    /// Cached local head, `None` for an unborn branch
    pub fn local_head(&self) -> Option<&CommitRef> {
        self.local_head.as_ref()
    }

    /// Cached remote head
    ///
    /// `Ok(None)` after a fetch means the branch does not exist on the
    /// remote yet. Before any fetch, only a previously recorded
    /// remote-tracking ref is available.
    pub fn remote_head(&self) -> Result<Option<&CommitRef>> {
        if !self.fetched && self.remote_head.is_none() {
            return Err(SyncError::RemoteHeadUnknown(self.remote_branch()).into());
        }
        Ok(self.remote_head.as_ref())
    }

    /// Whether the remote head came from a fetch in this run
    pub fn is_remote_fresh(&self) -> bool {
        self.fetched
    }

    /// Record that the remote now holds the local head
    pub(crate) fn record_push(&mut self) {
        self.remote_head = self.local_head.clone();
    }

    /// Whether the working tree has changes
    pub async fn is_dirty(&self, include_untracked: bool) -> Result<bool> {
        let status = self.backend.status().await?;
        Ok(status
            .iter()
            .filter(|e| !e.is_ignored())
            .any(|e| include_untracked || !e.is_untracked()))
    }
}

fn tracking_ref(remote: &str, branch: &str) -> String {
    format!("refs/remotes/{}/{}", remote, branch)
}
