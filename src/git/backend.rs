//! Version-control capability set
//!
//! The reconciler never talks to git directly. It drives a [`VcsBackend`],
//! the set of primitives it needs (fetch, diff, stage, commit, merge, push,
//! commit listing, signature checks). [`GitCli`](super::GitCli) is the
//! production adapter; tests use scripted in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A commit as seen by the engine
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CommitRef {
    /// Full object id
    pub id: String,
    /// Committer timestamp (unix seconds)
    pub timestamp: i64,
    /// Signer identity, filled in by a signature check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer: Option<String>,
}

impl CommitRef {
    /// Create a commit reference without signer information
    pub fn new(id: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: id.into(),
            timestamp,
            signer: None,
        }
    }

    /// Abbreviated id for display
    pub fn short_id(&self) -> &str {
        if self.id.len() > 8 { &self.id[..8] } else { &self.id }
    }

    /// Committer time as a UTC datetime
    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.timestamp, 0)
    }
}

impl std::fmt::Display for CommitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_id())
    }
}

/// One line of `git status --porcelain`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Index (staged) status column
    pub index: char,
    /// Working tree status column
    pub worktree: char,
    /// Repository-relative path
    pub path: String,
    /// Source path of a rename or copy
    pub orig_path: Option<String>,
}

impl StatusEntry {
    pub fn new(index: char, worktree: char, path: impl Into<String>) -> Self {
        Self {
            index,
            worktree,
            path: path.into(),
            orig_path: None,
        }
    }

    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }

    pub fn is_ignored(&self) -> bool {
        self.index == '!' && self.worktree == '!'
    }

    /// Unmerged paths left behind by a conflicted merge
    pub fn is_unmerged(&self) -> bool {
        matches!(
            (self.index, self.worktree),
            ('U', _) | (_, 'U') | ('A', 'A') | ('D', 'D')
        )
    }
}

/// Result of merging a revision into the current branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Merge completed (possibly as a fast-forward)
    Merged { fast_forward: bool },
    /// Content conflicts; the merge is left in progress for manual resolution
    Conflict { paths: Vec<String> },
    /// The histories share no common ancestor
    UnrelatedHistories,
    /// Local changes would be overwritten; nothing was touched
    Blocked { paths: Vec<String> },
}

/// Result of pushing the current branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// Remote refused the update (it moved ahead concurrently)
    Rejected { reason: String },
}

/// Cryptographic signature state of one commit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureStatus {
    Good { signer: String },
    Unsigned,
    Invalid { reason: String },
}

/// Capability set the reconciler needs from a version-control backend
#[async_trait]
pub trait VcsBackend: Send + Sync {
    /// Working copy root
    fn path(&self) -> &Path;

    /// Whether a remote with this name is configured
    fn has_remote(&self, remote: &str) -> bool;

    /// Checked-out branch, `None` when HEAD is detached
    fn current_branch(&self) -> Option<String>;

    /// Fetch from the remote, refreshing its remote-tracking refs
    async fn fetch(&self, remote: &str) -> Result<()>;

    /// Resolve a revision, `None` if it does not exist (e.g. unborn HEAD)
    async fn resolve(&self, rev: &str) -> Result<Option<CommitRef>>;

    /// Working tree and index status, untracked files included
    async fn status(&self) -> Result<Vec<StatusEntry>>;

    /// Tracked paths whose working tree content differs from `rev`
    async fn diff_paths(&self, rev: &str) -> Result<Vec<String>>;

    /// Stage paths for inclusion in the next commit
    async fn stage(&self, paths: &[String]) -> Result<()>;

    /// Stage removal of paths from the index
    async fn stage_removal(&self, paths: &[String]) -> Result<()>;

    /// Whether the index differs from HEAD
    async fn has_staged_changes(&self) -> Result<bool>;

    /// Commit the index
    async fn commit(&self, message: &str) -> Result<CommitRef>;

    /// Merge a revision into the current branch
    async fn merge(&self, rev: &str, allow_unrelated: bool) -> Result<MergeOutcome>;

    /// Push the branch to the remote
    async fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<PushOutcome>;

    /// Whether `ancestor` is reachable from `descendant`
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// Best common ancestor, `None` for unrelated histories
    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>>;

    /// Commits reachable from `include` but not from `exclude`, newest first
    async fn list_commits_in_range(
        &self,
        exclude: Option<&str>,
        include: &str,
    ) -> Result<Vec<CommitRef>>;

    /// Check the signature of one commit
    async fn verify_signature(&self, commit: &CommitRef) -> Result<SignatureStatus>;
}
