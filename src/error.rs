//! Error types for gitsync
//!
//! Uses `thiserror` for ergonomic error definitions with automatic `Display` and `Error` impls.
//! Every error maps onto a [`FailureKind`], the classification recorded in a
//! repository's [`SyncOutcome`](crate::sync::SyncOutcome).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::VerificationResult;

/// Top-level error type for gitsync
#[derive(Error, Debug)]
pub enum Error {
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    #[error("{0}")]
    Sync(#[from] SyncError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Classify this error for outcome reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Git(GitError::NotARepository(_)) => FailureKind::NotARepository,
            Error::Git(_) | Error::Config(_) | Error::Io(_) | Error::Json(_) => FailureKind::Backend,
            Error::Sync(e) => e.kind(),
        }
    }
}

/// Reconciliation failures that terminate (or, for `CommitError`, annotate)
/// a single repository's run
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote '{0}' is not configured")]
    NoRemoteConfigured(String),

    #[error("Remote head for '{0}' is unknown (no fetch has completed)")]
    RemoteHeadUnknown(String),

    #[error("Merge conflict in {} file(s): {}. Resolve the conflicts manually and commit", paths.len(), paths.join(", "))]
    MergeConflict { paths: Vec<String> },

    #[error(
        "Unrelated histories between {local} and {remote}. Merge manually with \
         `git merge --allow-unrelated-histories {remote}` if that is intended"
    )]
    UnrelatedHistories { local: String, remote: String },

    #[error("Working tree has unresolved changes against the remote head: {}", paths.join(", "))]
    UnresolvedDirty { paths: Vec<String> },

    #[error("Local {local} and remote {remote} have diverged and need manual resolution")]
    Diverged { local: String, remote: String },

    #[error("Signature verification failed for {} commit(s): {}", failures.len(), describe_failures(failures))]
    SignatureVerification { failures: Vec<VerificationResult> },

    #[error("Unable to commit changes: {0}")]
    CommitError(String),

    #[error("Push rejected by remote: {0}")]
    PushRejected(String),

    #[error("Reconciliation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network operation failed: {0}")]
    NetworkFailure(String),

    #[error("Cancelled before start")]
    Cancelled,
}

impl SyncError {
    /// Classify this error for outcome reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            SyncError::NoRemoteConfigured(_) => FailureKind::NoRemoteConfigured,
            SyncError::RemoteHeadUnknown(_) => FailureKind::RemoteHeadUnknown,
            SyncError::MergeConflict { .. } => FailureKind::MergeConflict,
            SyncError::UnrelatedHistories { .. } => FailureKind::UnrelatedHistories,
            SyncError::UnresolvedDirty { .. } => FailureKind::UnresolvedDirty,
            SyncError::Diverged { .. } => FailureKind::Diverged,
            SyncError::SignatureVerification { .. } => FailureKind::SignatureVerification,
            SyncError::CommitError(_) => FailureKind::CommitError,
            SyncError::PushRejected(_) => FailureKind::PushRejected,
            SyncError::Timeout(_) => FailureKind::Timeout,
            SyncError::NetworkFailure(_) => FailureKind::NetworkFailure,
            SyncError::Cancelled => FailureKind::Cancelled,
        }
    }
}

fn describe_failures(failures: &[VerificationResult]) -> String {
    failures
        .iter()
        .map(|f| format!("{} ({})", f.commit.short_id(), f.reason))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Git backend errors
#[derive(Error, Debug)]
pub enum GitError {
    #[error("Not a git repository: {0}")]
    NotARepository(PathBuf),

    #[error("Git command failed: {command} - {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("Gitoxide error: {0}")]
    Gix(String),

    #[error("Failed to parse git output: {0}")]
    Parse(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),
}

impl GitError {
    /// Whether a retry could succeed: the remote was unreachable or the connection dropped
    pub fn is_transport(&self) -> bool {
        match self {
            GitError::CommandFailed { stderr, .. } => crate::git::parse::is_transport_failure(stderr),
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Invalid configuration value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Failed to read repository list {path}: {reason}")]
    RepoList { path: PathBuf, reason: String },
}

/// Failure classification recorded in a repository outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    NotARepository,
    NoRemoteConfigured,
    RemoteHeadUnknown,
    MergeConflict,
    UnrelatedHistories,
    UnresolvedDirty,
    Diverged,
    SignatureVerification,
    CommitError,
    PushRejected,
    Timeout,
    NetworkFailure,
    Backend,
    Cancelled,
}

impl FailureKind {
    /// Soft failures are reported but do not fail the run
    pub fn is_soft(&self) -> bool {
        matches!(self, FailureKind::CommitError)
    }

    /// Failures that need a human to look at the repository
    pub fn needs_manual_resolution(&self) -> bool {
        matches!(
            self,
            FailureKind::MergeConflict
                | FailureKind::UnrelatedHistories
                | FailureKind::Diverged
                | FailureKind::SignatureVerification
                | FailureKind::UnresolvedDirty
        )
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Result type alias using our error type
pub type Result<T> = std::result::Result<T, Error>;

impl From<gix::open::Error> for GitError {
    fn from(e: gix::open::Error) -> Self {
        GitError::Gix(e.to_string())
    }
}
