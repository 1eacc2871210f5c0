//! Reconciliation results
//!
//! `SyncOutcome` is the only artifact kept per repository once its
//! reconciliation ends; everything else is recomputed per pass.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, FailureKind, GitError, SyncError};
use crate::git::CommitRef;

/// Relationship between local and remote heads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncDecision {
    InSync,
    LocalBehind,
    LocalAhead,
    Diverged,
}

impl std::fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Terminal state of one repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FinalState {
    Reconciled,
    Failed(FailureKind),
}

/// Failure details kept for manual remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: FailureKind,
    pub message: String,
    /// Affected paths (conflicts, dirty files)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
    /// Affected commits, with the reason each one failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commits: Vec<String>,
}

impl From<&Error> for SyncFailure {
    fn from(error: &Error) -> Self {
        let (paths, commits) = match error {
            Error::Sync(SyncError::MergeConflict { paths })
            | Error::Sync(SyncError::UnresolvedDirty { paths }) => (paths.clone(), Vec::new()),
            Error::Sync(SyncError::SignatureVerification { failures }) => (
                Vec::new(),
                failures
                    .iter()
                    .map(|f| format!("{}: {}", f.commit.id, f.reason))
                    .collect(),
            ),
            Error::Sync(SyncError::UnrelatedHistories { local, remote })
            | Error::Sync(SyncError::Diverged { local, remote }) => {
                (Vec::new(), vec![local.clone(), remote.clone()])
            }
            Error::Git(GitError::NotARepository(path)) => {
                (vec![path.display().to_string()], Vec::new())
            }
            _ => (Vec::new(), Vec::new()),
        };

        Self {
            kind: error.kind(),
            message: error.to_string(),
            paths,
            commits,
        }
    }
}

/// Per-repository summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOutcome {
    /// Working copy path as given
    pub repo: PathBuf,
    /// Decision reached after the fetch, if the run got that far
    pub decision: Option<SyncDecision>,
    pub state: FinalState,
    /// Files committed, by category
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    /// Last commit created by this run
    pub commit: Option<CommitRef>,
    /// Local head at the end of the run
    pub head: Option<CommitRef>,
    pub merged: bool,
    pub pushed: bool,
    pub failure: Option<SyncFailure>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl SyncOutcome {
    /// A fresh, not yet finished outcome
    pub fn new(repo: impl AsRef<Path>) -> Self {
        Self {
            repo: repo.as_ref().to_path_buf(),
            decision: None,
            state: FinalState::Reconciled,
            added: 0,
            modified: 0,
            deleted: 0,
            commit: None,
            head: None,
            merged: false,
            pushed: false,
            failure: None,
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    /// Outcome for a repository that failed before reconciliation started
    pub fn from_error(repo: impl AsRef<Path>, error: &Error) -> Self {
        let mut outcome = Self::new(repo);
        outcome.fail(error);
        outcome
    }

    /// Outcome for a repository whose task exceeded its time budget
    pub fn timed_out(repo: impl AsRef<Path>, after: Duration) -> Self {
        let mut outcome = Self::from_error(repo, &SyncError::Timeout(after).into());
        outcome.duration_ms = after.as_millis() as u64;
        outcome
    }

    /// Outcome for a repository never started because of shutdown
    pub fn cancelled(repo: impl AsRef<Path>) -> Self {
        Self::from_error(repo, &SyncError::Cancelled.into())
    }

    /// Outcome for a task that broke outside the engine (panic, tool crash)
    pub fn backend_failure(repo: impl AsRef<Path>, message: impl Into<String>) -> Self {
        let mut outcome = Self::new(repo);
        outcome.state = FinalState::Failed(FailureKind::Backend);
        outcome.failure = Some(SyncFailure {
            kind: FailureKind::Backend,
            message: message.into(),
            paths: Vec::new(),
            commits: Vec::new(),
        });
        outcome
    }

    /// Record a terminal failure
    pub fn fail(&mut self, error: &Error) {
        let failure = SyncFailure::from(error);
        self.state = FinalState::Failed(failure.kind);
        self.failure = Some(failure);
    }

    /// Failure kind, if any
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.state {
            FinalState::Failed(kind) => Some(kind),
            FinalState::Reconciled => None,
        }
    }

    /// Whether this outcome counts as a failed repository
    ///
    /// Soft failures (`CommitError`) are reported but do not count.
    pub fn is_failure(&self) -> bool {
        self.failure_kind().is_some_and(|k| !k.is_soft())
    }

    /// Process exit code for single-repository mode
    pub fn exit_code(&self) -> i32 {
        if self.is_failure() { 1 } else { 0 }
    }

    pub fn files_committed(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}
