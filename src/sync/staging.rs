//! Staging and automatic commits

use tracing::{info, warn};

use super::{ChangeCounts, ChangeSet};
use crate::error::{Error, Result, SyncError};
use crate::git::{CommitRef, RepositoryHandle, VcsBackend};

/// Builds deterministic commit messages from change counts
#[derive(Debug, Clone)]
pub struct CommitMessageBuilder {
    prefix: String,
}

impl CommitMessageBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Non-zero clauses in fixed order: Added, Deleted, Modified
    pub fn clauses(counts: &ChangeCounts) -> Vec<String> {
        [
            ("Added", counts.added),
            ("Deleted", counts.deleted),
            ("Modified", counts.modified),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .map(|(verb, n)| format!("{} {} Files", verb, n))
        .collect()
    }

    /// Commit message, `None` when every count is zero
    pub fn build(&self, counts: &ChangeCounts) -> Option<String> {
        let clauses = Self::clauses(counts);
        if clauses.is_empty() {
            return None;
        }

        let body = clauses.join(", ");
        if self.prefix.is_empty() {
            Some(body)
        } else {
            Some(format!("{}: {}", self.prefix, body))
        }
    }
}

impl Default for CommitMessageBuilder {
    fn default() -> Self {
        Self::new("Automatic Commit")
    }
}

/// Stage a change set and commit it
///
/// Returns `None` when there is nothing to commit. Staging and commit
/// failures surface as `SyncError::CommitError`.
pub async fn stage_and_commit<B: VcsBackend>(
    handle: &mut RepositoryHandle<B>,
    changes: &ChangeSet,
    messages: &CommitMessageBuilder,
) -> Result<Option<CommitRef>> {
    let Some(message) = messages.build(&changes.counts()) else {
        return Ok(None);
    };

    let repo = handle.path().display().to_string();
    for (label, paths) in [
        ("Untracked", &changes.added),
        ("Modified", &changes.modified),
        ("Deleted", &changes.deleted),
    ] {
        if !paths.is_empty() {
            info!(repo = %repo, count = paths.len(), "{}: {}", label, paths.iter().cloned().collect::<Vec<_>>().join(", "));
        }
    }

    let backend = handle.backend();
    backend
        .stage(&changes.to_include())
        .await
        .map_err(commit_error)?;
    backend
        .stage_removal(&changes.to_remove())
        .await
        .map_err(commit_error)?;

    if !backend.has_staged_changes().await.map_err(commit_error)? {
        info!(repo = %repo, "Nothing left to commit after staging");
        return Ok(None);
    }

    let commit = backend.commit(&message).await.map_err(|e| {
        warn!(repo = %repo, "Unable to commit changes: {}", e);
        commit_error(e)
    })?;

    info!(repo = %repo, commit = %commit, "Committed: {}", message);
    handle.refresh_local_head().await?;

    Ok(Some(commit))
}

fn commit_error(error: Error) -> Error {
    match error {
        Error::Sync(SyncError::CommitError(_)) => error,
        other => SyncError::CommitError(other.to_string()).into(),
    }
}
