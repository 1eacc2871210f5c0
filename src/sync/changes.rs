//! Change inspection
//!
//! Classifies the working tree into added, modified and deleted paths.
//! A change set is a snapshot: staging mutates the state it was computed
//! from, so callers recompute it instead of holding on to one.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::git::{RepositoryHandle, StatusEntry, VcsBackend};

/// Number of files per category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub added: usize,
    pub deleted: usize,
    pub modified: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.added + self.deleted + self.modified
    }
}

/// Disjoint sets of repository-relative paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    /// New to the repository (untracked, or staged as new)
    pub added: BTreeSet<String>,
    /// Tracked, content differs
    pub modified: BTreeSet<String>,
    /// Tracked, missing on disk
    pub deleted: BTreeSet<String>,
    /// Unmerged paths from an unfinished merge; never staged automatically
    pub conflicted: BTreeSet<String>,
}

impl ChangeSet {
    /// Classify porcelain status entries
    pub fn from_status(entries: &[StatusEntry]) -> Self {
        let mut changes = ChangeSet::default();

        for entry in entries {
            if entry.is_ignored() {
                continue;
            }

            if entry.is_unmerged() {
                changes.conflicted.insert(entry.path.clone());
            } else if entry.is_untracked() {
                changes.added.insert(entry.path.clone());
            } else if entry.worktree == 'D' || entry.index == 'D' {
                // Includes paths staged as new and then removed from disk
                changes.deleted.insert(entry.path.clone());
            } else if matches!(entry.index, 'A' | 'R' | 'C') {
                changes.added.insert(entry.path.clone());
                if let Some(orig) = &entry.orig_path {
                    if entry.index == 'R' {
                        changes.deleted.insert(orig.clone());
                    }
                }
            } else {
                changes.modified.insert(entry.path.clone());
            }
        }

        // A rename source recreated as a new file is an addition
        let ChangeSet { added, deleted, .. } = &mut changes;
        deleted.retain(|p| !added.contains(p));

        changes
    }

    /// Whether there is nothing to stage
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicted.is_empty()
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added.len(),
            deleted: self.deleted.len(),
            modified: self.modified.len(),
        }
    }

    /// Every stageable path, sorted
    pub fn paths(&self) -> Vec<String> {
        let all: BTreeSet<&String> = self
            .added
            .iter()
            .chain(&self.modified)
            .chain(&self.deleted)
            .collect();
        all.into_iter().cloned().collect()
    }

    /// Paths staged for inclusion (added and modified)
    pub fn to_include(&self) -> Vec<String> {
        self.added.iter().chain(&self.modified).cloned().collect()
    }

    /// Paths staged for removal
    pub fn to_remove(&self) -> Vec<String> {
        self.deleted.iter().cloned().collect()
    }
}

/// Compute a fresh change set for the working copy
pub async fn compute_change_set<B: VcsBackend>(handle: &RepositoryHandle<B>) -> Result<ChangeSet> {
    let status = handle.backend().status().await?;
    let changes = ChangeSet::from_status(&status);

    debug!(
        "{}: {} added, {} modified, {} deleted, {} conflicted",
        handle.path().display(),
        changes.added.len(),
        changes.modified.len(),
        changes.deleted.len(),
        changes.conflicted.len()
    );

    Ok(changes)
}
