//! Sync reconciler
//!
//! Drives one repository from "whatever state it is in" to either
//! `Reconciled` or a classified failure:
//!
//! 1. fetch the remote (bounded retry on network failure)
//! 2. stage and commit local edits
//! 3. decide `InSync` / `LocalBehind` / `LocalAhead` / `Diverged`
//! 4. merge or push, gated on signatures when enabled
//!
//! Ancestry decides ahead/behind. Commit timestamps are only consulted when
//! neither head is an ancestor of the other.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use super::changes::{ChangeSet, compute_change_set};
use super::outcome::{SyncDecision, SyncOutcome};
use super::staging::{CommitMessageBuilder, stage_and_commit};
use super::verify::{self, SignatureVerifier};
use crate::config::Config;
use crate::error::{Error, FailureKind, Result, SyncError};
use crate::git::{CommitRef, MergeOutcome, PushOutcome, RepositoryHandle, VcsBackend};

/// Reconciler settings
#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    /// Gate merges and pushes on valid commit signatures
    pub require_signature: bool,
    /// Signer identity substring, checked when signatures are required
    pub required_signer: Option<String>,
    /// Operator opt-in for merging unrelated histories
    pub allow_unrelated_histories: bool,
    /// Retries for fetch/push network failures
    pub network_retries: u32,
    pub retry_delay: Duration,
    pub messages: CommitMessageBuilder,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            require_signature: false,
            required_signer: None,
            allow_unrelated_histories: false,
            network_retries: 1,
            retry_delay: Duration::from_secs(2),
            messages: CommitMessageBuilder::default(),
        }
    }
}

impl From<&Config> for ReconcileOptions {
    fn from(config: &Config) -> Self {
        Self {
            require_signature: config.require_signature,
            required_signer: config.signer_requirement().map(String::from),
            allow_unrelated_histories: config.allow_unrelated_histories,
            network_retries: config.network_retries,
            messages: CommitMessageBuilder::new(config.commit_message_prefix.clone()),
            ..Default::default()
        }
    }
}

/// Decision plus whether the histories share any ancestor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assessment {
    pub decision: SyncDecision,
    pub unrelated: bool,
}

impl From<SyncDecision> for Assessment {
    fn from(decision: SyncDecision) -> Self {
        Self {
            decision,
            unrelated: false,
        }
    }
}

/// Fallback when neither head is an ancestor of the other
///
/// An older local head only counts as behind when the working tree is
/// clean, since a merge could otherwise overwrite local changes.
pub fn decide_by_timestamp(local: &CommitRef, remote: &CommitRef, clean: bool) -> SyncDecision {
    match local.timestamp.cmp(&remote.timestamp) {
        Ordering::Less if clean => SyncDecision::LocalBehind,
        Ordering::Greater => SyncDecision::LocalAhead,
        _ => SyncDecision::Diverged,
    }
}

/// Reconciliation state machine for a single repository
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(options: ReconcileOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Reconcile one repository; failures are captured in the outcome
    #[instrument(skip_all, fields(repo = %handle.path().display()))]
    pub async fn reconcile<B: VcsBackend>(&self, handle: &mut RepositoryHandle<B>) -> SyncOutcome {
        let started = Instant::now();
        let mut outcome = SyncOutcome::new(handle.path());

        match self.run(handle, &mut outcome).await {
            Ok(()) => match outcome.failure_kind() {
                Some(kind) => warn!("Finished with {}", kind),
                None => info!(
                    decision = ?outcome.decision,
                    merged = outcome.merged,
                    pushed = outcome.pushed,
                    "Reconciled"
                ),
            },
            Err(e) => {
                error!("{}", e);
                outcome.fail(&e);
            }
        }

        outcome.head = handle.local_head().cloned();
        outcome.duration_ms = started.elapsed().as_millis() as u64;
        outcome
    }

    async fn run<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        self.fetch(handle).await?;

        let changes = compute_change_set(handle).await?;
        if changes.has_conflicts() {
            return Err(SyncError::MergeConflict {
                paths: changes.conflicted.into_iter().collect(),
            }
            .into());
        }
        self.commit_changes(handle, &changes, outcome).await?;

        let assessment = self.decide(handle).await?;
        outcome.decision = Some(assessment.decision);
        info!(decision = %assessment.decision, "Decision reached");

        match assessment.decision {
            SyncDecision::InSync => Ok(()),
            SyncDecision::LocalBehind => self.pull(handle, outcome, false).await,
            SyncDecision::LocalAhead => self.push_local(handle, outcome).await,
            SyncDecision::Diverged if assessment.unrelated => {
                if self.options.allow_unrelated_histories {
                    warn!("Histories are unrelated; merging as explicitly allowed");
                    self.pull(handle, outcome, true).await
                } else {
                    Err(self.unrelated_error(handle))
                }
            }
            SyncDecision::Diverged => {
                let (local, remote) = self.head_ids(handle);
                Err(SyncError::Diverged { local, remote }.into())
            }
        }
    }

    /// Classify the relationship between the local and remote heads
    pub async fn decide<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> Result<Assessment> {
        let local = handle.local_head().cloned();
        let remote = handle.remote_head()?.cloned();

        let (local, remote) = match (local, remote) {
            (None, None) => return Ok(SyncDecision::InSync.into()),
            (None, Some(_)) => return Ok(SyncDecision::LocalBehind.into()),
            (Some(_), None) => return Ok(SyncDecision::LocalAhead.into()),
            (Some(local), Some(remote)) => (local, remote),
        };

        if local.id == remote.id {
            return Ok(SyncDecision::InSync.into());
        }

        let backend = handle.backend();
        if backend.is_ancestor(&local.id, &remote.id).await? {
            return Ok(SyncDecision::LocalBehind.into());
        }
        if backend.is_ancestor(&remote.id, &local.id).await? {
            return Ok(SyncDecision::LocalAhead.into());
        }
        if backend.merge_base(&local.id, &remote.id).await?.is_none() {
            return Ok(Assessment {
                decision: SyncDecision::Diverged,
                unrelated: true,
            });
        }

        let clean = !handle.is_dirty(false).await?;
        let decision = decide_by_timestamp(&local, &remote, clean);
        info!(
            local = local.timestamp,
            remote = remote.timestamp,
            "Heads diverged; {} by commit time",
            decision
        );
        Ok(decision.into())
    }

    async fn fetch<B: VcsBackend>(&self, handle: &mut RepositoryHandle<B>) -> Result<()> {
        let mut attempt = 0;
        loop {
            match handle.fetch_remote().await {
                Ok(()) => return Ok(()),
                Err(e)
                    if e.kind() == FailureKind::NetworkFailure
                        && attempt < self.options.network_retries =>
                {
                    attempt += 1;
                    warn!("Fetch failed ({}), retrying", e);
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Stage and commit; a commit failure is recorded but does not stop the run
    async fn commit_changes<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        changes: &ChangeSet,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        match stage_and_commit(handle, changes, &self.options.messages).await {
            Ok(Some(commit)) => {
                let counts = changes.counts();
                outcome.added += counts.added;
                outcome.deleted += counts.deleted;
                outcome.modified += counts.modified;
                outcome.commit = Some(commit);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.kind().is_soft() => {
                warn!("{}", e);
                outcome.fail(&e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Merge the remote head, commit anything left, push if now ahead
    async fn pull<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        outcome: &mut SyncOutcome,
        allow_unrelated: bool,
    ) -> Result<()> {
        self.merge_remote(handle, outcome, allow_unrelated).await?;

        let changes = compute_change_set(handle).await?;
        self.commit_changes(handle, &changes, outcome).await?;

        if self.is_ahead(handle).await? {
            self.push_local(handle, outcome).await?;
        }
        Ok(())
    }

    async fn merge_remote<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        outcome: &mut SyncOutcome,
        allow_unrelated: bool,
    ) -> Result<()> {
        let remote = handle
            .remote_head()?
            .cloned()
            .ok_or_else(|| SyncError::RemoteHeadUnknown(handle.remote_branch()))?;
        let local = handle.local_head().map(|c| c.id.clone());

        self.gate(handle, local.as_deref(), &remote.id, "incoming")
            .await?;

        let mut allow = allow_unrelated;
        loop {
            let result = handle
                .backend()
                .merge(&handle.tracking_ref(), allow)
                .await?;

            match result {
                MergeOutcome::Merged { fast_forward } => {
                    info!(
                        remote = %remote,
                        fast_forward,
                        "Merged {}",
                        handle.remote_branch()
                    );
                    outcome.merged = true;
                    handle.refresh_local_head().await?;
                    return Ok(());
                }
                MergeOutcome::Conflict { paths } => {
                    return Err(SyncError::MergeConflict { paths }.into());
                }
                MergeOutcome::Blocked { paths } => {
                    return Err(SyncError::UnresolvedDirty { paths }.into());
                }
                MergeOutcome::UnrelatedHistories
                    if !allow && self.options.allow_unrelated_histories =>
                {
                    warn!("Retrying merge with unrelated histories allowed");
                    allow = true;
                }
                MergeOutcome::UnrelatedHistories => {
                    return Err(self.unrelated_error(handle));
                }
            }
        }
    }

    /// Push local commits; one rejection triggers fetch, merge and a second push
    async fn push_local<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        outcome: &mut SyncOutcome,
    ) -> Result<()> {
        self.ensure_resolved(handle).await?;
        self.gate_outgoing(handle).await?;

        let set_upstream = handle.remote_head()?.is_none();
        let reason = match self.push(handle, set_upstream).await? {
            PushOutcome::Pushed => {
                outcome.pushed = true;
                return Ok(());
            }
            PushOutcome::Rejected { reason } => reason,
        };

        warn!("Push rejected ({}); fetching and retrying once", reason);
        outcome.decision = Some(SyncDecision::Diverged);

        self.fetch(handle).await?;
        self.merge_remote(handle, outcome, false).await?;
        self.gate_outgoing(handle).await?;

        match self.push(handle, false).await? {
            PushOutcome::Pushed => {
                outcome.pushed = true;
                Ok(())
            }
            PushOutcome::Rejected { reason } => Err(SyncError::PushRejected(reason).into()),
        }
    }

    async fn push<B: VcsBackend>(
        &self,
        handle: &mut RepositoryHandle<B>,
        set_upstream: bool,
    ) -> Result<PushOutcome> {
        let mut attempt = 0;
        loop {
            let result = handle
                .backend()
                .push(handle.remote(), handle.branch(), set_upstream)
                .await;

            match result {
                Ok(PushOutcome::Pushed) => {
                    handle.record_push();
                    info!(
                        head = ?handle.local_head().map(CommitRef::short_id),
                        "Pushed to {}",
                        handle.remote_branch()
                    );
                    return Ok(PushOutcome::Pushed);
                }
                Ok(rejected) => return Ok(rejected),
                Err(Error::Git(e))
                    if e.is_transport() && attempt < self.options.network_retries =>
                {
                    attempt += 1;
                    warn!("Push failed ({}), retrying", e);
                    tokio::time::sleep(self.options.retry_delay).await;
                }
                Err(Error::Git(e)) if e.is_transport() => {
                    return Err(SyncError::NetworkFailure(e.to_string()).into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fail when leftover edits touch paths that differ from the remote head
    async fn ensure_resolved<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> Result<()> {
        let changes = compute_change_set(handle).await?;
        if changes.is_empty() {
            return Ok(());
        }
        let Some(remote) = handle.remote_head()?.cloned() else {
            return Ok(());
        };

        let dirty: BTreeSet<String> = changes.paths().into_iter().collect();
        let unresolved: Vec<String> = handle
            .backend()
            .diff_paths(&remote.id)
            .await?
            .into_iter()
            .filter(|p| dirty.contains(p))
            .collect();

        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(SyncError::UnresolvedDirty { paths: unresolved }.into())
        }
    }

    async fn gate_outgoing<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> Result<()> {
        let Some(local) = handle.local_head().map(|c| c.id.clone()) else {
            return Ok(());
        };
        let remote = handle.remote_head()?.map(|c| c.id.clone());
        self.gate(handle, remote.as_deref(), &local, "outgoing")
            .await
    }

    /// Verify signatures of commits reachable from `include` but not `exclude`
    async fn gate<B: VcsBackend>(
        &self,
        handle: &RepositoryHandle<B>,
        exclude: Option<&str>,
        include: &str,
        direction: &str,
    ) -> Result<()> {
        if !self.options.require_signature {
            return Ok(());
        }

        let commits = handle
            .backend()
            .list_commits_in_range(exclude, include)
            .await?;
        let results = SignatureVerifier::new(handle.backend())
            .verify(&commits, self.options.required_signer.as_deref())
            .await?;

        let failures = verify::failures(results);
        if failures.is_empty() {
            info!("Verified {} {} commit(s)", commits.len(), direction);
            Ok(())
        } else {
            Err(SyncError::SignatureVerification { failures }.into())
        }
    }

    async fn is_ahead<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> Result<bool> {
        let Some(local) = handle.local_head() else {
            return Ok(false);
        };
        match handle.remote_head()? {
            None => Ok(true),
            Some(remote) if remote.id == local.id => Ok(false),
            Some(remote) => handle.backend().is_ancestor(&remote.id, &local.id).await,
        }
    }

    fn head_ids<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> (String, String) {
        let id = |c: Option<&CommitRef>| c.map(|c| c.id.clone()).unwrap_or_default();
        let remote = handle.remote_head().ok().flatten();
        (id(handle.local_head()), id(remote))
    }

    fn unrelated_error<B: VcsBackend>(&self, handle: &RepositoryHandle<B>) -> Error {
        let (local, _) = self.head_ids(handle);
        SyncError::UnrelatedHistories {
            local,
            remote: handle.remote_branch(),
        }
        .into()
    }
}

/// Open and reconcile one working copy with the git CLI backend
pub async fn sync_repository(path: impl AsRef<Path>, config: &Config) -> SyncOutcome {
    let path = path.as_ref();
    match RepositoryHandle::open(path, config).await {
        Ok(mut handle) => {
            Reconciler::new(ReconcileOptions::from(config))
                .reconcile(&mut handle)
                .await
        }
        Err(e) => {
            error!(repo = %path.display(), "{}", e);
            SyncOutcome::from_error(path, &e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::testing::FakeBackend;
    use crate::git::{SignatureStatus, StatusEntry};
    use crate::sync::FinalState;
    use pretty_assertions::assert_eq;

    fn options() -> ReconcileOptions {
        ReconcileOptions {
            retry_delay: Duration::ZERO,
            ..Default::default()
        }
    }

    fn signed_options(signer: Option<&str>) -> ReconcileOptions {
        ReconcileOptions {
            require_signature: true,
            required_signer: signer.map(String::from),
            ..options()
        }
    }

    async fn open(backend: FakeBackend) -> RepositoryHandle<FakeBackend> {
        RepositoryHandle::with_backend(backend, "origin", None)
            .await
            .unwrap()
    }

    async fn reconcile_with(
        backend: FakeBackend,
        options: ReconcileOptions,
    ) -> (SyncOutcome, RepositoryHandle<FakeBackend>) {
        let mut handle = open(backend).await;
        let outcome = Reconciler::new(options).reconcile(&mut handle).await;
        (outcome, handle)
    }

    /// Local and remote at the same commit
    fn settled() -> (FakeBackend, String) {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        backend.set_server_head(&base);
        (backend, base)
    }

    #[test]
    fn test_decide_by_timestamp() {
        let old = CommitRef::new("a", 100);
        let new = CommitRef::new("b", 200);
        assert_eq!(decide_by_timestamp(&old, &new, true), SyncDecision::LocalBehind);
        assert_eq!(decide_by_timestamp(&old, &new, false), SyncDecision::Diverged);
        assert_eq!(decide_by_timestamp(&new, &old, true), SyncDecision::LocalAhead);
        assert_eq!(decide_by_timestamp(&old, &old, true), SyncDecision::Diverged);
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            require_signature: true,
            required_signer: Some("alice".to_string()),
            commit_message_prefix: "Sync".to_string(),
            ..Default::default()
        };
        let options = ReconcileOptions::from(&config);
        assert!(options.require_signature);
        assert_eq!(options.required_signer.as_deref(), Some("alice"));
        assert_eq!(
            options.messages.build(&crate::sync::ChangeCounts {
                added: 1,
                ..Default::default()
            }),
            Some("Sync: Added 1 Files".to_string())
        );
    }

    #[tokio::test]
    async fn test_in_sync_does_nothing() {
        let (backend, base) = settled();
        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::InSync));
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert_eq!(outcome.head.unwrap().id, base);
        assert_eq!(handle.backend().calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_untracked_file_is_committed_and_pushed() {
        let (backend, _) = settled();
        backend.set_status(vec![StatusEntry::new('?', '?', "a.txt")]);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::LocalAhead));
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert_eq!(outcome.added, 1);
        assert!(outcome.pushed);
        assert_eq!(
            handle.backend().messages(),
            vec!["Automatic Commit: Added 1 Files"]
        );
        assert_eq!(handle.backend().server_head(), handle.backend().head());
        assert_eq!(outcome.commit.unwrap().id, handle.backend().head().unwrap());
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let (backend, _) = settled();
        backend.set_status(vec![StatusEntry::new('?', '?', "a.txt")]);
        let mut handle = open(backend).await;
        let reconciler = Reconciler::new(options());

        reconciler.reconcile(&mut handle).await;
        let commits = handle.backend().count_calls("commit");
        let pushes = handle.backend().count_calls("push");

        let second = reconciler.reconcile(&mut handle).await;
        assert_eq!(second.decision, Some(SyncDecision::InSync));
        assert_eq!(handle.backend().count_calls("commit"), commits);
        assert_eq!(handle.backend().count_calls("push"), pushes);
        assert!(!second.pushed);
    }

    #[tokio::test]
    async fn test_behind_fast_forwards() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::LocalBehind));
        assert!(outcome.merged);
        assert!(!outcome.pushed);
        assert_eq!(handle.backend().head(), Some(remote));
    }

    #[tokio::test]
    async fn test_unsigned_incoming_commit_blocks_merge() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);

        let (outcome, handle) = reconcile_with(backend, signed_options(None)).await;

        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::SignatureVerification)
        );
        let failure = outcome.failure.unwrap();
        assert_eq!(failure.commits.len(), 1);
        assert!(failure.commits[0].starts_with(&remote));
        assert_eq!(handle.backend().count_calls("merge"), 0);
        assert_eq!(handle.backend().head(), Some(base));
    }

    #[tokio::test]
    async fn test_signed_incoming_commit_merges() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);
        backend.set_signature(
            &remote,
            SignatureStatus::Good {
                signer: "Alice <alice@example.com>".to_string(),
            },
        );

        let (outcome, _) = reconcile_with(backend, signed_options(Some("alice@"))).await;
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert!(outcome.merged);
    }

    #[tokio::test]
    async fn test_signer_mismatch_blocks_merge() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);
        backend.set_signature(
            &remote,
            SignatureStatus::Good {
                signer: "Mallory".to_string(),
            },
        );

        let (outcome, _) = reconcile_with(backend, signed_options(Some("Alice"))).await;
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::SignatureVerification)
        );
    }

    #[tokio::test]
    async fn test_unsigned_outgoing_commit_blocks_push() {
        let (backend, _) = settled();
        backend.commit_local(200);

        let (outcome, handle) = reconcile_with(backend, signed_options(None)).await;
        assert_eq!(outcome.decision, Some(SyncDecision::LocalAhead));
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::SignatureVerification)
        );
        assert_eq!(handle.backend().count_calls("push"), 0);
    }

    #[tokio::test]
    async fn test_signed_outgoing_commit_is_pushed() {
        let (backend, _) = settled();
        backend.sign_new_commits(SignatureStatus::Good {
            signer: "Alice <alice@example.com>".to_string(),
        });
        backend.set_status(vec![StatusEntry::new('?', '?', "a.txt")]);

        let (outcome, handle) = reconcile_with(backend, signed_options(Some("Alice"))).await;
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert!(outcome.pushed);
        assert_eq!(handle.backend().server_head(), handle.backend().head());
    }

    #[tokio::test]
    async fn test_unrelated_histories_need_opt_in() {
        let backend = FakeBackend::new();
        backend.commit_local(100);
        let foreign = backend.commit_detached(&[], 200);
        backend.set_server_head(&foreign);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::Diverged));
        assert_eq!(
            outcome.failure_kind(),
            Some(FailureKind::UnrelatedHistories)
        );
        assert!(
            outcome
                .failure
                .unwrap()
                .message
                .contains("--allow-unrelated-histories")
        );
        assert_eq!(handle.backend().count_calls("merge"), 0);
        assert_eq!(handle.backend().count_calls("merge_unrelated"), 0);
    }

    #[tokio::test]
    async fn test_unrelated_histories_with_opt_in() {
        let backend = FakeBackend::new();
        backend.commit_local(100);
        let foreign = backend.commit_detached(&[], 200);
        backend.set_server_head(&foreign);

        let options = ReconcileOptions {
            allow_unrelated_histories: true,
            ..options()
        };
        let (outcome, handle) = reconcile_with(backend, options).await;

        assert_eq!(outcome.state, FinalState::Reconciled);
        assert!(outcome.merged);
        assert!(outcome.pushed);
        assert_eq!(handle.backend().count_calls("merge_unrelated"), 1);
        assert_eq!(handle.backend().server_head(), handle.backend().head());
    }

    #[tokio::test]
    async fn test_merge_reporting_unrelated_retries_with_opt_in() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);
        backend.script_merge(MergeOutcome::UnrelatedHistories);

        let options = ReconcileOptions {
            allow_unrelated_histories: true,
            ..options()
        };
        let (outcome, handle) = reconcile_with(backend, options).await;

        assert_eq!(outcome.state, FinalState::Reconciled);
        assert_eq!(handle.backend().calls(), vec!["fetch", "merge", "merge_unrelated"]);
    }

    #[tokio::test]
    async fn test_merge_conflict_stops() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 300);
        backend.commit_local(200);
        backend.set_server_head(&remote);
        backend.script_merge(MergeOutcome::Conflict {
            paths: vec!["a.txt".to_string()],
        });

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::LocalBehind));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MergeConflict));
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.failure.unwrap().paths, vec!["a.txt"]);
        assert_eq!(handle.backend().count_calls("push"), 0);
    }

    #[tokio::test]
    async fn test_leftover_conflicts_stop_before_staging() {
        let (backend, _) = settled();
        backend.set_status(vec![
            StatusEntry::new('U', 'U', "a.txt"),
            StatusEntry::new('?', '?', "b.txt"),
        ]);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::MergeConflict));
        assert_eq!(handle.backend().calls(), vec!["fetch"]);
    }

    #[tokio::test]
    async fn test_blocked_merge_is_unresolved_dirty() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.set_server_head(&remote);
        backend.script_merge(MergeOutcome::Blocked {
            paths: vec!["config.yml".to_string()],
        });

        let (outcome, _) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UnresolvedDirty));
        assert_eq!(outcome.failure.unwrap().paths, vec!["config.yml"]);
    }

    #[tokio::test]
    async fn test_diverged_by_timestamp_merges_then_pushes() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 300);
        backend.commit_local(200);
        backend.set_server_head(&remote);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::LocalBehind));
        assert!(outcome.merged);
        assert!(outcome.pushed);
        assert_eq!(handle.backend().server_head(), handle.backend().head());
    }

    #[tokio::test]
    async fn test_diverged_with_dirty_tree_needs_resolution() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 300);
        backend.commit_local(200);
        backend.set_server_head(&remote);
        backend.fail_commits();
        backend.set_status(vec![StatusEntry::new(' ', 'M', "notes.md")]);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::Diverged));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Diverged));
        assert_eq!(handle.backend().count_calls("merge"), 0);
        assert_eq!(handle.backend().count_calls("push"), 0);
    }

    #[tokio::test]
    async fn test_push_rejection_retries_once() {
        let backend = FakeBackend::new();
        let base = backend.commit_local(100);
        let remote = backend.commit_detached(&[base.as_str()], 200);
        backend.commit_local(300);
        backend.set_server_head(&remote);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        // Newer local head is pushed first; the remote refuses the non-fast-forward
        assert_eq!(outcome.decision, Some(SyncDecision::Diverged));
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert!(outcome.merged);
        assert!(outcome.pushed);
        assert_eq!(handle.backend().count_calls("push"), 2);
        assert_eq!(handle.backend().count_calls("fetch"), 2);
        assert_eq!(handle.backend().server_head(), handle.backend().head());
    }

    #[tokio::test]
    async fn test_second_push_rejection_is_terminal() {
        let (backend, _) = settled();
        backend.commit_local(200);
        let rejected = PushOutcome::Rejected {
            reason: "! [rejected] main -> main (fetch first)".to_string(),
        };
        backend.script_push(rejected.clone());
        backend.script_push(rejected);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.failure_kind(), Some(FailureKind::PushRejected));
        assert_eq!(handle.backend().count_calls("push"), 2);
        assert!(!outcome.pushed);
    }

    #[tokio::test]
    async fn test_fetch_retried_once() {
        let (backend, _) = settled();
        backend.fail_fetches(1);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.state, FinalState::Reconciled);
        assert_eq!(handle.backend().count_calls("fetch"), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_after_retry_is_terminal() {
        let (backend, _) = settled();
        backend.fail_fetches(2);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.failure_kind(), Some(FailureKind::NetworkFailure));
        assert!(outcome.decision.is_none());
        assert_eq!(handle.backend().count_calls("fetch"), 2);
    }

    #[tokio::test]
    async fn test_push_network_failure_retried() {
        let (backend, _) = settled();
        backend.commit_local(200);
        backend.fail_pushes(1);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert!(outcome.pushed);
        assert_eq!(handle.backend().count_calls("push"), 2);
    }

    #[tokio::test]
    async fn test_push_hook_failure_is_not_retried() {
        let (backend, _) = settled();
        backend.commit_local(200);
        backend.fail_push_with("remote: error: hook declined to update refs/heads/main");

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert!(!outcome.pushed);
        assert_eq!(outcome.failure_kind(), Some(FailureKind::Backend));
        assert_eq!(handle.backend().count_calls("push"), 1);
    }

    #[tokio::test]
    async fn test_commit_error_is_soft() {
        let (backend, _) = settled();
        backend.fail_commits();
        backend.set_status(vec![StatusEntry::new('?', '?', "a.txt")]);

        let (outcome, _) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::InSync));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::CommitError));
        assert!(!outcome.is_failure());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[tokio::test]
    async fn test_dirty_paths_differing_from_remote_block_push() {
        let (backend, _) = settled();
        backend.commit_local(200);
        backend.fail_commits();
        backend.set_status(vec![StatusEntry::new(' ', 'M', "a.txt")]);
        backend.set_dirty_vs_remote(vec!["a.txt".to_string()]);

        let (outcome, handle) = reconcile_with(backend, options()).await;

        assert_eq!(outcome.decision, Some(SyncDecision::LocalAhead));
        assert_eq!(outcome.failure_kind(), Some(FailureKind::UnresolvedDirty));
        assert_eq!(outcome.failure.unwrap().paths, vec!["a.txt"]);
        assert_eq!(handle.backend().count_calls("push"), 0);
    }

    #[tokio::test]
    async fn test_unborn_local_branch_takes_remote() {
        let backend = FakeBackend::new();
        let remote = backend.commit_detached(&[], 100);
        backend.set_server_head(&remote);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.decision, Some(SyncDecision::LocalBehind));
        assert!(outcome.merged);
        assert_eq!(handle.backend().head(), Some(remote));
    }

    #[tokio::test]
    async fn test_missing_remote_branch_is_created() {
        let backend = FakeBackend::new();
        let local = backend.commit_local(100);

        let (outcome, handle) = reconcile_with(backend, options()).await;
        assert_eq!(outcome.decision, Some(SyncDecision::LocalAhead));
        assert!(outcome.pushed);
        assert_eq!(handle.backend().server_head(), Some(local));
    }

    #[tokio::test]
    async fn test_empty_repositories_are_in_sync() {
        let (outcome, handle) = reconcile_with(FakeBackend::new(), options()).await;
        assert_eq!(outcome.decision, Some(SyncDecision::InSync));
        assert!(outcome.head.is_none());
        assert_eq!(handle.backend().calls(), vec!["fetch"]);
    }
}
