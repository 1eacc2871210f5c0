//! In-memory backend for unit tests
//!
//! Simulates a commit graph, a working tree status, and a remote server
//! closely enough to drive the reconciler through every transition.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{CommitRef, MergeOutcome, PushOutcome, SignatureStatus, StatusEntry, VcsBackend};
use crate::error::{GitError, Result};

#[derive(Debug, Clone)]
struct FakeCommit {
    parents: Vec<String>,
    timestamp: i64,
    signature: SignatureStatus,
}

#[derive(Debug, Default)]
struct FakeState {
    remotes: Vec<String>,
    branch: Option<String>,
    commits: HashMap<String, FakeCommit>,
    next_id: u64,
    clock: i64,
    head: Option<String>,
    server_head: Option<String>,
    tracking: Option<String>,
    status: Vec<StatusEntry>,
    staged: Vec<String>,
    dirty_vs_remote: Vec<String>,
    merge_script: VecDeque<MergeOutcome>,
    push_script: VecDeque<PushOutcome>,
    fetch_failures: u32,
    push_failures: u32,
    push_error: Option<String>,
    commit_fails: bool,
    commit_signature: Option<SignatureStatus>,
    messages: Vec<String>,
    calls: Vec<String>,
}

/// Scripted in-memory repository
pub struct FakeBackend {
    path: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            path: PathBuf::from("/fake/repo"),
            state: Mutex::new(FakeState {
                remotes: vec!["origin".to_string()],
                branch: Some("main".to_string()),
                clock: 1_000,
                ..Default::default()
            }),
        }
    }

    pub fn without_remote(self) -> Self {
        self.state.lock().unwrap().remotes.clear();
        self
    }

    fn add_commit(state: &mut FakeState, parents: Vec<String>, timestamp: i64) -> String {
        state.next_id += 1;
        let id = format!("{:040x}", state.next_id);
        let signature = state
            .commit_signature
            .clone()
            .unwrap_or(SignatureStatus::Unsigned);
        state.commits.insert(
            id.clone(),
            FakeCommit {
                parents,
                timestamp,
                signature,
            },
        );
        id
    }

    /// Create a commit on top of the local head and move the head to it
    pub fn commit_local(&self, timestamp: i64) -> String {
        let mut state = self.state.lock().unwrap();
        let parents = state.head.iter().cloned().collect();
        let id = Self::add_commit(&mut state, parents, timestamp);
        state.head = Some(id.clone());
        id
    }

    /// Create a commit with explicit parents without moving any ref
    pub fn commit_detached(&self, parents: &[&str], timestamp: i64) -> String {
        let mut state = self.state.lock().unwrap();
        let parents = parents.iter().map(|p| p.to_string()).collect();
        Self::add_commit(&mut state, parents, timestamp)
    }

    /// Move the branch on the simulated server
    pub fn set_server_head(&self, id: &str) {
        self.state.lock().unwrap().server_head = Some(id.to_string());
    }

    pub fn set_signature(&self, id: &str, signature: SignatureStatus) {
        if let Some(commit) = self.state.lock().unwrap().commits.get_mut(id) {
            commit.signature = signature;
        }
    }

    /// Signature given to commits created from now on
    pub fn sign_new_commits(&self, signature: SignatureStatus) {
        self.state.lock().unwrap().commit_signature = Some(signature);
    }

    pub fn set_status(&self, status: Vec<StatusEntry>) {
        self.state.lock().unwrap().status = status;
    }

    pub fn set_dirty_vs_remote(&self, paths: Vec<String>) {
        self.state.lock().unwrap().dirty_vs_remote = paths;
    }

    pub fn script_merge(&self, outcome: MergeOutcome) {
        self.state.lock().unwrap().merge_script.push_back(outcome);
    }

    pub fn script_push(&self, outcome: PushOutcome) {
        self.state.lock().unwrap().push_script.push_back(outcome);
    }

    pub fn fail_fetches(&self, count: u32) {
        self.state.lock().unwrap().fetch_failures = count;
    }

    pub fn fail_pushes(&self, count: u32) {
        self.state.lock().unwrap().push_failures = count;
    }

    /// Fail the next push with a non-transport error
    pub fn fail_push_with(&self, stderr: &str) {
        self.state.lock().unwrap().push_error = Some(stderr.to_string());
    }

    pub fn fail_commits(&self) {
        self.state.lock().unwrap().commit_fails = true;
    }

    pub fn head(&self) -> Option<String> {
        self.state.lock().unwrap().head.clone()
    }

    pub fn server_head(&self) -> Option<String> {
        self.state.lock().unwrap().server_head.clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.state.lock().unwrap().messages.clone()
    }

    /// Names of mutating or network calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == name).count()
    }

    fn ancestors(state: &FakeState, id: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = state.commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        seen
    }

    fn lookup(state: &FakeState, rev: &str) -> Option<String> {
        match rev {
            "HEAD" => state.head.clone(),
            r if r.starts_with("refs/remotes/") => state.tracking.clone(),
            r if state.commits.contains_key(r) => Some(r.to_string()),
            _ => None,
        }
    }

    fn commit_ref(state: &FakeState, id: &str) -> Option<CommitRef> {
        state
            .commits
            .get(id)
            .map(|c| CommitRef::new(id, c.timestamp))
    }

    fn failure(command: &str, stderr: &str) -> crate::error::Error {
        GitError::CommandFailed {
            command: command.to_string(),
            stderr: stderr.to_string(),
        }
        .into()
    }
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VcsBackend for FakeBackend {
    fn path(&self) -> &Path {
        &self.path
    }

    fn has_remote(&self, remote: &str) -> bool {
        self.state.lock().unwrap().remotes.iter().any(|r| r == remote)
    }

    fn current_branch(&self) -> Option<String> {
        self.state.lock().unwrap().branch.clone()
    }

    async fn fetch(&self, _remote: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("fetch".to_string());
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(Self::failure("git fetch", "Could not resolve host"));
        }
        state.tracking = state.server_head.clone();
        Ok(())
    }

    async fn resolve(&self, rev: &str) -> Result<Option<CommitRef>> {
        let state = self.state.lock().unwrap();
        Ok(Self::lookup(&state, rev).and_then(|id| Self::commit_ref(&state, &id)))
    }

    async fn status(&self) -> Result<Vec<StatusEntry>> {
        Ok(self.state.lock().unwrap().status.clone())
    }

    async fn diff_paths(&self, _rev: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().unwrap().dirty_vs_remote.clone())
    }

    async fn stage(&self, paths: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("stage".to_string());
        // Staged entries stay in the status until a commit succeeds
        for entry in state.status.iter_mut().filter(|e| paths.contains(&e.path)) {
            if entry.index != 'A' {
                entry.index = if entry.is_untracked() { 'A' } else { 'M' };
            }
            entry.worktree = ' ';
        }
        state.staged.extend(paths.iter().cloned());
        Ok(())
    }

    async fn stage_removal(&self, paths: &[String]) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("stage_removal".to_string());
        // Removing a path that was only ever added leaves nothing staged for it
        let never_committed: Vec<String> = state
            .status
            .iter()
            .filter(|e| paths.contains(&e.path) && e.index == 'A')
            .map(|e| e.path.clone())
            .collect();
        state.status.retain(|e| !paths.contains(&e.path));
        state.staged.extend(
            paths
                .iter()
                .filter(|p| !never_committed.contains(p))
                .cloned(),
        );
        Ok(())
    }

    async fn has_staged_changes(&self) -> Result<bool> {
        Ok(!self.state.lock().unwrap().staged.is_empty())
    }

    async fn commit(&self, message: &str) -> Result<CommitRef> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("commit".to_string());
        if state.commit_fails {
            return Err(Self::failure("git commit", "unable to write index"));
        }
        state.clock += 10;
        let timestamp = state.clock;
        let parents = state.head.iter().cloned().collect();
        let id = Self::add_commit(&mut state, parents, timestamp);
        state.head = Some(id.clone());
        let staged = std::mem::take(&mut state.staged);
        state.status.retain(|e| !staged.contains(&e.path));
        state.messages.push(message.to_string());
        Ok(CommitRef::new(id, timestamp))
    }

    async fn merge(&self, rev: &str, allow_unrelated: bool) -> Result<MergeOutcome> {
        let mut state = self.state.lock().unwrap();
        state
            .calls
            .push(if allow_unrelated { "merge_unrelated" } else { "merge" }.to_string());

        if let Some(outcome) = state.merge_script.pop_front() {
            return Ok(outcome);
        }

        let Some(target) = Self::lookup(&state, rev) else {
            return Err(Self::failure("git merge", "not something we can merge"));
        };

        let Some(head) = state.head.clone() else {
            state.head = Some(target);
            return Ok(MergeOutcome::Merged { fast_forward: true });
        };

        if Self::ancestors(&state, &target).contains(&head) {
            state.head = Some(target);
            return Ok(MergeOutcome::Merged { fast_forward: true });
        }
        if Self::ancestors(&state, &head).contains(&target) {
            return Ok(MergeOutcome::Merged { fast_forward: false });
        }

        let related = !Self::ancestors(&state, &head)
            .is_disjoint(&Self::ancestors(&state, &target));
        if !related && !allow_unrelated {
            return Ok(MergeOutcome::UnrelatedHistories);
        }

        state.clock += 10;
        let timestamp = state.clock;
        let id = Self::add_commit(&mut state, vec![head, target], timestamp);
        state.head = Some(id);
        Ok(MergeOutcome::Merged {
            fast_forward: false,
        })
    }

    async fn push(&self, _remote: &str, _branch: &str, _set_upstream: bool) -> Result<PushOutcome> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("push".to_string());

        if state.push_failures > 0 {
            state.push_failures -= 1;
            return Err(Self::failure("git push", "Connection reset by peer"));
        }
        if let Some(stderr) = state.push_error.take() {
            return Err(Self::failure("git push", &stderr));
        }

        if let Some(outcome) = state.push_script.pop_front() {
            if outcome == PushOutcome::Pushed {
                state.server_head = state.head.clone();
                state.tracking = state.head.clone();
            }
            return Ok(outcome);
        }

        // Non-fast-forward updates are refused like a real remote would
        if let (Some(server), Some(head)) = (state.server_head.clone(), state.head.clone()) {
            if !Self::ancestors(&state, &head).contains(&server) {
                return Ok(PushOutcome::Rejected {
                    reason: "! [rejected] main -> main (fetch first)".to_string(),
                });
            }
        }

        state.server_head = state.head.clone();
        state.tracking = state.head.clone();
        Ok(PushOutcome::Pushed)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let state = self.state.lock().unwrap();
        Ok(Self::ancestors(&state, descendant).contains(ancestor))
    }

    async fn merge_base(&self, a: &str, b: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        let of_a = Self::ancestors(&state, a);
        let mut queue = VecDeque::from([b.to_string()]);
        let mut seen = HashSet::new();
        while let Some(next) = queue.pop_front() {
            if of_a.contains(&next) {
                return Ok(Some(next));
            }
            if !seen.insert(next.clone()) {
                continue;
            }
            if let Some(commit) = state.commits.get(&next) {
                queue.extend(commit.parents.iter().cloned());
            }
        }
        Ok(None)
    }

    async fn list_commits_in_range(
        &self,
        exclude: Option<&str>,
        include: &str,
    ) -> Result<Vec<CommitRef>> {
        let state = self.state.lock().unwrap();
        let Some(include) = Self::lookup(&state, include) else {
            return Ok(Vec::new());
        };
        let excluded = exclude
            .and_then(|e| Self::lookup(&state, e))
            .map(|e| Self::ancestors(&state, &e))
            .unwrap_or_default();

        let mut commits: Vec<CommitRef> = Self::ancestors(&state, &include)
            .into_iter()
            .filter(|id| !excluded.contains(id))
            .filter_map(|id| Self::commit_ref(&state, &id))
            .collect();
        commits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then(a.id.cmp(&b.id)));
        Ok(commits)
    }

    async fn verify_signature(&self, commit: &CommitRef) -> Result<SignatureStatus> {
        let state = self.state.lock().unwrap();
        Ok(state
            .commits
            .get(&commit.id)
            .map(|c| c.signature.clone())
            .unwrap_or(SignatureStatus::Unsigned))
    }
}
