//! Bounded worker pool
//!
//! Dispatches one task per repository with at most `max_concurrency`
//! running at a time. Paths start in list order as permits free up. Each
//! task runs in its own spawned future so a panic or timeout is confined
//! to that repository's outcome.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};
use uuid::Uuid;

use super::RepoTask;
use crate::config::DEFAULT_MAX_CONCURRENCY;
use crate::sync::SyncOutcome;

/// Aggregate of one multi-repository run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// One outcome per input path, in input order
    pub outcomes: Vec<SyncOutcome>,
}

impl RunSummary {
    pub fn reconciled(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.failure_kind().is_none())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Outcomes with a soft failure only
    pub fn warnings(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.failure_kind().is_some() && !o.is_failure())
            .count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Process exit code; per-repository failures only count when asked to
    pub fn exit_code(&self, fail_on_error: bool) -> i32 {
        if fail_on_error && self.has_failures() {
            1
        } else {
            0
        }
    }
}

/// Runs a [`RepoTask`] across many repositories
pub struct WorkerPool<T> {
    task: Arc<T>,
    max_concurrency: usize,
    timeout: Option<Duration>,
    shutdown: Option<watch::Receiver<bool>>,
}

impl<T: RepoTask> WorkerPool<T> {
    pub fn new(task: T) -> Self {
        Self {
            task: Arc::new(task),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: None,
            shutdown: None,
        }
    }

    /// Upper bound on simultaneously running tasks (at least 1)
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    /// Per-repository time budget
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop dequeuing once the receiver reads `true`
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    fn shutting_down(&self) -> bool {
        self.shutdown.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Run every repository and wait for all of them
    pub async fn run(&self, repos: &[PathBuf]) -> RunSummary {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let span = info_span!("run", %run_id);
        let outcomes = self.run_all(repos).instrument(span).await;

        RunSummary {
            run_id,
            started_at,
            duration_ms: started.elapsed().as_millis() as u64,
            outcomes,
        }
    }

    /// One outcome per path, in input order
    pub async fn run_all(&self, repos: &[PathBuf]) -> Vec<SyncOutcome> {
        info!(
            repos = repos.len(),
            max_concurrency = self.max_concurrency,
            "Starting reconciliation"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut outcomes: Vec<Option<SyncOutcome>> = vec![None; repos.len()];

        for (index, repo) in repos.iter().enumerate() {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => break,
            };
            if self.shutting_down() {
                warn!("Shutdown requested, not starting remaining repositories");
                break;
            }

            let task = Arc::clone(&self.task);
            let repo = repo.clone();
            let timeout = self.timeout;
            tasks.spawn(async move {
                let outcome = run_one(task, repo, timeout).await;
                drop(permit);
                (index, outcome)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => outcomes[index] = Some(outcome),
                Err(e) => error!("Worker task failed: {}", e),
            }
        }

        let cancelled = self.shutting_down();
        outcomes
            .into_iter()
            .zip(repos)
            .map(|(outcome, repo)| {
                outcome.unwrap_or_else(|| {
                    if cancelled {
                        SyncOutcome::cancelled(repo)
                    } else {
                        SyncOutcome::backend_failure(repo, "worker task was lost")
                    }
                })
            })
            .collect()
    }
}

/// Convenience wrapper over [`WorkerPool::run_all`]
pub async fn run_all<T: RepoTask>(
    task: T,
    repos: &[PathBuf],
    max_concurrency: usize,
) -> Vec<SyncOutcome> {
    WorkerPool::new(task)
        .with_max_concurrency(max_concurrency)
        .run_all(repos)
        .await
}

async fn run_one<T: RepoTask>(
    task: Arc<T>,
    repo: PathBuf,
    timeout: Option<Duration>,
) -> SyncOutcome {
    let span = info_span!("repo", path = %repo.display());
    let worker = {
        let repo = repo.clone();
        tokio::spawn(async move { task.run(&repo).await }.instrument(span))
    };
    let abort = worker.abort_handle();

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, worker).await {
            Ok(joined) => joined,
            Err(_) => {
                abort.abort();
                warn!(repo = %repo.display(), "Timed out after {:?}", limit);
                return SyncOutcome::timed_out(&repo, limit);
            }
        },
        None => worker.await,
    };

    joined.unwrap_or_else(|e| {
        error!(repo = %repo.display(), "Reconciliation task failed: {}", e);
        SyncOutcome::backend_failure(&repo, format!("reconciliation task failed: {}", e))
    })
}
