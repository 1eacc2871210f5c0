//! Outcome rendering
//!
//! Pure presentation over [`SyncOutcome`] and [`RunSummary`]; nothing here
//! feeds back into reconciliation.

use std::fmt::Write as _;

use crate::error::Result;
use crate::orchestrator::RunSummary;
use crate::sync::{FinalState, SyncOutcome};

/// Status column for one outcome
fn status_label(outcome: &SyncOutcome) -> &'static str {
    match outcome.state {
        FinalState::Reconciled => "ok",
        FinalState::Failed(_) if !outcome.is_failure() => "warn",
        FinalState::Failed(_) => "FAILED",
    }
}

/// One human-readable line per repository
pub fn format_outcome(outcome: &SyncOutcome) -> String {
    let mut line = format!(
        "{:<6} {}  [{}]",
        status_label(outcome),
        outcome.repo.display(),
        outcome
            .decision
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
    );

    let mut actions = Vec::new();
    if let Some(commit) = &outcome.commit {
        actions.push(format!(
            "committed {} file(s) as {}",
            outcome.files_committed(),
            commit
        ));
    }
    if outcome.merged {
        actions.push("merged".to_string());
    }
    if outcome.pushed {
        actions.push("pushed".to_string());
    }
    if !actions.is_empty() {
        let _ = write!(line, " {}", actions.join(", "));
    }

    if let Some(failure) = &outcome.failure {
        let _ = write!(line, " {}: {}", failure.kind, failure.message);
    }

    line
}

/// Per-repository lines followed by totals
pub fn format_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    for outcome in &summary.outcomes {
        let _ = writeln!(out, "{}", format_outcome(outcome));
    }

    let _ = write!(
        out,
        "{} repositories: {} reconciled, {} with warnings, {} failed ({:.1}s)",
        summary.outcomes.len(),
        summary.reconciled(),
        summary.warnings(),
        summary.failed(),
        summary.duration_ms as f64 / 1000.0,
    );

    let manual: Vec<String> = summary
        .outcomes
        .iter()
        .filter(|o| o.failure_kind().is_some_and(|k| k.needs_manual_resolution()))
        .map(|o| o.repo.display().to_string())
        .collect();
    if !manual.is_empty() {
        let _ = write!(out, "\nNeeds manual resolution: {}", manual.join(", "));
    }

    out
}

/// Single-line JSON for one outcome
pub fn outcome_json(outcome: &SyncOutcome) -> Result<String> {
    Ok(serde_json::to_string(outcome)?)
}

/// Pretty JSON for a whole run
pub fn summary_json(summary: &RunSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}
