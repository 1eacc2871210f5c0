//! Parsers for git command output
//!
//! All commands are run with `LC_ALL=C`, so the English messages matched
//! here are stable.

use std::sync::LazyLock;

use regex::Regex;

use super::{CommitRef, MergeOutcome, SignatureStatus, StatusEntry};
use crate::error::GitError;

/// Field separator used in `--format` strings
pub const FIELD_SEP: char = '\x1f';

/// `CONFLICT (content): Merge conflict in src/lib.rs`
static CONFLICT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^CONFLICT \([^)]*\): Merge conflict in (.+)$").unwrap());

/// Rejection markers in `git push` stderr
static REJECTED_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[rejected\]|\[remote rejected\]|non-fast-forward|fetch first|Updates were rejected").unwrap()
});

/// Transport-level failures reported by fetch and push
static TRANSPORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)could not read from remote repository|unable to access|could not resolve host|connection (refused|reset|timed out)|operation timed out|network is unreachable|remote end hung up|early EOF|RPC failed|ssh: connect to host",
    )
    .unwrap()
});

/// Parse `git status --porcelain=v1 -z` output
pub fn parse_porcelain_z(output: &str) -> Result<Vec<StatusEntry>, GitError> {
    let mut entries = Vec::new();
    let mut records = output.split('\0').filter(|r| !r.is_empty());

    while let Some(record) = records.next() {
        let mut chars = record.chars();
        let (Some(index), Some(worktree), Some(' ')) = (chars.next(), chars.next(), chars.next())
        else {
            return Err(GitError::Parse(format!("malformed status record: {:?}", record)));
        };

        let mut entry = StatusEntry::new(index, worktree, chars.as_str());

        // Renames and copies carry the source path as a separate record
        if matches!(index, 'R' | 'C') || matches!(worktree, 'R' | 'C') {
            let orig = records
                .next()
                .ok_or_else(|| GitError::Parse(format!("missing rename source for {}", entry.path)))?;
            entry.orig_path = Some(orig.to_string());
        }

        entries.push(entry);
    }

    Ok(entries)
}

/// Parse one `%H<sep>%ct` line
pub fn parse_commit_line(line: &str) -> Result<CommitRef, GitError> {
    let (id, timestamp) = line
        .trim()
        .split_once(FIELD_SEP)
        .ok_or_else(|| GitError::Parse(format!("malformed commit line: {:?}", line)))?;

    let timestamp = timestamp
        .trim()
        .parse::<i64>()
        .map_err(|e| GitError::Parse(format!("bad commit timestamp {:?}: {}", timestamp, e)))?;

    Ok(CommitRef::new(id.trim(), timestamp))
}

/// Parse a `git log --format=%H<sep>%ct` listing
pub fn parse_commit_list(output: &str) -> Result<Vec<CommitRef>, GitError> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(parse_commit_line)
        .collect()
}

/// Parse `%G?<sep>%GS<sep>%GK` into a signature status
pub fn parse_signature_line(line: &str) -> SignatureStatus {
    let mut fields = line.trim_end_matches('\n').split(FIELD_SEP);
    let code = fields.next().unwrap_or("").trim();
    let signer = fields.next().unwrap_or("").trim().to_string();
    let key = fields.next().unwrap_or("").trim().to_string();

    let key_hint = if key.is_empty() {
        String::new()
    } else {
        format!(" (key {})", key)
    };

    match code {
        "G" | "U" => SignatureStatus::Good { signer },
        "N" | "" => SignatureStatus::Unsigned,
        "B" => SignatureStatus::Invalid {
            reason: format!("bad signature{}", key_hint),
        },
        "X" => SignatureStatus::Invalid {
            reason: format!("signature has expired{}", key_hint),
        },
        "Y" => SignatureStatus::Invalid {
            reason: format!("signed with an expired key{}", key_hint),
        },
        "R" => SignatureStatus::Invalid {
            reason: format!("signed with a revoked key{}", key_hint),
        },
        "E" => SignatureStatus::Invalid {
            reason: format!("signature cannot be checked, public key missing{}", key_hint),
        },
        other => SignatureStatus::Invalid {
            reason: format!("unknown signature state '{}'", other),
        },
    }
}

/// Classify a failed `git merge`
///
/// Returns `None` when the failure is not one of the recoverable kinds.
pub fn classify_merge_failure(stdout: &str, stderr: &str) -> Option<MergeOutcome> {
    if stderr.contains("refusing to merge unrelated histories") {
        return Some(MergeOutcome::UnrelatedHistories);
    }

    let conflicts = conflicted_paths(stdout);
    if !conflicts.is_empty() || stdout.contains("Automatic merge failed") {
        return Some(MergeOutcome::Conflict { paths: conflicts });
    }

    if stderr.contains("would be overwritten by merge") {
        return Some(MergeOutcome::Blocked {
            paths: overwritten_paths(stderr),
        });
    }

    None
}

/// Paths named in `CONFLICT` lines
pub fn conflicted_paths(output: &str) -> Vec<String> {
    let mut paths: Vec<String> = CONFLICT_PATTERN
        .captures_iter(output)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .collect();
    paths.dedup();
    paths
}

/// Paths listed under "would be overwritten by merge" (tab indented)
fn overwritten_paths(stderr: &str) -> Vec<String> {
    stderr
        .lines()
        .skip_while(|l| !l.contains("would be overwritten"))
        .skip(1)
        .take_while(|l| l.starts_with('\t'))
        .map(|l| l.trim().to_string())
        .collect()
}

/// Whether `git push` stderr describes a rejected update
pub fn is_push_rejection(stderr: &str) -> bool {
    REJECTED_PATTERN.is_match(stderr)
}

/// Whether git stderr describes a network or transport failure
pub fn is_transport_failure(stderr: &str) -> bool {
    TRANSPORT_PATTERN.is_match(stderr)
}

/// Condense git stderr into a single line for error messages
pub fn summarize_stderr(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("hint:"))
        .collect();
    lines.join("; ")
}
