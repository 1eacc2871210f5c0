//! Commit signature verification

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::git::{CommitRef, SignatureStatus, VcsBackend};

/// Verdict for one commit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationStatus {
    Valid,
    Unsigned,
    InvalidSignature,
    SignerMismatch,
}

/// Verification result for one commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub commit: CommitRef,
    pub status: VerificationStatus,
    pub reason: String,
}

impl VerificationResult {
    pub fn is_valid(&self) -> bool {
        self.status == VerificationStatus::Valid
    }
}

/// Map a backend signature state to a verdict
///
/// `required_signer` matches as a case-sensitive substring of the signer
/// identity.
pub fn evaluate(
    commit: &CommitRef,
    status: SignatureStatus,
    required_signer: Option<&str>,
) -> VerificationResult {
    let mut commit = commit.clone();
    let (status, reason) = match status {
        SignatureStatus::Unsigned => (
            VerificationStatus::Unsigned,
            "commit is not signed".to_string(),
        ),
        SignatureStatus::Invalid { reason } => (VerificationStatus::InvalidSignature, reason),
        SignatureStatus::Good { signer } => {
            let matches = required_signer.is_none_or(|required| signer.contains(required));
            commit.signer = Some(signer.clone());
            if matches {
                (VerificationStatus::Valid, format!("signed by {}", signer))
            } else {
                (
                    VerificationStatus::SignerMismatch,
                    format!(
                        "signed by {}, expected {}",
                        signer,
                        required_signer.unwrap_or_default()
                    ),
                )
            }
        }
    };

    VerificationResult {
        commit,
        status,
        reason,
    }
}

/// Keep only the failed results
pub fn failures(results: Vec<VerificationResult>) -> Vec<VerificationResult> {
    results.into_iter().filter(|r| !r.is_valid()).collect()
}

/// Checks commit signatures through a backend
pub struct SignatureVerifier<'a, B> {
    backend: &'a B,
}

impl<'a, B: VcsBackend> SignatureVerifier<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// One result per commit, in input order
    pub async fn verify(
        &self,
        commits: &[CommitRef],
        required_signer: Option<&str>,
    ) -> Result<Vec<VerificationResult>> {
        let mut results = Vec::with_capacity(commits.len());

        for commit in commits {
            let status = self.backend.verify_signature(commit).await?;
            let result = evaluate(commit, status, required_signer);
            if result.is_valid() {
                debug!("{}: {}", commit, result.reason);
            } else {
                warn!("{}: {:?} ({})", commit, result.status, result.reason);
            }
            results.push(result);
        }

        Ok(results)
    }
}
