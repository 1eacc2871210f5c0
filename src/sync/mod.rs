//! Reconciliation engine
//!
//! - `changes` - Change Inspector, classifies the working tree
//! - `staging` - Staging Manager and commit messages
//! - `verify` - Commit signature verification
//! - `reconciler` - Fetch/decide/merge/push state machine
//! - `outcome` - Per-repository results

mod changes;
mod outcome;
mod reconciler;
mod staging;
mod verify;

pub use changes::*;
pub use outcome::*;
pub use reconciler::*;
pub use staging::*;
pub use verify::{SignatureVerifier, VerificationResult, VerificationStatus, evaluate, failures};
