//! gitsync - keeps git working copies reconciled with their remote
//!
//! For each repository the engine fetches, commits local edits, decides
//! whether the branch is in sync, behind, ahead or diverged, and then
//! merges or pushes. Anything that needs human judgment (conflicts,
//! unrelated histories, divergence, bad signatures) stops that repository
//! with an actionable failure instead of being resolved automatically.
//!
//! # Modules
//!
//! - [`git`] - `VcsBackend` capability set, git CLI adapter, repository handle
//! - [`sync`] - Change inspection, staging, signature checks, reconciler
//! - [`orchestrator`] - Repository lists and the bounded worker pool
//! - [`report`] - Text and JSON rendering of outcomes
//! - [`config`] - Layered configuration
//! - [`error`] - Error types and failure classification

pub mod config;
pub mod error;
pub mod git;
pub mod logging;
pub mod orchestrator;
pub mod report;
pub mod sync;

pub use config::Config;
pub use error::{Error, FailureKind, Result};
pub use sync::{SyncDecision, SyncOutcome, sync_repository};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
