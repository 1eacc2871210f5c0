//! Multi-repository orchestration
//!
//! Reads a repository list and reconciles every entry under a bounded
//! worker pool. One repository's failure never stops its siblings.

mod pool;
mod repo_list;
mod task;

pub use pool::*;
pub use repo_list::*;
pub use task::*;
