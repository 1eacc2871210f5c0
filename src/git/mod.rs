//! Git integration
//!
//! - `VcsBackend` - Capability set the reconciler drives
//! - `GitCli` - Adapter over the `git` binary, opened through gitoxide
//! - `RepositoryHandle` - One working copy plus its tracked remote

mod backend;
mod cli;
mod handle;
pub mod parse;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::*;
pub use cli::*;
pub use handle::*;
