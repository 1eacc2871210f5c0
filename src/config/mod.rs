//! Configuration module
//!
//! Handles user configuration (`config.toml` in the platform config
//! directory), layered with `GITSYNC_*` environment variables and CLI flags.

mod settings;

pub use settings::*;
