//! User configuration settings
//!
//! Layered configuration: defaults → config file → environment variables → CLI args

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};

/// Default number of repositories reconciled at the same time
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default per-repository timeout in seconds
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 300;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the single tracked remote
    pub remote: String,

    /// Branch to reconcile (defaults to the currently checked-out branch)
    pub branch: Option<String>,

    /// Verify commit signatures before merging or pushing
    pub require_signature: bool,

    /// Substring the signer identity must contain (case-sensitive)
    pub required_signer: Option<String>,

    /// Operator opt-in: retry merges with `--allow-unrelated-histories`
    pub allow_unrelated_histories: bool,

    /// Maximum repositories reconciled concurrently
    pub max_concurrency: usize,

    /// Per-repository timeout in seconds (0 = no timeout)
    pub task_timeout_secs: u64,

    /// Retries for transient network failures (fetch/push)
    pub network_retries: u32,

    /// Prefix of generated commit messages
    pub commit_message_prefix: String,

    /// Git executable used for mutating operations
    pub git_program: String,

    /// Enable debug logging
    pub debug: bool,

    /// Log file path (if set, logs to file instead of stderr)
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: "origin".to_string(),
            branch: None,
            require_signature: false,
            required_signer: None,
            allow_unrelated_histories: false,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            task_timeout_secs: DEFAULT_TASK_TIMEOUT_SECS,
            network_retries: 1,
            commit_message_prefix: "Automatic Commit".to_string(),
            git_program: "git".to_string(),
            debug: false,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        let config_path = Self::config_file_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration using a specific config file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config: Config = Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Config::default()))
            // Layer config file if it exists
            .merge(Toml::file(config_path))
            // Layer environment variables (GITSYNC_REMOTE, GITSYNC_MAX_CONCURRENCY, ...)
            .merge(Env::prefixed("GITSYNC_"))
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.remote.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "remote".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        if self.max_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Signer requirement, only when signature checks are enabled
    pub fn signer_requirement(&self) -> Option<&str> {
        if self.require_signature {
            self.required_signer.as_deref().filter(|s| !s.is_empty())
        } else {
            None
        }
    }

    /// Per-repository timeout, `None` when disabled
    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    /// Get the configuration file path
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = Self::project_dirs()?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Save current configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_file_path()?;
        self.save_to(&config_path)
    }

    /// Save current configuration to a specific file
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::SaveFailed(format!("{}: {}", parent.display(), e)))?;
        }

        let toml =
            toml::to_string_pretty(self).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        std::fs::write(config_path, toml).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;

        Ok(())
    }

    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "gitsync", "gitsync").ok_or_else(|| {
            Error::Config(ConfigError::LoadFailed(
                "Could not determine home directory".to_string(),
            ))
        })
    }
}
