//! Line-delimited repository lists

use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};

/// Parse one repository path per line
///
/// Surrounding whitespace and quotes are stripped; blank lines and lines
/// starting with `#` are skipped.
pub fn parse_repo_list(contents: &str) -> Vec<PathBuf> {
    contents
        .lines()
        .map(|line| line.trim().trim_matches(|c| c == '"' || c == '\'').trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Read a repository list; an empty list is an error
pub async fn read_repo_list(path: &Path) -> Result<Vec<PathBuf>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| ConfigError::RepoList {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let repos = parse_repo_list(&contents);
    if repos.is_empty() {
        return Err(ConfigError::RepoList {
            path: path.to_path_buf(),
            reason: "no repositories listed".to_string(),
        }
        .into());
    }
    Ok(repos)
}
