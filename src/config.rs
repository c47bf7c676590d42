use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Name of the per-workspace configuration file.
pub const CONFIG_FILE: &str = "workspace-files.toml";

/// Configuration loaded from `workspace-files.toml` at the workspace root.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// When false the root collection is empty.
    pub enabled: bool,
    /// `;`-separated glob patterns. Entries matching any of them are hidden.
    pub ignore_patterns: String,
    /// Quiescence delay before a watched directory is reconciled.
    pub debounce_ms: u64,
    /// Age after which cached git status is rescanned.
    pub status_ttl_secs: u64,
    /// Hard timeout for the external status command.
    pub status_timeout_secs: u64,
    /// Default cap on emitted search results.
    pub search_limit: usize,
    /// Subscribe to change notifications for directories that were never expanded.
    pub watch_unexpanded: bool,
    /// Upper bound on parent directories searched for `.gitignore` and `.git`.
    pub max_ancestor_depth: usize,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignore_patterns: String::new(),
            debounce_ms: 250,
            status_ttl_secs: 5,
            status_timeout_secs: 5,
            search_limit: 200,
            watch_unexpanded: false,
            max_ancestor_depth: 10,
        }
    }
}

impl WorkspaceConfig {
    /// Load configuration from `workspace-files.toml` in the given directory.
    ///
    /// Returns the defaults if the file does not exist or cannot be parsed.
    pub fn load(root: &Path) -> Self {
        let config_path = root.join(CONFIG_FILE);

        if !config_path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => config,
                Err(err) => {
                    warn!(path = %config_path.display(), %err, "failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(err) => {
                warn!(path = %config_path.display(), %err, "failed to read config, using defaults");
                Self::default()
            }
        }
    }

    /// The configured patterns, trimmed, with empty segments dropped.
    pub fn patterns(&self) -> Vec<&str> {
        self.ignore_patterns
            .split(';')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect()
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_secs(self.status_timeout_secs)
    }
}
