//! Service configuration.
//!
//! Values come from an optional YAML file with per-field defaults; CLI flags
//! override whatever the file provided.  TTLs and intervals are stored as
//! whole seconds in the file and exposed as [`Duration`]s to the rest of the
//! code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::Cli;

// ---------------------------------------------------------------------------
// Deletion policy
// ---------------------------------------------------------------------------

/// What to do when removing a repository directory fails after its last
/// branch was deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeletePolicy {
    /// Log the failure and move on; the repo record stays in the index until
    /// a later delete succeeds.
    #[default]
    Ignore,
    /// Re-attempt deletion of branchless repositories on every maintenance
    /// tick.
    Retry,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// HTTP port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Logging level (debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Folder to store cached repos.  Must exist before startup.
    #[serde(default = "default_storage_folder")]
    pub storage_folder: PathBuf,
    /// Seconds a branch remains cached since last access; 0 disables eviction.
    #[serde(default = "default_repo_ttl")]
    pub repo_ttl: u64,
    /// Seconds a validated token remains trusted after last use.
    #[serde(default = "default_token_ttl")]
    pub token_ttl: u64,
    /// Seconds between maintenance ticks.
    #[serde(default = "default_repo_check_interval")]
    pub repo_check_interval: u64,
    #[serde(default)]
    pub delete_policy: DeletePolicy,
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_storage_folder() -> PathBuf {
    PathBuf::from("./cached-repos")
}

fn default_repo_ttl() -> u64 {
    86_400
}

fn default_token_ttl() -> u64 {
    86_400
}

fn default_repo_check_interval() -> u64 {
    300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            storage_folder: default_storage_folder(),
            repo_ttl: default_repo_ttl(),
            token_ttl: default_token_ttl(),
            repo_check_interval: default_repo_check_interval(),
            delete_policy: DeletePolicy::default(),
        }
    }
}

impl Config {
    pub fn repo_ttl(&self) -> Duration {
        Duration::from_secs(self.repo_ttl)
    }

    pub fn token_ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }

    pub fn repo_check_interval(&self) -> Duration {
        Duration::from_secs(self.repo_check_interval)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load the configuration: YAML file (when present) merged with CLI overrides.
pub fn load(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => read_file(path)?,
        None => {
            let default_path = Path::new("config.yaml");
            if default_path.is_file() {
                read_file(default_path)?
            } else {
                Config::default()
            }
        }
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(ref level) = cli.log_level {
        config.log_level = level.clone();
    }
    if let Some(ref folder) = cli.storage_folder {
        config.storage_folder = folder.clone();
    }
    if let Some(ttl) = cli.repo_ttl {
        config.repo_ttl = ttl;
    }
    if let Some(ttl) = cli.token_ttl {
        config.token_ttl = ttl;
    }
    if let Some(interval) = cli.repo_check_interval {
        config.repo_check_interval = interval;
    }

    Ok(config)
}

fn read_file(path: &Path) -> Result<Config> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.storage_folder, PathBuf::from("./cached-repos"));
        assert_eq!(config.repo_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.token_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.repo_check_interval(), Duration::from_secs(300));
        assert_eq!(config.delete_policy, DeletePolicy::Ignore);
    }

    #[test]
    fn parses_kebab_case_yaml() {
        let yaml = "\
port: 9090
log-level: debug
storage-folder: /tmp/cache
repo-ttl: 120
token-ttl: 60
repo-check-interval: 30
delete-policy: retry
";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.storage_folder, PathBuf::from("/tmp/cache"));
        assert_eq!(config.repo_ttl, 120);
        assert_eq!(config.token_ttl, 60);
        assert_eq!(config.repo_check_interval, 30);
        assert_eq!(config.delete_policy, DeletePolicy::Retry);
    }

    #[test]
    fn partial_yaml_falls_back_to_defaults() {
        let config: Config = serde_yaml::from_str("port: 1234\n").unwrap();
        assert_eq!(config.port, 1234);
        assert_eq!(config.repo_ttl, 86_400);
        assert_eq!(config.delete_policy, DeletePolicy::Ignore);
    }
}
