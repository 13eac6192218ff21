//! `ManagerConfig`: documented defaults, loadable from a TOML file, every
//! field overridable by an environment variable. Validated once, up front,
//! so the rest of the crate never has to guard against a zero timeout or a
//! relative `data_dir`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_data_dir() -> PathBuf {
    PathBuf::from("/data/repos")
}

fn default_max_concurrent_clones() -> usize {
    3
}

fn default_fetch_interval_secs() -> u64 {
    30
}

fn default_inactivity_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_clone_timeout_secs() -> u64 {
    5 * 60
}

fn default_fetch_timeout_secs() -> u64 {
    2 * 60
}

fn default_max_repos() -> usize {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_max_concurrent_clones")]
    pub max_concurrent_clones: usize,
    #[serde(default = "default_fetch_interval_secs")]
    pub fetch_interval_secs: u64,
    #[serde(default = "default_inactivity_ttl_secs")]
    pub inactivity_ttl_secs: u64,
    #[serde(default = "default_clone_timeout_secs")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_max_repos")]
    pub max_repos: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_concurrent_clones: default_max_concurrent_clones(),
            fetch_interval_secs: default_fetch_interval_secs(),
            inactivity_ttl_secs: default_inactivity_ttl_secs(),
            clone_timeout_secs: default_clone_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_repos: default_max_repos(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConfigError {
    ReadFailed { path: PathBuf, message: String },
    ParseFailed { path: PathBuf, message: String },
    Invalid { field: &'static str, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadFailed { path, message } => {
                write!(f, "failed to read config file {}: {message}", path.display())
            }
            ConfigError::ParseFailed { path, message } => {
                write!(f, "failed to parse config file {}: {message}", path.display())
            }
            ConfigError::Invalid { field, message } => {
                write!(f, "invalid config field `{field}`: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl ManagerConfig {
    /// Load from an optional TOML file, then apply `GITVISTA_*` environment
    /// variable overrides, then validate. `None` skips the file and starts
    /// from built-in defaults.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?;
                toml::from_str(&contents).map_err(|e| ConfigError::ParseFailed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            None => ManagerConfig::default(),
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(v) = env_var("GITVISTA_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env_usize("GITVISTA_MAX_CONCURRENT_CLONES") {
            self.max_concurrent_clones = v;
        }
        if let Some(v) = env_u64("GITVISTA_FETCH_INTERVAL_SECS") {
            self.fetch_interval_secs = v;
        }
        if let Some(v) = env_u64("GITVISTA_INACTIVITY_TTL_SECS") {
            self.inactivity_ttl_secs = v;
        }
        if let Some(v) = env_u64("GITVISTA_CLONE_TIMEOUT_SECS") {
            self.clone_timeout_secs = v;
        }
        if let Some(v) = env_u64("GITVISTA_FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = v;
        }
        if let Some(v) = env_usize("GITVISTA_MAX_REPOS") {
            self.max_repos = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.data_dir.is_absolute() {
            return Err(ConfigError::Invalid {
                field: "data_dir",
                message: format!("must be an absolute path, got {}", self.data_dir.display()),
            });
        }
        if self.max_concurrent_clones == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_clones",
                message: "must be > 0".to_string(),
            });
        }
        if self.fetch_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_interval_secs",
                message: "must be > 0".to_string(),
            });
        }
        if self.inactivity_ttl_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "inactivity_ttl_secs",
                message: "must be > 0".to_string(),
            });
        }
        if self.clone_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "clone_timeout_secs",
                message: "must be > 0".to_string(),
            });
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_secs",
                message: "must be > 0".to_string(),
            });
        }
        if self.max_repos == 0 {
            return Err(ConfigError::Invalid {
                field: "max_repos",
                message: "must be > 0".to_string(),
            });
        }
        Ok(())
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.fetch_interval_secs)
    }

    pub fn inactivity_ttl(&self) -> Duration {
        Duration::from_secs(self.inactivity_ttl_secs)
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// `max(inactivity_ttl / 10, 1 minute)`, per spec §4.5.
    pub fn eviction_interval(&self) -> Duration {
        std::cmp::max(self.inactivity_ttl() / 10, Duration::from_secs(60))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_var(name).and_then(|v| v.parse().ok())
}

fn env_usize(name: &str) -> Option<usize> {
    env_var(name).and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ManagerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_repos, 100);
        assert_eq!(config.max_concurrent_clones, 3);
    }

    #[test]
    fn rejects_relative_data_dir() {
        let mut config = ManagerConfig::default();
        config.data_dir = PathBuf::from("relative/path");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "data_dir", .. })
        ));
    }

    #[test]
    fn rejects_zero_max_repos() {
        let mut config = ManagerConfig::default();
        config.max_repos = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "max_repos", .. })
        ));
    }

    #[test]
    fn parses_from_toml() {
        let toml_src = r#"
            data_dir = "/tmp/gitvista-repos"
            max_repos = 5
        "#;
        let config: ManagerConfig = toml::from_str(toml_src).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/gitvista-repos"));
        assert_eq!(config.max_repos, 5);
        assert_eq!(config.max_concurrent_clones, 3);
    }

    #[test]
    fn eviction_interval_has_one_minute_floor() {
        let mut config = ManagerConfig::default();
        config.inactivity_ttl_secs = 1;
        assert_eq!(config.eviction_interval(), Duration::from_secs(60));
    }
}
