use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::{MAX_PAGE_LIMIT, MIN_PAGE_LIMIT};

pub const DEFAULT_BASE_URL: &str = "http://localhost:3030";
pub const BASE_URL_ENV: &str = "DOCDECK_BASE_URL";
pub const CONFIG_DIR_ENV: &str = "DOCDECK_CONFIG_DIR";
const APP_DIR: &str = "docdeck";
const CONFIG_FILE: &str = "config.toml";
const SESSION_FILE: &str = "session.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub health_interval_ms: u64,
    pub default_limit: u32,
    /// Rows above and below the viewport within which cards mount.
    pub mount_margin_rows: usize,
    pub use_keyring: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_ms: 10_000,
            health_interval_ms: 3_000,
            default_limit: 100,
            mount_margin_rows: 4,
            use_keyring: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl AppConfig {
    /// Loads the default config file, then applies `DOCDECK_BASE_URL`.
    pub fn load_default() -> Result<Self, ConfigError> {
        let config = Self::load_from_path(default_config_path()?)?;
        Ok(config.with_base_url_override(env::var(BASE_URL_ENV).ok()))
    }

    /// A missing or empty file yields the defaults.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_base_url_override(mut self, base_url: Option<String>) -> Self {
        if let Some(base_url) = base_url.filter(|url| !url.trim().is_empty()) {
            self.base_url = base_url.trim().to_string();
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !(MIN_PAGE_LIMIT..=MAX_PAGE_LIMIT).contains(&self.default_limit) {
            return Err(ConfigError::Invalid {
                field: "default_limit",
                reason: format!("must be between {MIN_PAGE_LIMIT} and {MAX_PAGE_LIMIT}"),
            });
        }
        if self.health_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "health_interval_ms",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }
        let rendered =
            toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })?;
        fs::write(path, rendered).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    let base_dir = if let Some(custom) = env::var_os(CONFIG_DIR_ENV) {
        PathBuf::from(custom)
    } else if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join(APP_DIR))
}

pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join(CONFIG_FILE))
}

pub fn default_session_path() -> Result<PathBuf, ConfigError> {
    Ok(default_config_dir()?.join(SESSION_FILE))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, DEFAULT_BASE_URL};

    #[test]
    fn missing_config_file_yields_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let config = AppConfig::load_from_path(temp_dir.path().join("config.toml"))
            .expect("failed to load config");

        assert_eq!(config, AppConfig::default());
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.health_interval().as_secs(), 3);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "base_url = \"http://store:9000\"\ndefault_limit = 25\n")
            .expect("failed to write config");

        let config = AppConfig::load_from_path(&path).expect("failed to load config");
        assert_eq!(config.base_url, "http://store:9000");
        assert_eq!(config.default_limit, 25);
        assert_eq!(config.request_timeout_ms, AppConfig::default().request_timeout_ms);
    }

    #[test]
    fn persist_and_reload_round_trip() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("nested").join("config.toml");
        let config = AppConfig {
            use_keyring: true,
            mount_margin_rows: 10,
            ..AppConfig::default()
        };

        config.persist(&path).expect("failed to persist config");
        let reloaded = AppConfig::load_from_path(&path).expect("failed to reload config");
        assert_eq!(reloaded, config);
    }

    #[test]
    fn out_of_range_limit_is_rejected() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "default_limit = 5000\n").expect("failed to write config");

        let err = AppConfig::load_from_path(&path).expect_err("limit should be rejected");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "default_limit",
                ..
            }
        ));
    }

    #[test]
    fn malformed_file_reports_parse_error() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "base_url = [").expect("failed to write config");

        assert!(matches!(
            AppConfig::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn base_url_override_ignores_blank_values() {
        let config = AppConfig::default().with_base_url_override(Some("  ".to_string()));
        assert_eq!(config.base_url, DEFAULT_BASE_URL);

        let config = config.with_base_url_override(Some(" http://remote:3030 ".to_string()));
        assert_eq!(config.base_url, "http://remote:3030");
    }
}
