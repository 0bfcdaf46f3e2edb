use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "EXEKAWAII_CONFIG";
pub const SETTINGS_DIR_ENV: &str = "EXEKAWAII_SETTINGS_DIR";
pub const USER_HOME_ENV: &str = "EXEKAWAII_USER_HOME";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub execution: ExecutionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct StorageConfig {
    // Root holding `commands/` and `inputs/`; defaults to ~/.exekawaii/settings
    pub settings_dir: Option<PathBuf>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ExecutionConfig {
    pub shell: String,
    pub login_shell: bool,
    pub timeout_secs: u64,
    // Home the commands run as; defaults to the current user's home
    pub user_home: Option<PathBuf>,
    // Variables removed from the inherited environment before overrides apply
    pub strip_env: Vec<String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            shell: "bash".to_string(),
            login_shell: true,
            timeout_secs: 300,
            user_home: None,
            strip_env: vec!["LD_LIBRARY_PATH".to_string(), "LD_PRELOAD".to_string()],
        }
    }
}

impl ExecutionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads the config file, or the defaults when there is none, then applies
    /// environment overrides. Nothing is written; see [`Config::write_default`].
    pub fn new() -> Result<Self> {
        let config_path = Self::config_path();

        let mut config = if config_path.exists() {
            Self::load_from(&config_path)?
        } else {
            Config::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Writes the default config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default(path: &Path) -> Result<bool> {
        if path.exists() {
            return Ok(false);
        }
        Config::default().save_to(path)?;
        Ok(true)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            fs::create_dir_all(config_dir)
                .with_context(|| format!("failed to create {}", config_dir.display()))?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(dir) = std::env::var_os(SETTINGS_DIR_ENV).filter(|v| !v.is_empty()) {
            self.storage.settings_dir = Some(PathBuf::from(dir));
        }
        if let Some(home) = std::env::var_os(USER_HOME_ENV).filter(|v| !v.is_empty()) {
            self.execution.user_home = Some(PathBuf::from(home));
        }
    }

    pub fn config_path() -> PathBuf {
        match std::env::var_os(CONFIG_ENV).filter(|v| !v.is_empty()) {
            Some(path) => PathBuf::from(path),
            None => Self::app_dir().join("config.toml"),
        }
    }

    fn app_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".exekawaii")
    }

    pub fn settings_dir(&self) -> PathBuf {
        self.storage
            .settings_dir
            .clone()
            .unwrap_or_else(|| Self::app_dir().join("settings"))
    }

    pub fn user_home(&self) -> PathBuf {
        self.execution
            .user_home
            .clone()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/"))
    }
}
