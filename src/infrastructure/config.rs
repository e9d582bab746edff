//! Configuration infrastructure
//!
//! Tiered application configuration persisted as JSON in the platform
//! config directory. `user` holds the knobs people actually change,
//! `advanced` the ones they usually should not.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::source::INVALID_SOURCE_TAG;

/// Default values for all configuration options.
pub mod defaults {
    /// Number of concurrent check workers.
    pub const WORKER_COUNT: usize = 6;

    /// Hard per-probe budget in seconds.
    pub const PROBE_TIMEOUT_SECONDS: u64 = 60;

    /// Keyword substituted into search endpoint templates.
    pub const SEARCH_KEYWORD: &str = "novel";

    /// User agent presented to probed sites.
    pub const USER_AGENT: &str =
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) \
         Chrome/124.0.0.0 Safari/537.36";

    /// Connection pool size for the SQLite database.
    pub const MAX_DB_CONNECTIONS: u32 = 5;

    /// Log verbosity when RUST_LOG is not set.
    pub const LOG_LEVEL: &str = "info";

    /// Directory name under the platform config/data dirs.
    pub const APP_DIR_NAME: &str = "sourcecheck";

    /// Config file name inside the config directory.
    pub const CONFIG_FILE_NAME: &str = "config.json";
}

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub user: UserConfig,
    pub advanced: AdvancedConfig,
}

/// Options users are expected to tune.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Concurrent check workers. Zero is treated as one.
    pub worker_count: usize,
    pub verbose_logging: bool,
    pub logging: LoggingConfig,
    pub checker: CheckerConfig,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::WORKER_COUNT,
            verbose_logging: false,
            logging: LoggingConfig::default(),
            checker: CheckerConfig::default(),
        }
    }
}

impl UserConfig {
    /// Worker count with the lower bound applied.
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count.max(1)
    }
}

/// Logging output options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            console_output: true,
            file_output: true,
        }
    }
}

/// Checker behavior options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub probe_timeout_seconds: u64,
    pub invalid_tag: String,
    pub search_keyword: String,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            probe_timeout_seconds: defaults::PROBE_TIMEOUT_SECONDS,
            invalid_tag: INVALID_SOURCE_TAG.to_string(),
            search_keyword: defaults::SEARCH_KEYWORD.to_string(),
        }
    }
}

impl CheckerConfig {
    #[must_use]
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds.max(1))
    }
}

/// Options that rarely need changing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedConfig {
    pub user_agent: String,
    /// CSS selector counting result entries on a probed page. Without one,
    /// any non-empty response body counts as a single hit.
    pub result_selector: Option<String>,
    pub max_db_connections: u32,
    /// Overrides the default database location when set.
    pub database_url: Option<String>,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::USER_AGENT.to_string(),
            result_selector: None,
            max_db_connections: defaults::MAX_DB_CONNECTIONS,
            database_url: None,
        }
    }
}

/// Loads and persists the configuration document.
pub struct ConfigManager {
    config_dir: PathBuf,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Manager rooted at the platform config directory (or the
    /// `SOURCECHECK_CONFIG_DIR` override).
    pub fn new() -> Result<Self> {
        let config_dir = match std::env::var_os("SOURCECHECK_CONFIG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::config_dir()
                .ok_or_else(|| anyhow!("platform config directory is not available"))?
                .join(defaults::APP_DIR_NAME),
        };
        Self::with_config_dir(config_dir)
    }

    /// Manager rooted at an explicit directory.
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Result<Self> {
        let config_dir = config_dir.into();
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("creating config directory {}", config_dir.display()))?;
        let config_path = config_dir.join(defaults::CONFIG_FILE_NAME);
        Ok(Self {
            config_dir,
            config_path,
        })
    }

    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    #[must_use]
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Application data directory (database, logs). Honors the
    /// `SOURCECHECK_DATA_DIR` override.
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let data_dir = match std::env::var_os("SOURCECHECK_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or_else(|| anyhow!("platform data directory is not available"))?
                .join(defaults::APP_DIR_NAME),
        };
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data directory {}", data_dir.display()))?;
        Ok(data_dir)
    }

    /// Reads the stored configuration. A missing file yields defaults; a
    /// corrupted file is backed up and replaced with defaults so a bad edit
    /// never blocks startup.
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            return Ok(AppConfig::default());
        }
        let raw = tokio::fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("reading config file {}", self.config_path.display()))?;
        match serde_json::from_str::<AppConfig>(&raw) {
            Ok(config) => Ok(config),
            Err(err) => {
                let backup = self.config_path.with_extension("json.bak");
                warn!(
                    "config file {} is not valid ({err}); backing it up to {} and using defaults",
                    self.config_path.display(),
                    backup.display()
                );
                if let Err(rename_err) = tokio::fs::rename(&self.config_path, &backup).await {
                    warn!("could not back up corrupted config: {rename_err}");
                }
                let config = AppConfig::default();
                self.save_config(&config).await?;
                Ok(config)
            }
        }
    }

    /// Writes the configuration as pretty JSON.
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(config).context("serializing config")?;
        tokio::fs::write(&self.config_path, json)
            .await
            .with_context(|| format!("writing config file {}", self.config_path.display()))?;
        Ok(())
    }

    /// Loads the configuration, writing the default document on first run
    /// so users have a file to edit.
    pub async fn initialize_on_first_run(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            let config = AppConfig::default();
            self.save_config(&config).await?;
            info!("wrote default config to {}", self.config_path.display());
            return Ok(config);
        }
        self.load_config().await
    }
}
