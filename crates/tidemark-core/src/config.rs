//! Configuration module for Tidemark.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration for Tidemark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sync: SyncConfig,
    pub transfers: TransferConfig,
    pub privacy: PrivacyConfig,
    pub logging: LoggingConfig,
}

/// Synchronization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root directory for the local mirror.
    pub local_root: PathBuf,
    /// Cap on files discovered by the initial full walk of one selected
    /// folder. `None` walks everything.
    pub first_sync_max_files: Option<u64>,
    /// Whether to persist a session-log row per sync session.
    pub detailed_logging: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("~"))
                .join("Tidemark"),
            first_sync_max_files: None,
            detailed_logging: false,
        }
    }
}

/// Transfer executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Concurrent upload permits (minimum 1).
    pub upload_parallelism: usize,
    /// Concurrent download permits (minimum 1).
    pub download_parallelism: usize,
    /// Concurrent local-scan permits (minimum 1).
    pub scan_parallelism: usize,
}

impl TransferConfig {
    /// Default permit count for each transfer pool
    pub const DEFAULT_PARALLELISM: usize = 3;
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            upload_parallelism: Self::DEFAULT_PARALLELISM,
            download_parallelism: Self::DEFAULT_PARALLELISM,
            scan_parallelism: Self::DEFAULT_PARALLELISM,
        }
    }
}

/// Privacy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    /// Salt for the one-way account-id hash. Must stay stable for the life
    /// of an installation, or persisted rows become unreachable.
    pub account_salt: String,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            account_salt: "tidemark".to_string(),
        }
    }
}

/// Logging / tracing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
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
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&content)?;
        Ok(config.normalized())
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        Self::load(path).unwrap_or_default()
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tidemark/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tidemark")
            .join("config.yaml")
    }

    /// Clamp user-supplied values into their valid ranges.
    ///
    /// Parallelism settings have a hard minimum of 1.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.transfers.upload_parallelism = self.transfers.upload_parallelism.max(1);
        self.transfers.download_parallelism = self.transfers.download_parallelism.max(1);
        self.transfers.scan_parallelism = self.transfers.scan_parallelism.max(1);
        if self.privacy.account_salt.is_empty() {
            self.privacy.account_salt = PrivacyConfig::default().account_salt;
        }
        self
    }
}
