use crate::error::HarnessError;
use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "ASYNC_TESTCASE_CONFIG";

/// Configuration file looked up in the current directory
pub const LOCAL_CONFIG_FILE: &str = "async-testcase.toml";

pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_POLL_SLICE_MS: u64 = 10;
pub const DEFAULT_LISTENER_THREAD_NAME: &str = "async-testcase-listener";
pub const DEFAULT_TRANSFER_BUFFER_SIZE: usize = 4096;

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Timeout used when a test does not pass one explicitly
    pub default_timeout_ms: u64,
    /// Length of one caller event-loop slice while waiting
    pub poll_slice_ms: u64,
    /// Name given to the listener thread
    pub listener_thread_name: String,
    /// Linked pipe buffer size and per-stream read chunk
    pub transfer_buffer_size: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_slice_ms: DEFAULT_POLL_SLICE_MS,
            listener_thread_name: DEFAULT_LISTENER_THREAD_NAME.to_string(),
            transfer_buffer_size: DEFAULT_TRANSFER_BUFFER_SIZE,
        }
    }
}

impl HarnessConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }

    /// Builder-style override of the poll slice
    pub fn with_poll_slice(mut self, slice: Duration) -> Self {
        self.poll_slice_ms = u64::try_from(slice.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    /// Builder-style override of the default timeout
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Check invariants the harness relies on
    pub fn validate(&self) -> std::result::Result<(), HarnessError> {
        if self.poll_slice_ms == 0 {
            return Err(HarnessError::Config(
                "poll_slice_ms must be greater than zero".to_string(),
            ));
        }
        if self.transfer_buffer_size == 0 {
            return Err(HarnessError::Config(
                "transfer_buffer_size must be greater than zero".to_string(),
            ));
        }
        if self.listener_thread_name.trim().is_empty() {
            return Err(HarnessError::Config(
                "listener_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: HarnessConfig =
            toml::from_str(content).context("Failed to parse harness configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid configuration file: {}", path.display()))
    }

    /// Get the per-user config file path
    pub fn default_config_file() -> Result<PathBuf> {
        ProjectDirs::from("dev", "async-testcase", "async-testcase")
            .map(|proj_dirs| proj_dirs.config_dir().join("config.toml"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))
    }

    /// Resolve which configuration file applies, if any
    ///
    /// The environment variable wins, then the working directory, then the
    /// per-user config directory.
    pub fn locate() -> Option<PathBuf> {
        if let Some(path) = std::env::var_os(CONFIG_ENV_VAR) {
            return Some(PathBuf::from(path));
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            return Some(local);
        }

        Self::default_config_file().ok().filter(|path| path.exists())
    }

    /// Load configuration from the first file found, falling back to defaults
    pub fn load() -> Result<Self> {
        match Self::locate() {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::default()),
        }
    }
}
