//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment variables. Secrets (the API token, the encryption
//! passphrase) stay inside this layer and the client; they are never
//! serialized into snapshots, checkpoints, or reports.

use crate::codec::PayloadCodec;
use crate::scan::orchestrator::DEFAULT_CONTINUATION_THRESHOLD;
use crate::scan::retry::RetryPolicy;
use crate::scan::runner::ScanOptions;
use crate::scan::state::{DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE, MIN_BATCH_SIZE};
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

pub const STATE_DIR_ENV: &str = "VIGIL_STATE_DIR";
pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const ENCRYPTION_KEY_ENV: &str = "VIGIL_ENCRYPTION_KEY";
pub const BATCH_SIZE_ENV: &str = "VIGIL_BATCH_SIZE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub scan: ScanSettings,
    pub retry: RetryPolicy,
    pub github: GithubSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    pub batch_size: usize,
    pub continuation_threshold: u32,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            continuation_threshold: DEFAULT_CONTINUATION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GithubSettings {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self { api_base: crate::client::github::DEFAULT_API_BASE.to_string(), token: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StorageSettings {
    /// Overrides `{state_dir}/checkpoints`.
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

impl Config {
    /// Load configuration. An explicit path must exist; without one,
    /// `{state_dir}/config.toml` is used when present and defaults apply
    /// otherwise. Environment variables win over file values.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = state_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.merge_env_vars();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn merge_env_vars(&mut self) {
        if let Ok(token) = std::env::var(TOKEN_ENV) {
            if !token.is_empty() {
                self.github.token = Some(token);
            }
        }

        if let Ok(key) = std::env::var(ENCRYPTION_KEY_ENV) {
            if !key.is_empty() {
                self.storage.encryption_key = Some(key);
            }
        }

        if let Ok(batch_size) = std::env::var(BATCH_SIZE_ENV) {
            match batch_size.parse::<usize>() {
                Ok(value) => self.scan.batch_size = value,
                Err(_) => warn!("Ignoring non-numeric {BATCH_SIZE_ENV}={batch_size}"),
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.scan.batch_size) {
            return Err(anyhow!(
                "batch size must be between {MIN_BATCH_SIZE} and {MAX_BATCH_SIZE}, got {}",
                self.scan.batch_size
            ));
        }
        if self.scan.continuation_threshold == 0 {
            return Err(anyhow!("continuation threshold must be positive"));
        }
        Ok(())
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.storage
            .checkpoint_dir
            .clone()
            .unwrap_or_else(|| state_dir().join("checkpoints"))
    }

    /// Codec for sealing checkpoints, when an encryption key is set.
    pub fn codec(&self) -> Option<PayloadCodec> {
        self.storage
            .encryption_key
            .as_deref()
            .map(PayloadCodec::from_passphrase)
    }

    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            batch_size: self.scan.batch_size,
            continuation_threshold: self.scan.continuation_threshold,
            policy: self.retry.clone(),
        }
    }
}

/// Root state directory: `$VIGIL_STATE_DIR`, or `~/.vigil`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(STATE_DIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".vigil"))
        .unwrap_or_else(|| PathBuf::from(".vigil"))
}
