//! `vmconverge` configuration file.
//!
//! Every key has a default, so a missing default-location file is fine; an
//! explicitly named file must exist.

use anyhow::{Context, Result, bail};
use armclient::ArmConfig;
use converge::{ReconcileOptions, WaitPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Get the config directory path
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("vmconverge"))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub provider: ProviderConfig,
    pub reconcile: ReconcileConfig,
    pub wait: WaitConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_version: String,
    /// Environment variable holding the bearer token
    pub token_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://management.azure.com".to_string(),
            api_version: "2024-07-01".to_string(),
            token_env: "VMCONVERGE_TOKEN".to_string(),
            request_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconcileConfig {
    pub timeout_secs: u64,
    pub leave_offline: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 1800,
            leave_offline: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaitConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_factor: f64,
    pub jitter: f64,
    pub max_transient_errors: u32,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 2000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            jitter: 0.2,
            max_transient_errors: 5,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location if `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
                Self::load_file(&expanded)
            }
            None => {
                let path = config_dir()?.join("config.toml");
                if path.exists() {
                    Self::load_file(&path)
                } else {
                    log::debug!("no config at {}, using defaults", path.display());
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> Result<()> {
        if self.wait.backoff_factor < 1.0 {
            bail!("wait.backoff_factor must be at least 1.0");
        }
        if !(0.0..=1.0).contains(&self.wait.jitter) {
            bail!("wait.jitter must be between 0.0 and 1.0");
        }
        if self.wait.initial_delay_ms > self.wait.max_delay_ms {
            bail!("wait.initial_delay_ms must not exceed wait.max_delay_ms");
        }
        Ok(())
    }

    pub fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy {
            initial_delay: Duration::from_millis(self.wait.initial_delay_ms),
            max_delay: Duration::from_millis(self.wait.max_delay_ms),
            backoff_factor: self.wait.backoff_factor,
            jitter: self.wait.jitter,
            max_transient_errors: self.wait.max_transient_errors,
        }
    }

    /// Pass options; the flag can only turn `leave_offline` on.
    pub fn reconcile_options(&self, leave_offline: bool) -> ReconcileOptions {
        ReconcileOptions {
            timeout: Duration::from_secs(self.reconcile.timeout_secs),
            wait: self.wait_policy(),
            leave_offline: leave_offline || self.reconcile.leave_offline,
            dry_run: false,
            expected_fingerprint: None,
        }
    }

    /// Provider settings with the token read from the environment.
    pub fn arm_config(&self) -> Result<ArmConfig> {
        let mut config = ArmConfig::new(&self.provider.endpoint, &self.provider.api_version)
            .with_token_from_env(&self.provider.token_env)?;
        config.request_timeout = Duration::from_secs(self.provider.request_timeout_secs);
        Ok(config)
    }
}
