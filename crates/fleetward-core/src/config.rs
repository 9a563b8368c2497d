use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::paths::validated_relative_path;

const DEFAULT_RELEASE_ENDPOINT: &str =
    "https://api.github.com/repos/actions/runner/releases/latest";
const DEFAULT_DOWNLOAD_URL_TEMPLATE: &str =
    "https://github.com/actions/runner/releases/download/v{version}/{file}";
const DEFAULT_MANIFEST_FILE: &str = ".runner-manifest.toml";
const DEFAULT_SERVICE_FILE: &str = ".service";
const DEFAULT_WORKER_PROCESS: &str = "Runner.Worker";
const MAX_CPU_SAMPLE_MILLIS: u64 = 3_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UpgradeConfig {
    pub release: ReleaseConfig,
    pub service: ServiceConfig,
    pub busy: BusyConfig,
    pub disk: DiskConfig,
    pub backup: BackupConfig,
    pub verify: VerifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReleaseConfig {
    pub endpoint: String,
    pub download_url_template: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Overrides the name recorded in the installation's service file.
    pub name: Option<String>,
    pub service_file: String,
    pub use_sudo: bool,
    pub settle_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusyConfig {
    pub poll_interval_secs: u64,
    pub cpu_threshold_percent: f64,
    pub cpu_sample_millis: u64,
    pub worker_process_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiskConfig {
    pub minimum_free_gb: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackupConfig {
    pub state_files: Vec<String>,
    /// Overrides the sibling `.<name>.fleetward` state directory.
    pub state_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifyConfig {
    pub required_entries: Vec<String>,
    pub manifest_file: String,
}

impl Default for ReleaseConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_RELEASE_ENDPOINT.to_string(),
            download_url_template: DEFAULT_DOWNLOAD_URL_TEMPLATE.to_string(),
            timeout_secs: 60,
            user_agent: format!("fleetward/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: None,
            service_file: DEFAULT_SERVICE_FILE.to_string(),
            use_sudo: false,
            settle_timeout_secs: 30,
        }
    }
}

impl Default for BusyConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            cpu_threshold_percent: 25.0,
            cpu_sample_millis: 1_000,
            worker_process_name: DEFAULT_WORKER_PROCESS.to_string(),
        }
    }
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            minimum_free_gb: 5.0,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            state_files: [
                ".runner",
                ".credentials",
                ".credentials_rsaparams",
                ".env",
                ".path",
            ]
            .into_iter()
            .map(ToOwned::to_owned)
            .collect(),
            state_dir: None,
        }
    }
}

impl Default for VerifyConfig {
    fn default() -> Self {
        let entries: &[&str] = if cfg!(windows) {
            &["run.cmd", "config.cmd", "bin/Runner.Listener.exe"]
        } else {
            &["run.sh", "config.sh", "bin/Runner.Listener"]
        };
        Self {
            required_entries: entries.iter().map(|entry| entry.to_string()).collect(),
            manifest_file: DEFAULT_MANIFEST_FILE.to_string(),
        }
    }
}

impl UpgradeConfig {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input).context("failed to parse upgrade config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.busy.poll_interval_secs == 0 {
            return Err(anyhow!("busy.poll_interval_secs must be greater than zero"));
        }
        if !(0.0..=100.0).contains(&self.busy.cpu_threshold_percent) {
            return Err(anyhow!(
                "busy.cpu_threshold_percent must be within 0..=100, got {}",
                self.busy.cpu_threshold_percent
            ));
        }
        if self.busy.worker_process_name.trim().is_empty() {
            return Err(anyhow!("busy.worker_process_name must not be empty"));
        }
        if !self.disk.minimum_free_gb.is_finite() || self.disk.minimum_free_gb < 0.0 {
            return Err(anyhow!("disk.minimum_free_gb must be a non-negative number"));
        }
        for entry in &self.backup.state_files {
            validated_relative_path(entry)
                .with_context(|| format!("invalid backup.state_files entry '{entry}'"))?;
        }
        for entry in &self.verify.required_entries {
            validated_relative_path(entry)
                .with_context(|| format!("invalid verify.required_entries entry '{entry}'"))?;
        }
        validated_relative_path(&self.verify.manifest_file)
            .context("invalid verify.manifest_file")?;
        validated_relative_path(&self.service.service_file)
            .context("invalid service.service_file")?;
        if let Some(name) = &self.service.name {
            if name.trim().is_empty() {
                return Err(anyhow!("service.name must not be empty when set"));
            }
        }
        Ok(())
    }
}

impl ReleaseConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl ServiceConfig {
    pub fn settle_timeout(&self) -> Duration {
        Duration::from_secs(self.settle_timeout_secs)
    }
}

impl BusyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    /// Sample window, capped so one busy sample stays short.
    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_millis.min(MAX_CPU_SAMPLE_MILLIS))
    }
}
