use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

/// Small TOML file the runner package writes into its installation root.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallManifest {
    pub version: Version,
    #[serde(default)]
    pub channel: Option<String>,
}

impl InstallManifest {
    pub fn new(version: Version) -> Self {
        Self {
            version,
            channel: None,
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).context("failed to parse install manifest")
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).context("failed to serialize install manifest")
    }
}
