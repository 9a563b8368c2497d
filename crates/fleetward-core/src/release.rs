use anyhow::{anyhow, Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};

use crate::platform::HostPlatform;
use crate::version::version_from_tag;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub digest: Option<String>,
}

impl ReleaseAsset {
    /// Hex digest when the asset advertises one as `sha256:<hex>`.
    pub fn sha256(&self) -> Option<String> {
        self.digest
            .as_deref()
            .and_then(|digest| digest.strip_prefix("sha256:"))
            .filter(|hex| !hex.is_empty())
            .map(|hex| hex.to_ascii_lowercase())
    }
}

/// Subset of the release-metadata document the resolver consumes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseInfo {
    pub tag_name: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

impl ReleaseInfo {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("failed to parse release metadata")
    }

    /// Version of a stable release; drafts and prereleases carry no usable tag.
    pub fn stable_version(&self) -> Result<Version> {
        if self.draft || self.prerelease {
            return Err(anyhow!(
                "release '{}' is not a stable release",
                self.tag_name
            ));
        }
        let version = version_from_tag(&self.tag_name)?;
        if !version.pre.is_empty() {
            return Err(anyhow!(
                "release '{}' carries a prerelease version",
                self.tag_name
            ));
        }
        Ok(version)
    }

    pub fn asset_for(&self, platform: &HostPlatform, version: &Version) -> Option<&ReleaseAsset> {
        let expected = platform.artifact_file_name(version);
        self.assets.iter().find(|asset| asset.name == expected)
    }
}

/// What the installer needs to fetch one release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRelease {
    pub version: Version,
    pub download_url: Option<String>,
    pub sha256: Option<String>,
}

impl TargetRelease {
    pub fn pinned(version: Version) -> Self {
        Self {
            version,
            download_url: None,
            sha256: None,
        }
    }
}

/// Expands `{version}`, `{os}`, `{arch}`, `{platform}`, `{ext}` and `{file}`.
pub fn render_download_url(template: &str, version: &Version, platform: &HostPlatform) -> String {
    template
        .replace("{file}", &platform.artifact_file_name(version))
        .replace("{version}", &version.to_string())
        .replace("{platform}", &platform.token())
        .replace("{os}", platform.os.as_str())
        .replace("{arch}", platform.arch.as_str())
        .replace("{ext}", platform.archive_type().extension())
}
