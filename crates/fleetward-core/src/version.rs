use std::fmt;

use anyhow::{anyhow, Context, Result};
use semver::Version;

/// Version recorded in the installation's manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstalledVersion {
    Known(Version),
    Unknown,
}

impl InstalledVersion {
    pub fn as_version(&self) -> Option<&Version> {
        match self {
            Self::Known(version) => Some(version),
            Self::Unknown => None,
        }
    }

    /// `Unknown` never matches, so an unreadable manifest always upgrades.
    pub fn matches(&self, target: &Version) -> bool {
        matches!(self, Self::Known(version) if version == target)
    }
}

impl fmt::Display for InstalledVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(version) => write!(f, "{version}"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

pub fn parse_pinned_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("pinned version must not be empty"));
    }
    Version::parse(trimmed).with_context(|| format!("invalid pinned version '{trimmed}'"))
}

pub fn version_from_tag(tag: &str) -> Result<Version> {
    let trimmed = tag.trim();
    let stripped = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    if stripped.is_empty() {
        return Err(anyhow!("release tag '{tag}' carries no version"));
    }
    Version::parse(stripped).with_context(|| format!("release tag '{tag}' is not a semantic version"))
}
