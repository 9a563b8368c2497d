use std::fmt;

use semver::Version;

use crate::archive::ArchiveType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerOs {
    Linux,
    MacOs,
    Windows,
}

impl RunnerOs {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::MacOs => "osx",
            Self::Windows => "win",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerArch {
    X64,
    Arm64,
    Arm,
}

impl RunnerArch {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::X64 => "x64",
            Self::Arm64 => "arm64",
            Self::Arm => "arm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostPlatform {
    pub os: RunnerOs,
    pub arch: RunnerArch,
}

impl HostPlatform {
    pub fn current() -> Option<Self> {
        Self::from_parts(std::env::consts::OS, std::env::consts::ARCH)
    }

    pub fn from_parts(os: &str, arch: &str) -> Option<Self> {
        let os = match os {
            "linux" => RunnerOs::Linux,
            "macos" => RunnerOs::MacOs,
            "windows" => RunnerOs::Windows,
            _ => return None,
        };
        let arch = match arch {
            "x86_64" => RunnerArch::X64,
            "aarch64" => RunnerArch::Arm64,
            "arm" => RunnerArch::Arm,
            _ => return None,
        };
        Some(Self { os, arch })
    }

    /// Token used in release asset names, e.g. `linux-x64`.
    pub fn token(&self) -> String {
        format!("{}-{}", self.os.as_str(), self.arch.as_str())
    }

    pub fn archive_type(&self) -> ArchiveType {
        match self.os {
            RunnerOs::Windows => ArchiveType::Zip,
            RunnerOs::Linux | RunnerOs::MacOs => ArchiveType::TarGz,
        }
    }

    pub fn artifact_file_name(&self, version: &Version) -> String {
        format!(
            "actions-runner-{}-{version}.{}",
            self.token(),
            self.archive_type().extension()
        )
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.token())
    }
}
