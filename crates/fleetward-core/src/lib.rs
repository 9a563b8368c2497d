mod archive;
mod check;
mod config;
mod error;
mod manifest;
mod paths;
mod plan;
mod platform;
mod release;
mod version;

pub use archive::ArchiveType;
pub use check::{CheckOutcome, CheckStatus};
pub use config::{
    BackupConfig, BusyConfig, DiskConfig, ReleaseConfig, ServiceConfig, UpgradeConfig,
    VerifyConfig,
};
pub use error::{FailureKind, UpgradeError};
pub use manifest::InstallManifest;
pub use paths::validated_relative_path;
pub use plan::{UpgradePlan, DEFAULT_MAX_WAIT_MINUTES};
pub use platform::{HostPlatform, RunnerArch, RunnerOs};
pub use release::{render_download_url, ReleaseAsset, ReleaseInfo, TargetRelease};
pub use version::{parse_pinned_version, version_from_tag, InstalledVersion};

pub use semver::Version;
