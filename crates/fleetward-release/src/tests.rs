use std::cell::Cell;
use std::fs;

use anyhow::anyhow;
use fleetward_core::{HostPlatform, InstalledVersion, ReleaseAsset, ReleaseInfo, Version};

use super::*;

const TEMPLATE: &str = "https://mirror.test/v{version}/{file}";

struct StubSource {
    release: Option<ReleaseInfo>,
    calls: Cell<u32>,
}

impl StubSource {
    fn with(release: Option<ReleaseInfo>) -> Self {
        Self {
            release,
            calls: Cell::new(0),
        }
    }
}

impl ReleaseSource for StubSource {
    fn latest_release(&self) -> anyhow::Result<ReleaseInfo> {
        self.calls.set(self.calls.get() + 1);
        self.release
            .clone()
            .ok_or_else(|| anyhow!("connection refused"))
    }
}

fn linux_x64() -> HostPlatform {
    HostPlatform::from_parts("linux", "x86_64").expect("linux x64 is supported")
}

fn release(tag: &str, assets: Vec<ReleaseAsset>) -> ReleaseInfo {
    ReleaseInfo {
        tag_name: tag.to_string(),
        draft: false,
        prerelease: false,
        assets,
    }
}

#[test]
fn pinned_target_makes_no_network_call() {
    let source = StubSource::with(None);
    let resolver = VersionResolver::new(&source, linux_x64(), TEMPLATE);
    let pinned = Version::parse("2.319.1").expect("valid version");

    let target = resolver
        .target_release(Some(&pinned))
        .expect("pinned target must resolve");
    assert_eq!(target.version, pinned);
    assert_eq!(
        target.download_url.as_deref(),
        Some("https://mirror.test/v2.319.1/actions-runner-linux-x64-2.319.1.tar.gz")
    );
    assert_eq!(source.calls.get(), 0);
}

#[test]
fn latest_release_strips_prefix_and_uses_asset_url() {
    let source = StubSource::with(Some(release(
        "v2.320.0",
        vec![ReleaseAsset {
            name: "actions-runner-linux-x64-2.320.0.tar.gz".to_string(),
            browser_download_url: "https://example.test/linux.tar.gz".to_string(),
            digest: Some("sha256:00ff".to_string()),
        }],
    )));
    let resolver = VersionResolver::new(&source, linux_x64(), TEMPLATE);

    let target = resolver.target_release(None).expect("latest must resolve");
    assert_eq!(target.version.to_string(), "2.320.0");
    assert_eq!(
        target.download_url.as_deref(),
        Some("https://example.test/linux.tar.gz")
    );
    assert_eq!(target.sha256.as_deref(), Some("00ff"));
    assert_eq!(source.calls.get(), 1);
}

#[test]
fn latest_release_without_platform_asset_falls_back_to_template() {
    let source = StubSource::with(Some(release("v2.320.0", Vec::new())));
    let resolver = VersionResolver::new(&source, linux_x64(), TEMPLATE);

    let target = resolver.target_release(None).expect("latest must resolve");
    assert_eq!(
        target.download_url.as_deref(),
        Some("https://mirror.test/v2.320.0/actions-runner-linux-x64-2.320.0.tar.gz")
    );
    assert!(target.sha256.is_none());
}

#[test]
fn unreachable_endpoint_or_unusable_tag_is_an_error() {
    let offline = StubSource::with(None);
    let resolver = VersionResolver::new(&offline, linux_x64(), TEMPLATE);
    assert!(resolver.target_release(None).is_err());

    let garbage = StubSource::with(Some(release("nightly", Vec::new())));
    let resolver = VersionResolver::new(&garbage, linux_x64(), TEMPLATE);
    let err = resolver
        .target_release(None)
        .expect_err("unusable tag must fail");
    assert!(format!("{err:#}").contains("no usable tag"));
}

#[test]
fn installed_version_reads_manifest_and_tolerates_garbage() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = dir.path().join(".runner-manifest.toml");
    let source = StubSource::with(None);
    let resolver = VersionResolver::new(&source, linux_x64(), TEMPLATE);

    assert_eq!(resolver.installed_version(&manifest), InstalledVersion::Unknown);

    fs::write(&manifest, "version = \"2.317.0\"\n").expect("write manifest");
    assert_eq!(
        resolver.installed_version(&manifest),
        InstalledVersion::Known(Version::parse("2.317.0").expect("valid version"))
    );

    fs::write(&manifest, "version = [").expect("write manifest");
    assert_eq!(resolver.installed_version(&manifest), InstalledVersion::Unknown);
}

#[test]
fn part_path_sits_next_to_destination() {
    let destination = std::path::Path::new("/tmp/downloads/runner.tar.gz");
    assert_eq!(
        part_path_for(destination),
        std::path::PathBuf::from("/tmp/downloads/runner.tar.gz.part")
    );
}
