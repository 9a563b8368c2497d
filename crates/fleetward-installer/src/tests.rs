use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::anyhow;
use fleetward_core::{FailureKind, HostPlatform, TargetRelease, UpgradeConfig, Version};
use fleetward_release::ArtifactSource;
use tempfile::TempDir;

use super::*;

fn state_files() -> Vec<String> {
    UpgradeConfig::default().backup.state_files
}

fn test_layout(root: &TempDir) -> RunnerLayout {
    let install_dir = root.path().join("actions-runner");
    fs::create_dir_all(&install_dir).expect("must create install dir");
    RunnerLayout::from_config(install_dir, &UpgradeConfig::default()).expect("layout")
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, contents).expect("must write file");
}

fn seed_registered_runner(layout: &RunnerLayout) {
    let dir = layout.install_dir();
    write_file(&dir.join(".runner"), "{\"agentId\": 42}");
    write_file(&dir.join(".credentials"), "{\"scheme\": \"OAuth\"}");
    write_file(&dir.join(".credentials_rsaparams"), "rsa-secret");
    write_file(&dir.join(".env"), "LANG=C.UTF-8\n");
    write_file(&dir.join("run.sh"), "#!/bin/sh\n");
    write_file(&dir.join("bin/Runner.Listener"), "old-listener");
}

fn linux_x64() -> HostPlatform {
    HostPlatform::from_parts("linux", "x86_64").expect("linux x64 is supported")
}

#[test]
fn state_root_is_sibling_of_installation() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    assert_eq!(
        layout.state_root(),
        root.path().join(".actions-runner.fleetward")
    );
    assert_eq!(
        layout.backup_metadata_path("backup-1"),
        layout.state_root().join("backups").join("backup-1").join("backup.json")
    );
    assert_eq!(
        layout.run_journal_path("run-1"),
        layout.state_root().join("runs").join("run-1.journal")
    );
    assert_eq!(
        layout.manifest_path(),
        layout.install_dir().join(".runner-manifest.toml")
    );
}

#[test]
fn state_dir_override_is_honoured() {
    let root = TempDir::new().expect("tempdir");
    let mut config = UpgradeConfig::default();
    config.backup.state_dir = Some(root.path().join("elsewhere"));
    let layout =
        RunnerLayout::from_config(root.path().join("runner"), &config).expect("layout");
    assert_eq!(layout.backups_dir(), root.path().join("elsewhere").join("backups"));
}

#[test]
fn free_space_boundary_is_inclusive() {
    assert!(!evaluate_free_space(Some(5.0 - 0.01), 5.0).passed());
    assert!(evaluate_free_space(Some(5.0), 5.0).passed());
    assert_eq!(
        evaluate_free_space(Some(4.99), 5.0),
        DiskCheck::Fail {
            free_gb: Some(4.99)
        }
    );
}

#[test]
fn free_space_fails_closed_when_unknown() {
    assert_eq!(
        evaluate_free_space(None, 5.0),
        DiskCheck::Fail { free_gb: None }
    );
    assert!(!evaluate_free_space(Some(f64::NAN), 0.0).passed());

    let root = TempDir::new().expect("tempdir");
    let missing = root.path().join("does-not-exist");
    assert_eq!(
        check_free_space(&missing, 0.0),
        DiskCheck::Fail { free_gb: None }
    );
    assert!(check_free_space(root.path(), 0.0).passed());
}

#[test]
fn backup_captures_allow_listed_state_only() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);

    let backup = create_backup(&layout, &state_files()).expect("backup must succeed");
    assert_eq!(
        backup.metadata.files,
        vec![".runner", ".credentials", ".credentials_rsaparams", ".env"]
    );
    assert_eq!(backup.metadata.missing, vec![".path"]);
    assert_eq!(backup.metadata.source_installation_path, layout.install_dir());
    assert_eq!(
        fs::read_to_string(backup.captured_path(".credentials")).expect("captured"),
        "{\"scheme\": \"OAuth\"}"
    );
    assert!(!backup.dir.join("bin").exists());
    assert!(!backup.dir.join("run.sh").exists());
    assert!(backup.dir.starts_with(layout.backups_dir()));
}

#[test]
fn backup_of_unregistered_runner_records_everything_missing() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);

    let backup = create_backup(&layout, &state_files()).expect("backup must succeed");
    assert!(backup.metadata.files.is_empty());
    assert_eq!(backup.metadata.missing.len(), state_files().len());
}

#[test]
fn backups_are_unique_and_listed_newest_first() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);

    let first = create_backup(&layout, &state_files()).expect("first backup");
    let second = create_backup(&layout, &state_files()).expect("second backup");
    assert_ne!(first.id(), second.id());

    fs::create_dir_all(layout.backup_dir("backup-0-incomplete")).expect("incomplete dir");

    let listed = list_backups(&layout).expect("must list backups");
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id(), second.id());
    assert_eq!(
        latest_backup(&layout).expect("latest").map(|b| b.metadata.id),
        Some(second.id().to_string())
    );
    assert_eq!(
        find_backup(&layout, first.id()).expect("find").map(|b| b.metadata.id),
        Some(first.id().to_string())
    );
    assert!(find_backup(&layout, "../escape").is_err());
}

#[test]
fn restore_is_byte_identical_and_idempotent() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);
    let original = fs::read(layout.install_dir().join(".credentials")).expect("read original");

    let backup = create_backup(&layout, &state_files()).expect("backup");
    write_file(&layout.install_dir().join(".credentials"), "clobbered");
    fs::remove_file(layout.install_dir().join(".runner")).expect("remove .runner");

    let report = restore_backup(&layout, &backup).expect("restore must succeed");
    assert_eq!(report.restored.len(), 4);
    assert_eq!(
        fs::read(layout.install_dir().join(".credentials")).expect("read restored"),
        original
    );
    assert!(layout.install_dir().join(".runner").exists());

    restore_backup(&layout, &backup).expect("second restore must succeed");
    assert_eq!(
        fs::read(layout.install_dir().join(".credentials")).expect("read restored"),
        original
    );
    assert!(read_inconsistency_marker(&layout).expect("marker").is_none());
}

#[test]
fn partial_restore_flags_installation_inconsistent() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);

    let backup = create_backup(&layout, &state_files()).expect("backup");
    fs::remove_file(backup.captured_path(".credentials_rsaparams")).expect("damage backup");

    let err = restore_backup(&layout, &backup).expect_err("restore must fail");
    assert!(format!("{err:#}").contains(".credentials_rsaparams"));

    let marker = read_inconsistency_marker(&layout)
        .expect("marker readable")
        .expect("marker must exist");
    assert!(marker.contains("manual intervention required"));
    assert!(marker.contains(&backup.dir.display().to_string()));
}

#[test]
fn successful_restore_clears_stale_marker() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);
    let backup = create_backup(&layout, &state_files()).expect("backup");
    write_file(&layout.inconsistency_marker_path(), "stale");

    restore_backup(&layout, &backup).expect("restore");
    assert!(!layout.inconsistency_marker_path().exists());
}

#[test]
fn verification_reports_missing_entry_points() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    let required = vec![
        "run.sh".to_string(),
        "config.sh".to_string(),
        "bin/Runner.Listener".to_string(),
    ];
    seed_registered_runner(&layout);

    assert_eq!(
        verify_installation(&layout, &required),
        Verification::Fail {
            missing: vec!["config.sh".to_string()]
        }
    );

    write_file(&layout.install_dir().join("config.sh"), "#!/bin/sh\n");
    assert!(verify_installation(&layout, &required).passed());
}

#[test]
fn sha256_file_hashes_contents() {
    let root = TempDir::new().expect("tempdir");
    let path = root.path().join("abc.txt");
    write_file(&path, "abc");
    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[test]
fn run_record_and_journal_round_trip() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    assert!(read_latest_run(&layout).expect("latest").is_none());

    let mut record = RunRecord::new("run-1-2", "2.317.0", "2.319.1", 100);
    write_run_record(&layout, &record).expect("write record");
    record.stage = "rolled_back".to_string();
    record.status = "rolled_back".to_string();
    record.last_error = Some(FailureKind::VerificationError);
    write_run_record(&layout, &record).expect("rewrite record");

    let latest = read_latest_run(&layout)
        .expect("latest")
        .expect("latest run present");
    assert_eq!(latest, record);

    for (seq, stage) in ["backup", "stop"].iter().enumerate() {
        append_journal_entry(
            &layout,
            "run-1-2",
            &JournalEntry {
                seq: seq as u64 + 1,
                stage: stage.to_string(),
                state: "done".to_string(),
                detail: None,
                at_unix: 100,
            },
        )
        .expect("append entry");
    }
    let entries = read_journal(&layout, "run-1-2").expect("read journal");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].stage, "stop");
    assert!(read_journal(&layout, "run-unknown").expect("empty").is_empty());
}

struct CopyArtifactSource {
    archive: Option<PathBuf>,
}

impl ArtifactSource for CopyArtifactSource {
    fn fetch(&self, _url: &str, destination: &Path) -> anyhow::Result<()> {
        let archive = self
            .archive
            .as_ref()
            .ok_or_else(|| anyhow!("connection reset by peer"))?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(archive, destination)?;
        Ok(())
    }
}

#[cfg(unix)]
fn build_runner_archive(root: &TempDir, listener: &str) -> PathBuf {
    let payload = root.path().join("payload");
    write_file(&payload.join("run.sh"), "#!/bin/sh\necho new\n");
    write_file(&payload.join("config.sh"), "#!/bin/sh\n");
    write_file(&payload.join("bin/Runner.Listener"), listener);
    write_file(&payload.join(".credentials"), "archive-must-not-win");
    let archive = root.path().join("actions-runner-linux-x64-2.319.1.tar.gz");
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&archive)
        .arg("-C")
        .arg(&payload)
        .arg(".")
        .status()
        .expect("tar must run");
    assert!(status.success());
    archive
}

fn release(url: &str, sha256: Option<&str>) -> TargetRelease {
    TargetRelease {
        version: Version::parse("2.319.1").expect("valid version"),
        download_url: Some(url.to_string()),
        sha256: sha256.map(ToOwned::to_owned),
    }
}

#[cfg(unix)]
#[test]
fn archive_install_replaces_payload_and_preserves_state() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);
    write_file(&layout.install_dir().join("_work/job.log"), "keep me");
    let archive = build_runner_archive(&root, "new-listener");

    let source = CopyArtifactSource {
        archive: Some(archive),
    };
    let installer = ArchiveInstaller::new(&source, linux_x64(), state_files());
    installer
        .install(
            &layout,
            &release("https://example.test/actions-runner-linux-x64-2.319.1.tar.gz", None),
        )
        .expect("install must succeed");

    let dir = layout.install_dir();
    assert_eq!(
        fs::read_to_string(dir.join("bin/Runner.Listener")).expect("listener"),
        "new-listener"
    );
    assert!(dir.join("config.sh").exists());
    assert_eq!(
        fs::read_to_string(dir.join(".credentials")).expect("credentials"),
        "{\"scheme\": \"OAuth\"}"
    );
    assert_eq!(
        fs::read_to_string(dir.join("_work/job.log")).expect("work dir"),
        "keep me"
    );
    let manifest = fs::read_to_string(layout.manifest_path()).expect("manifest stamped");
    assert!(manifest.contains("2.319.1"));

    let leftovers = fs::read_dir(layout.downloads_dir()).expect("downloads").count();
    assert_eq!(leftovers, 0);
    let staged = fs::read_dir(layout.staging_dir()).expect("staging").count();
    assert_eq!(staged, 0);
}

#[cfg(unix)]
#[test]
fn digest_mismatch_fails_and_cleans_up() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    seed_registered_runner(&layout);
    let archive = build_runner_archive(&root, "new-listener");

    let source = CopyArtifactSource {
        archive: Some(archive),
    };
    let installer = ArchiveInstaller::new(&source, linux_x64(), state_files());
    let err = installer
        .install(
            &layout,
            &release("https://example.test/runner.tar.gz", Some("00")),
        )
        .expect_err("digest mismatch must fail");
    assert!(format!("{err:#}").contains("digest mismatch"));
    assert_eq!(
        fs::read_to_string(layout.install_dir().join("bin/Runner.Listener")).expect("listener"),
        "old-listener"
    );
    assert_eq!(
        fs::read_dir(layout.downloads_dir()).expect("downloads").count(),
        0
    );
}

#[test]
fn failed_download_is_an_install_error_without_leftovers() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    let source = CopyArtifactSource { archive: None };
    let installer = ArchiveInstaller::new(&source, linux_x64(), state_files());

    let err = installer
        .install(&layout, &release("https://example.test/runner.tar.gz", None))
        .expect_err("download failure must fail install");
    assert!(format!("{err:#}").contains("connection reset"));
    assert_eq!(
        fs::read_dir(layout.downloads_dir()).expect("downloads").count(),
        0
    );
    assert!(!layout.staging_dir().exists()
        || fs::read_dir(layout.staging_dir()).expect("staging").count() == 0);
}

#[test]
fn release_without_url_is_rejected() {
    let root = TempDir::new().expect("tempdir");
    let layout = test_layout(&root);
    let source = CopyArtifactSource { archive: None };
    let installer = ArchiveInstaller::new(&source, linux_x64(), state_files());
    let pinned = TargetRelease::pinned(Version::parse("2.319.1").expect("valid version"));
    assert!(installer.install(&layout, &pinned).is_err());
}

#[test]
fn tarball_extraction_targets_staging_dir() {
    let command = crate::artifact::extraction_command(
        Path::new("/state/downloads/runner.tar.gz"),
        Path::new("/state/staging/run-1"),
        fleetward_core::ArchiveType::TarGz,
    );
    let args = command
        .get_args()
        .map(|arg| arg.to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    assert_eq!(command.get_program(), "tar");
    assert_eq!(
        args,
        vec![
            "-xzf",
            "/state/downloads/runner.tar.gz",
            "-C",
            "/state/staging/run-1"
        ]
    );
}

#[cfg(unix)]
#[test]
fn failed_command_reports_status_and_output() {
    run_command(Command::new("sh").args(["-c", "exit 0"]), "noop").expect("must succeed");

    let err = run_command(
        Command::new("sh").args(["-c", "echo partial; echo 'disk full' >&2; exit 3"]),
        "failed to extract tar.gz archive",
    )
    .expect_err("must fail");
    let message = err.to_string();
    assert!(message.starts_with("failed to extract tar.gz archive: status="));
    assert!(message.contains("stdout='partial'"));
    assert!(message.contains("stderr='disk full'"));
}
