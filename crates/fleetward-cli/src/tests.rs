use std::cell::RefCell;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use fleetward_core::{
    CheckOutcome, CheckStatus, FailureKind, InstalledVersion, UpgradeConfig, UpgradeError,
    Version,
};
use fleetward_installer::{create_backup, RunnerLayout};
use fleetward_service::{ServiceAction, ServiceController, ServiceManager, ServiceState};
use fleetward_upgrade::{RollbackReport, Stage, UpgradeOutcome, UpgradeReport};
use tempfile::TempDir;

use super::*;
use crate::commands::{
    build_upgrade_plan, collect_doctor_checks, format_backup_lines, format_check_lines,
    format_rollback_lines, format_upgrade_report_lines, preserved_entries, resolve_install_path,
    select_backup,
};
use crate::completion::write_completions_script;
use crate::render::{format_elapsed, output_style_for, render_status_line, OutputStyle};

struct FixedManager {
    state: ServiceState,
    calls: RefCell<Vec<String>>,
}

impl ServiceManager for FixedManager {
    fn query(&self, name: &str) -> Result<ServiceState> {
        self.calls.borrow_mut().push(format!("query:{name}"));
        Ok(self.state)
    }

    fn start(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("start:{name}"));
        Ok(())
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.calls.borrow_mut().push(format!("stop:{name}"));
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("must create parent");
    }
    fs::write(path, contents).expect("must write file");
}

fn healthy_install(root: &TempDir) -> (RunnerLayout, UpgradeConfig) {
    let install_dir = root.path().join("actions-runner");
    let mut config = UpgradeConfig::default();
    config.disk.minimum_free_gb = 0.0;
    config.verify.required_entries = vec!["run.sh".to_string(), "bin/Runner.Listener".to_string()];
    write_file(&install_dir.join("run.sh"), "#!/bin/sh\n");
    write_file(&install_dir.join("bin/Runner.Listener"), "listener");
    write_file(&install_dir.join(".runner"), "{}");
    write_file(&install_dir.join(".credentials"), "{}");
    write_file(&install_dir.join(".service"), "actions.runner.acme.build-01.service\n");
    write_file(
        &install_dir.join(".runner-manifest.toml"),
        "version = \"2.317.0\"\n",
    );
    let layout = RunnerLayout::from_config(install_dir, &config).expect("layout");
    (layout, config)
}

fn report(outcome: UpgradeOutcome) -> UpgradeReport {
    UpgradeReport {
        run_id: "run-1700000000-42".to_string(),
        outcome,
        installed_version: InstalledVersion::Known(Version::new(2, 317, 0)),
        target_version: Some(Version::new(2, 319, 1)),
        stages: vec![Stage::Preflight],
        backup_id: Some("backup-1700000000-42".to_string()),
        dry_run: false,
    }
}

#[test]
fn upgrade_flags_parse_into_command() {
    let cli = Cli::try_parse_from([
        "fleetward",
        "--path",
        "/opt/actions-runner",
        "upgrade",
        "--version",
        "2.319.1",
        "--force",
        "--dry-run",
        "--max-wait-minutes",
        "5",
    ])
    .expect("must parse");

    assert_eq!(cli.path, Some(PathBuf::from("/opt/actions-runner")));
    assert_eq!(cli.log_level, "info");
    match cli.command {
        Commands::Upgrade {
            target_version,
            force,
            skip_backup,
            dry_run,
            max_wait_minutes,
        } => {
            assert_eq!(target_version.as_deref(), Some("2.319.1"));
            assert!(force);
            assert!(!skip_backup);
            assert!(dry_run);
            assert_eq!(max_wait_minutes, 5);
        }
        other => panic!("unexpected command: {other:?}"),
    }
}

#[test]
fn max_wait_defaults_to_thirty_minutes() {
    let cli = Cli::try_parse_from(["fleetward", "upgrade"]).expect("must parse");
    let Commands::Upgrade {
        max_wait_minutes, ..
    } = cli.command
    else {
        panic!("expected upgrade");
    };
    assert_eq!(max_wait_minutes, 30);
}

#[test]
fn rollback_accepts_backup_id_after_subcommand() {
    let cli = Cli::try_parse_from([
        "fleetward",
        "rollback",
        "--backup",
        "backup-1700000000-42",
        "--path",
        "/srv/runner",
    ])
    .expect("must parse");
    assert_eq!(cli.path, Some(PathBuf::from("/srv/runner")));
    assert!(matches!(
        cli.command,
        Commands::Rollback { backup_id: Some(ref id), dry_run: false } if id == "backup-1700000000-42"
    ));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let err = Cli::try_parse_from(["fleetward", "explode"]).expect_err("must fail");
    assert_eq!(err.kind(), ErrorKind::InvalidSubcommand);
}

#[test]
fn install_path_flag_wins_over_environment() {
    let resolved = resolve_install_path(
        Some(PathBuf::from("/flag/runner")),
        Some(OsString::from("/env/runner")),
    )
    .expect("must resolve");
    assert_eq!(resolved, PathBuf::from("/flag/runner"));

    let resolved =
        resolve_install_path(None, Some(OsString::from("/env/runner"))).expect("must resolve");
    assert_eq!(resolved, PathBuf::from("/env/runner"));

    let err = resolve_install_path(None, Some(OsString::new())).expect_err("must fail");
    assert!(err.to_string().contains("FLEETWARD_RUNNER_PATH"));
}

#[test]
fn relative_install_paths_are_anchored_at_working_dir() {
    let cwd = std::env::current_dir().expect("cwd");

    let dot = resolve_install_path(Some(PathBuf::from(".")), None).expect("must resolve");
    assert_eq!(dot, cwd);
    assert!(dot.is_absolute());

    let relative = resolve_install_path(
        None,
        Some(OsString::from("runners/../actions-runner/./")),
    )
    .expect("must resolve");
    assert_eq!(relative, cwd.join("actions-runner"));

    let config = UpgradeConfig::default();
    let layout = RunnerLayout::from_config(relative, &config).expect("layout");
    assert_eq!(
        layout.state_root(),
        cwd.join(".actions-runner.fleetward").as_path()
    );
}

#[test]
fn pinned_version_must_be_strict_semver() {
    let plan = build_upgrade_plan(Some("2.319.1"), false, true, false, 10).expect("plan");
    assert_eq!(plan.target_version, Some(Version::new(2, 319, 1)));
    assert!(plan.skip_backup);
    assert_eq!(plan.max_wait_minutes, 10);

    assert!(build_upgrade_plan(Some("v2.319.1"), false, false, false, 10).is_err());
    assert!(build_upgrade_plan(Some("2.319"), false, false, false, 10).is_err());
    let latest = build_upgrade_plan(None, false, false, false, 10).expect("plan");
    assert_eq!(latest.target_version, None);
}

#[test]
fn preserved_entries_cover_state_files_and_work_dir() {
    let preserved = preserved_entries(&UpgradeConfig::default());
    for entry in [".runner", ".credentials", ".env", ".service", "_work", "_diag"] {
        assert!(preserved.iter().any(|kept| kept == entry), "{entry} not preserved");
    }
    assert!(!preserved.iter().any(|kept| kept == "bin"));
}

#[test]
fn output_style_is_plain_without_terminal_or_with_no_color() {
    assert_eq!(output_style_for(false, true), OutputStyle::Rich);
    assert_eq!(output_style_for(true, true), OutputStyle::Plain);
    assert_eq!(output_style_for(false, false), OutputStyle::Plain);
}

#[test]
fn status_lines_carry_badges_only_when_rich() {
    assert_eq!(
        render_status_line(OutputStyle::Plain, "ok", "upgraded runner"),
        "upgraded runner"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "ok", "upgraded runner"),
        "[OK] upgraded runner"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "err", "rollback failed"),
        "[ERR] rollback failed"
    );
    assert_eq!(
        render_status_line(OutputStyle::Rich, "step", "dry-run complete"),
        "[..] dry-run complete"
    );
}

#[test]
fn elapsed_switches_to_minutes() {
    assert_eq!(format_elapsed(std::time::Duration::from_millis(1_250)), "1.250s");
    assert_eq!(format_elapsed(std::time::Duration::from_secs(125)), "2m05s");
}

#[test]
fn succeeded_report_names_both_versions() {
    let lines = format_upgrade_report_lines(&report(UpgradeOutcome::Succeeded), OutputStyle::Plain);
    assert_eq!(lines[0], "upgraded runner 2.317.0 -> 2.319.1");
    assert!(lines.contains(&"backup: backup-1700000000-42".to_string()));
    assert_eq!(lines.last().map(String::as_str), Some("outcome: succeeded"));
}

#[test]
fn rolled_back_report_leads_with_the_failure() {
    let outcome = UpgradeOutcome::RolledBack {
        cause: UpgradeError::Verification {
            missing: vec!["bin/Runner.Listener".to_string()],
        },
        backup: PathBuf::from("/srv/.actions-runner.fleetward/backups/backup-1"),
    };
    let lines = format_upgrade_report_lines(&report(outcome), OutputStyle::Rich);
    assert!(lines[0].starts_with("[ERR] upgrade to 2.319.1 failed"));
    assert!(lines[0].contains("bin/Runner.Listener"));
    assert!(lines[1].starts_with("[WARN] rolled back to 2.317.0"));
}

#[test]
fn failed_report_names_failure_kind() {
    let outcome = UpgradeOutcome::Failed(UpgradeError::BusyTimeout { waited_secs: 1800 });
    let lines = format_upgrade_report_lines(&report(outcome), OutputStyle::Plain);
    assert_eq!(
        lines[0],
        format!(
            "upgrade failed ({}): worker still busy after waiting 1800s",
            FailureKind::BusyTimeout.as_str()
        )
    );
}

#[test]
fn failed_report_says_whether_installation_was_touched() {
    let busy = UpgradeOutcome::Failed(UpgradeError::BusyTimeout { waited_secs: 60 });
    let lines = format_upgrade_report_lines(&report(busy), OutputStyle::Plain);
    assert_eq!(lines[1], "installation was not modified");

    let broken = UpgradeOutcome::Failed(UpgradeError::NoBackupToRestore {
        cause: Box::new(UpgradeError::Verification {
            missing: vec!["run.sh".to_string()],
        }),
    });
    let lines = format_upgrade_report_lines(&report(broken), OutputStyle::Rich);
    assert_eq!(
        lines[1],
        "[ERR] manual intervention required before the next upgrade"
    );

    let stop = UpgradeOutcome::Failed(UpgradeError::Service {
        action: "stop",
        message: "unit busy".to_string(),
    });
    let lines = format_upgrade_report_lines(&report(stop), OutputStyle::Plain);
    assert_eq!(lines[1], "backup: backup-1700000000-42");
}

#[test]
fn doctor_passes_on_healthy_installation() {
    let root = TempDir::new().expect("tempdir");
    let (layout, config) = healthy_install(&root);
    let manager = FixedManager {
        state: ServiceState::Running,
        calls: RefCell::new(Vec::new()),
    };
    let controller = ServiceController::new(&manager, None);

    let checks = collect_doctor_checks(&layout, &config, &controller);

    let names = checks
        .iter()
        .map(|check| check.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            "installation_path",
            "disk_space",
            "manifest",
            "service_registration",
            "entry_points"
        ]
    );
    assert!(checks.iter().all(|check| check.status == CheckStatus::Pass), "{checks:?}");
    assert!(checks[2].message.contains("2.317.0"));
}

#[test]
fn doctor_flags_missing_entry_point_and_unregistered_service() {
    let root = TempDir::new().expect("tempdir");
    let (layout, config) = healthy_install(&root);
    fs::remove_file(layout.install_dir().join("bin/Runner.Listener")).expect("remove");
    fs::remove_file(layout.service_file_path()).expect("remove");
    let manager = FixedManager {
        state: ServiceState::Unknown,
        calls: RefCell::new(Vec::new()),
    };
    let controller = ServiceController::new(&manager, None);

    let checks = collect_doctor_checks(&layout, &config, &controller);

    let by_name = |name: &str| {
        checks
            .iter()
            .find(|check| check.name == name)
            .cloned()
            .expect("check present")
    };
    assert_eq!(by_name("service_registration").status, CheckStatus::Warn);
    let entry_points = by_name("entry_points");
    assert_eq!(entry_points.status, CheckStatus::Fail);
    assert!(entry_points.message.contains("bin/Runner.Listener"));
    assert!(manager.calls.borrow().is_empty());
}

#[test]
fn doctor_stops_at_missing_installation() {
    let root = TempDir::new().expect("tempdir");
    let config = UpgradeConfig::default();
    let layout =
        RunnerLayout::from_config(root.path().join("absent"), &config).expect("layout");
    let manager = FixedManager {
        state: ServiceState::Running,
        calls: RefCell::new(Vec::new()),
    };
    let controller = ServiceController::new(&manager, None);

    let checks = collect_doctor_checks(&layout, &config, &controller);

    assert_eq!(checks.len(), 1);
    assert!(checks[0].is_failure());
}

#[test]
fn check_lines_render_per_style() {
    let checks = vec![
        CheckOutcome::pass("disk_space", "42.00 GB free"),
        CheckOutcome::warn("manifest", "missing"),
    ];
    assert_eq!(
        format_check_lines(&checks, OutputStyle::Plain),
        vec!["pass disk_space: 42.00 GB free", "warn manifest: missing"]
    );
    assert_eq!(
        format_check_lines(&checks, OutputStyle::Rich),
        vec!["[OK] disk_space: 42.00 GB free", "[WARN] manifest: missing"]
    );
}

#[test]
fn backups_listing_and_selection() {
    let root = TempDir::new().expect("tempdir");
    let (layout, config) = healthy_install(&root);

    assert_eq!(
        format_backup_lines(&[], OutputStyle::Plain),
        vec!["no backups".to_string()]
    );
    assert!(select_backup(&layout, None).is_err());

    let first = create_backup(&layout, &config.backup.state_files).expect("backup");
    let second = create_backup(&layout, &config.backup.state_files).expect("backup");

    let latest = select_backup(&layout, None).expect("latest");
    assert_eq!(latest.id(), second.id());
    let chosen = select_backup(&layout, Some(first.id())).expect("by id");
    assert_eq!(chosen.id(), first.id());
    assert!(select_backup(&layout, Some("backup-0-0")).is_err());

    let lines = format_backup_lines(&[second.clone()], OutputStyle::Plain);
    assert!(lines[0].starts_with(second.id()));
    assert!(lines[0].contains("missing="));
}

#[test]
fn rollback_lines_distinguish_dry_run() {
    let report = RollbackReport {
        backup_id: "backup-1".to_string(),
        restored: vec![".runner".to_string(), ".credentials".to_string()],
        service: ServiceAction::DryRun,
        dry_run: true,
    };
    let lines = format_rollback_lines(&report, OutputStyle::Plain);
    assert_eq!(lines[0], "would restore 2 files from backup-1");
    assert_eq!(lines[1], "  .runner");
    assert_eq!(lines.last().map(String::as_str), Some("service: dry-run"));
}

#[test]
fn completions_name_the_binary() {
    let mut buffer = Vec::new();
    write_completions_script(CliCompletionShell::Bash, &mut buffer).expect("must generate");
    let script = String::from_utf8(buffer).expect("utf8");
    assert!(script.contains("fleetward"));
    assert!(script.contains("rollback"));
}
