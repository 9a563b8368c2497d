use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use fleetward_core::{
    parse_pinned_version, CheckOutcome, CheckStatus, HostPlatform, InstallManifest,
    UpgradeConfig, UpgradePlan,
};
use fleetward_installer::{
    check_free_space, find_backup, latest_backup, list_backups, read_inconsistency_marker,
    read_latest_run, verify_installation, ArchiveInstaller, Backup, DiskCheck, RunRecord,
    RunnerLayout, Verification,
};
use fleetward_release::{HttpArtifactSource, HttpReleaseSource, VersionResolver};
use fleetward_service::{
    BusyDetector, BusySampler, BusySignal, ServiceController, ServiceManager, ServiceState,
    SystemProbe, SystemServiceManager,
};
use fleetward_upgrade::{
    Collaborators, RollbackManager, RollbackReport, UpgradeOrchestrator, UpgradeOutcome,
    UpgradeReport,
};

use crate::render::{render_section_header, render_status_line, IdleSpinner, OutputStyle};

pub(crate) const RUNNER_PATH_ENV: &str = "FLEETWARD_RUNNER_PATH";

/// Top-level entries an archive install never overwrites besides the state files.
const PRESERVED_RUNTIME_ENTRIES: [&str; 2] = ["_work", "_diag"];

pub(crate) fn resolve_install_path(
    flag: Option<PathBuf>,
    env_value: Option<OsString>,
) -> Result<PathBuf> {
    let raw = match (flag, env_value) {
        (Some(path), _) => path,
        (None, Some(value)) if !value.is_empty() => PathBuf::from(value),
        _ => {
            return Err(anyhow!(
                "no runner installation given; pass --path or set {RUNNER_PATH_ENV}"
            ))
        }
    };
    absolute_install_path(&raw)
}

/// Anchors a relative path at the working directory and folds `.` and `..`
/// lexically. The path need not exist; preflight reports a missing one.
fn absolute_install_path(raw: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(raw)
        .with_context(|| format!("failed to resolve installation path {}", raw.display()))?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<UpgradeConfig> {
    match path {
        Some(path) => UpgradeConfig::load(path),
        None => Ok(UpgradeConfig::default()),
    }
}

pub(crate) fn build_upgrade_plan(
    target_version: Option<&str>,
    force: bool,
    skip_backup: bool,
    dry_run: bool,
    max_wait_minutes: u64,
) -> Result<UpgradePlan> {
    let target_version = target_version.map(parse_pinned_version).transpose()?;
    Ok(UpgradePlan {
        target_version,
        force,
        skip_backup,
        dry_run,
        max_wait_minutes,
    })
}

pub(crate) fn preserved_entries(config: &UpgradeConfig) -> Vec<String> {
    let mut preserved = config.backup.state_files.clone();
    preserved.push(config.service.service_file.clone());
    preserved.extend(PRESERVED_RUNTIME_ENTRIES.iter().map(|entry| entry.to_string()));
    preserved.sort();
    preserved.dedup();
    preserved
}

fn host_platform() -> Result<HostPlatform> {
    HostPlatform::current().ok_or_else(|| {
        anyhow!(
            "unsupported host platform: {}-{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )
    })
}

fn service_controller<'a>(
    manager: &'a dyn ServiceManager,
    config: &UpgradeConfig,
    dry_run: bool,
) -> ServiceController<'a> {
    ServiceController::new(manager, config.service.name.clone())
        .settle_timeout(config.service.settle_timeout())
        .dry_run(dry_run)
}

pub(crate) fn run_upgrade_command(
    layout: &RunnerLayout,
    config: &UpgradeConfig,
    plan: &UpgradePlan,
    style: OutputStyle,
) -> Result<u8> {
    let platform = host_platform()?;
    let releases = HttpReleaseSource::new(&config.release)?;
    let artifacts = HttpArtifactSource::new(&config.release)?;
    let resolver = VersionResolver::new(
        &releases,
        platform,
        config.release.download_url_template.clone(),
    );
    let manager = SystemServiceManager::for_host(config.service.use_sudo);
    let controller = service_controller(&manager, config, plan.dry_run);
    let probe = SystemProbe;
    let detector = BusyDetector::new(&controller, layout, &probe, config.busy.clone());
    let installer = ArchiveInstaller::new(&artifacts, platform, preserved_entries(config));
    let spinner = IdleSpinner::new(style);

    let orchestrator = UpgradeOrchestrator::new(
        layout,
        config,
        Collaborators {
            resolver: &resolver,
            busy: &detector,
            service: &controller,
            installer: &installer,
        },
    )
    .with_observer(&spinner);
    let report = orchestrator.run(plan);

    for line in format_upgrade_report_lines(&report, style) {
        println!("{line}");
    }
    Ok(exit_code_byte(report.exit_code()))
}

fn exit_code_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

pub(crate) fn format_upgrade_report_lines(report: &UpgradeReport, style: OutputStyle) -> Vec<String> {
    let target = report
        .target_version
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unresolved".to_string());
    let mut lines = Vec::new();

    let headline = match &report.outcome {
        UpgradeOutcome::Succeeded => render_status_line(
            style,
            "ok",
            &format!("upgraded runner {} -> {target}", report.installed_version),
        ),
        UpgradeOutcome::SkippedUpToDate => render_status_line(
            style,
            "ok",
            &format!("runner already at {target}; nothing to do"),
        ),
        UpgradeOutcome::DryRunCompleted => render_status_line(
            style,
            "step",
            &format!(
                "dry-run complete: would upgrade runner {} -> {target}",
                report.installed_version
            ),
        ),
        UpgradeOutcome::RolledBack { cause, backup } => {
            lines.push(render_status_line(
                style,
                "warn",
                &format!("rolled back to {} from {}", report.installed_version, backup.display()),
            ));
            render_status_line(style, "err", &format!("upgrade to {target} failed: {cause}"))
        }
        UpgradeOutcome::Failed(err) => render_status_line(
            style,
            "err",
            &format!("upgrade failed ({}): {err}", err.kind().as_str()),
        ),
    };
    lines.insert(0, headline);
    if let UpgradeOutcome::Failed(err) = &report.outcome {
        let kind = err.kind();
        if kind.requires_manual_intervention() {
            lines.push(render_status_line(
                style,
                "err",
                "manual intervention required before the next upgrade",
            ));
        } else if kind.is_pre_mutation() {
            lines.push(render_status_line(style, "step", "installation was not modified"));
        }
    }

    if let Some(backup_id) = &report.backup_id {
        lines.push(format!("backup: {backup_id}"));
    }
    lines.push(format!("run: {}", report.run_id));
    lines.push(format!("outcome: {}", report.outcome.as_str()));
    lines
}

pub(crate) fn run_status_command(
    layout: &RunnerLayout,
    config: &UpgradeConfig,
    style: OutputStyle,
) -> Result<u8> {
    let manager = SystemServiceManager::for_host(config.service.use_sudo);
    let controller = service_controller(&manager, config, false);
    let probe = SystemProbe;
    let detector = BusyDetector::new(&controller, layout, &probe, config.busy.clone());

    let status = RunnerStatus {
        manifest: read_manifest(layout),
        service_name: controller.service_name(layout)?,
        busy: detector.sample_busy(),
        latest_backup: latest_backup(layout)?,
        last_run: read_latest_run(layout)?,
        inconsistency: read_inconsistency_marker(layout)?,
    };
    for line in format_status_lines(layout, &status, style) {
        println!("{line}");
    }
    Ok(0)
}

pub(crate) struct RunnerStatus {
    pub manifest: Result<Option<InstallManifest>>,
    pub service_name: Option<String>,
    pub busy: BusySignal,
    pub latest_backup: Option<Backup>,
    pub last_run: Option<RunRecord>,
    pub inconsistency: Option<String>,
}

pub(crate) fn format_status_lines(
    layout: &RunnerLayout,
    status: &RunnerStatus,
    style: OutputStyle,
) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(header) = render_section_header(style, "runner") {
        lines.push(header);
    }
    lines.push(format!("path: {}", layout.install_dir().display()));
    lines.push(match &status.manifest {
        Ok(Some(manifest)) => format!("installed: {}", manifest.version),
        Ok(None) => "installed: unknown (no manifest)".to_string(),
        Err(err) => format!("installed: unknown ({err:#})"),
    });
    lines.push(match &status.service_name {
        Some(name) => format!("service: {name} ({})", status.busy.service_state),
        None => "service: not registered".to_string(),
    });
    lines.push(format!(
        "worker: {} (process={}, cpu={})",
        if status.busy.busy { "busy" } else { "idle" },
        if status.busy.worker_process_present {
            "present"
        } else {
            "absent"
        },
        status
            .busy
            .cpu_utilization_percent
            .map(|cpu| format!("{cpu:.1}%"))
            .unwrap_or_else(|| "n/a".to_string())
    ));
    lines.push(match &status.latest_backup {
        Some(backup) => format!(
            "latest backup: {} ({} files)",
            backup.id(),
            backup.metadata.files.len()
        ),
        None => "latest backup: none".to_string(),
    });
    lines.push(match &status.last_run {
        Some(run) => format!(
            "last run: {} {} at {} (target {}, last error {})",
            run.run_id,
            run.status,
            run.stage,
            run.target_version,
            run.last_error.map(|kind| kind.as_str()).unwrap_or("none")
        ),
        None => "last run: none".to_string(),
    });
    if let Some(marker) = &status.inconsistency {
        let first_line = marker.lines().next().unwrap_or_default();
        lines.push(render_status_line(
            style,
            "err",
            &format!("inconsistent installation: {first_line}"),
        ));
    }
    lines
}

fn read_manifest(layout: &RunnerLayout) -> Result<Option<InstallManifest>> {
    let path = layout.manifest_path();
    let raw = match fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read {}", path.display()));
        }
    };
    InstallManifest::from_toml_str(&raw).map(Some)
}

pub(crate) fn run_doctor_command(
    layout: &RunnerLayout,
    config: &UpgradeConfig,
    style: OutputStyle,
) -> Result<u8> {
    let manager = SystemServiceManager::for_host(config.service.use_sudo);
    let controller = service_controller(&manager, config, false);
    let checks = collect_doctor_checks(layout, config, &controller);
    for line in format_check_lines(&checks, style) {
        println!("{line}");
    }
    Ok(if checks.iter().any(CheckOutcome::is_failure) {
        1
    } else {
        0
    })
}

pub(crate) fn collect_doctor_checks(
    layout: &RunnerLayout,
    config: &UpgradeConfig,
    controller: &ServiceController<'_>,
) -> Vec<CheckOutcome> {
    let install_dir = layout.install_dir();
    let mut checks = Vec::new();

    if !install_dir.is_dir() {
        checks.push(CheckOutcome::fail(
            "installation_path",
            format!("{} does not exist", install_dir.display()),
        ));
        return checks;
    }
    checks.push(match read_inconsistency_marker(layout) {
        Ok(Some(_)) => CheckOutcome::fail(
            "installation_path",
            format!(
                "{} holds an incomplete restore marker; finish the restore by hand",
                install_dir.display()
            ),
        ),
        Ok(None) => CheckOutcome::pass("installation_path", install_dir.display().to_string()),
        Err(err) => CheckOutcome::warn("installation_path", format!("{err:#}")),
    });

    let minimum_gb = config.disk.minimum_free_gb;
    checks.push(match check_free_space(install_dir, minimum_gb) {
        DiskCheck::Pass { free_gb } => CheckOutcome::pass(
            "disk_space",
            format!("{free_gb:.2} GB free (minimum {minimum_gb:.2} GB)"),
        ),
        DiskCheck::Fail { free_gb: Some(free_gb) } => CheckOutcome::fail(
            "disk_space",
            format!("{free_gb:.2} GB free (minimum {minimum_gb:.2} GB)"),
        ),
        DiskCheck::Fail { free_gb: None } => {
            CheckOutcome::fail("disk_space", "free space could not be determined")
        }
    });

    checks.push(match read_manifest(layout) {
        Ok(Some(manifest)) => CheckOutcome::pass("manifest", format!("version {}", manifest.version)),
        Ok(None) => CheckOutcome::warn(
            "manifest",
            format!("{} missing; next upgrade always installs", layout.manifest_file()),
        ),
        Err(err) => CheckOutcome::fail("manifest", format!("{err:#}")),
    });

    checks.push(match controller.service_name(layout) {
        Ok(Some(name)) => {
            let state = controller.current_state(layout);
            if state == ServiceState::Unknown {
                CheckOutcome::warn("service_registration", format!("{name} (state unknown)"))
            } else {
                CheckOutcome::pass("service_registration", format!("{name} ({state})"))
            }
        }
        Ok(None) => CheckOutcome::warn("service_registration", "no service registered"),
        Err(err) => CheckOutcome::fail("service_registration", format!("{err:#}")),
    });

    checks.push(
        match verify_installation(layout, &config.verify.required_entries) {
            Verification::Pass => CheckOutcome::pass(
                "entry_points",
                format!("{} present", config.verify.required_entries.join(", ")),
            ),
            Verification::Fail { missing } => {
                CheckOutcome::fail("entry_points", format!("missing {}", missing.join(", ")))
            }
        },
    );
    checks
}

pub(crate) fn format_check_lines(checks: &[CheckOutcome], style: OutputStyle) -> Vec<String> {
    checks
        .iter()
        .map(|check| match style {
            OutputStyle::Plain => format!(
                "{} {}: {}",
                check.status.as_str(),
                check.name,
                check.message
            ),
            OutputStyle::Rich => render_status_line(
                style,
                check_status_token(check.status),
                &format!("{}: {}", check.name, check.message),
            ),
        })
        .collect()
}

fn check_status_token(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "ok",
        CheckStatus::Warn => "warn",
        CheckStatus::Fail => "err",
    }
}

pub(crate) fn run_backups_command(layout: &RunnerLayout, style: OutputStyle) -> Result<u8> {
    let backups = list_backups(layout)?;
    for line in format_backup_lines(&backups, style) {
        println!("{line}");
    }
    Ok(0)
}

pub(crate) fn format_backup_lines(backups: &[Backup], style: OutputStyle) -> Vec<String> {
    if backups.is_empty() {
        return vec![render_status_line(style, "step", "no backups")];
    }
    backups
        .iter()
        .map(|backup| {
            let mut line = format!(
                "{} created_at={} files={}",
                backup.id(),
                backup.metadata.created_at_unix,
                backup.metadata.files.len()
            );
            if !backup.metadata.missing.is_empty() {
                line.push_str(&format!(" missing={}", backup.metadata.missing.join(",")));
            }
            line
        })
        .collect()
}

pub(crate) fn run_rollback_command(
    layout: &RunnerLayout,
    config: &UpgradeConfig,
    backup_id: Option<&str>,
    dry_run: bool,
    style: OutputStyle,
) -> Result<u8> {
    let backup = select_backup(layout, backup_id)?;
    let manager = SystemServiceManager::for_host(config.service.use_sudo);
    let controller = service_controller(&manager, config, dry_run);

    match RollbackManager::new(layout, &controller).roll_back(&backup) {
        Ok(report) => {
            for line in format_rollback_lines(&report, style) {
                println!("{line}");
            }
            Ok(0)
        }
        Err(err) => {
            println!("{}", render_status_line(style, "err", &err.to_string()));
            Ok(1)
        }
    }
}

pub(crate) fn select_backup(layout: &RunnerLayout, backup_id: Option<&str>) -> Result<Backup> {
    match backup_id {
        Some(id) => find_backup(layout, id)?
            .ok_or_else(|| anyhow!("backup '{id}' not found under {}", layout.backups_dir().display())),
        None => latest_backup(layout)?
            .ok_or_else(|| anyhow!("no backups under {}", layout.backups_dir().display())),
    }
}

pub(crate) fn format_rollback_lines(report: &RollbackReport, style: OutputStyle) -> Vec<String> {
    let verb = if report.dry_run { "would restore" } else { "restored" };
    let mut lines = vec![render_status_line(
        style,
        if report.dry_run { "step" } else { "ok" },
        &format!("{verb} {} files from {}", report.restored.len(), report.backup_id),
    )];
    lines.extend(report.restored.iter().map(|file| format!("  {file}")));
    lines.push(format!("service: {}", report.service.as_str()));
    lines
}
