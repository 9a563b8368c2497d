use fleetward_core::{InstalledVersion, TargetRelease, UpgradeConfig, UpgradeError, UpgradePlan};
use fleetward_installer::{
    check_free_space, create_backup, current_unix_timestamp, verify_installation, Backup,
    ReleaseInstaller, RunnerLayout, Verification,
};
use fleetward_release::VersionResolver;
use fleetward_service::{BusySampler, IdleWaiter, ServiceController};
use tracing::{debug, error, info, warn};

use crate::report::{UpgradeOutcome, UpgradeReport};
use crate::rollback::RollbackManager;
use crate::run_journal::RunJournal;
use crate::stage::{Stage, StageObserver};

/// Everything the orchestrator talks to, injected by the caller.
pub struct Collaborators<'a> {
    pub resolver: &'a VersionResolver<'a>,
    pub busy: &'a dyn BusySampler,
    pub service: &'a ServiceController<'a>,
    pub installer: &'a dyn ReleaseInstaller,
}

pub struct UpgradeOrchestrator<'a> {
    layout: &'a RunnerLayout,
    config: &'a UpgradeConfig,
    deps: Collaborators<'a>,
    observer: Option<&'a dyn StageObserver>,
}

enum Step {
    Next(Stage),
    Finish(UpgradeOutcome),
}

struct RunContext<'j> {
    installed: InstalledVersion,
    target: Option<TargetRelease>,
    backup: Option<Backup>,
    /// Install or verify failure awaiting rollback.
    cause: Option<UpgradeError>,
    stages: Vec<Stage>,
    journal: RunJournal<'j>,
}

impl<'a> UpgradeOrchestrator<'a> {
    pub fn new(layout: &'a RunnerLayout, config: &'a UpgradeConfig, deps: Collaborators<'a>) -> Self {
        Self {
            layout,
            config,
            deps,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn StageObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drives one run from `Preflight` to a terminal stage. Never panics or
    /// returns early; every failure is folded into the report's outcome.
    pub fn run(&self, plan: &UpgradePlan) -> UpgradeReport {
        let started_at_unix = current_unix_timestamp().unwrap_or_default();
        let run_id = format!("run-{started_at_unix}-{}", std::process::id());
        let mut ctx = RunContext {
            installed: InstalledVersion::Unknown,
            target: None,
            backup: None,
            cause: None,
            stages: Vec::new(),
            journal: RunJournal::new(self.layout, run_id.clone(), started_at_unix),
        };

        info!(
            run = %run_id,
            path = %self.layout.install_dir().display(),
            dry_run = plan.dry_run,
            force = plan.force,
            "starting upgrade run"
        );

        let mut stage = Stage::Preflight;
        let outcome = loop {
            self.enter(stage, &mut ctx);
            match self.step(stage, plan, &mut ctx) {
                Step::Next(next) => stage = next,
                Step::Finish(outcome) => break outcome,
            }
        };

        let terminal = outcome.stage();
        self.enter(terminal, &mut ctx);
        ctx.journal
            .finish(terminal, outcome.as_str(), outcome.failure_kind());
        match outcome.error() {
            Some(err) if err.kind().requires_manual_intervention() => error!(
                outcome = outcome.as_str(),
                kind = err.kind().as_str(),
                error = %err,
                "upgrade run finished; manual intervention required"
            ),
            Some(err) => warn!(
                outcome = outcome.as_str(),
                kind = err.kind().as_str(),
                error = %err,
                "upgrade run finished"
            ),
            None => info!(outcome = outcome.as_str(), "upgrade run finished"),
        }

        let report = UpgradeReport {
            run_id,
            outcome,
            installed_version: ctx.installed,
            target_version: ctx.target.map(|target| target.version),
            stages: ctx.stages,
            backup_id: ctx.backup.map(|backup| backup.metadata.id),
            dry_run: plan.dry_run,
        };
        if let Some(observer) = self.observer {
            observer.run_finished(&report);
        }
        report
    }

    fn enter(&self, stage: Stage, ctx: &mut RunContext<'_>) {
        debug!(stage = %stage, "entering stage");
        ctx.stages.push(stage);
        if !stage.is_terminal() {
            ctx.journal.stage(stage, "entered", None);
        }
        if let Some(observer) = self.observer {
            observer.stage_entered(stage);
        }
    }

    fn step(&self, stage: Stage, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        if stage.is_mutating() && !plan.dry_run {
            self.open_journal(stage, ctx);
        }
        match stage {
            Stage::Preflight => self.preflight(),
            Stage::ResolveVersions => self.resolve_versions(plan, ctx),
            Stage::BusyCheck => self.busy_check(plan),
            Stage::IdleWait => self.idle_wait(plan),
            Stage::Backup => self.backup(plan, ctx),
            Stage::Stop => self.stop(plan, ctx),
            Stage::Install => self.install(plan, ctx),
            Stage::Verify => self.verify(plan, ctx),
            Stage::Rollback => self.rollback(ctx),
            Stage::Start => self.start(plan, ctx),
            terminal => Step::Finish(UpgradeOutcome::Failed(UpgradeError::Install {
                version: target_label(ctx),
                message: format!("terminal stage {terminal} has no transition"),
            })),
        }
    }

    fn preflight(&self) -> Step {
        let install_dir = self.layout.install_dir();
        if !install_dir.is_dir() {
            return Step::Finish(UpgradeOutcome::Failed(UpgradeError::PathNotFound {
                path: install_dir.to_path_buf(),
            }));
        }

        let minimum_gb = self.config.disk.minimum_free_gb;
        let disk = check_free_space(install_dir, minimum_gb);
        if !disk.passed() {
            return Step::Finish(UpgradeOutcome::Failed(UpgradeError::InsufficientDisk {
                path: install_dir.to_path_buf(),
                free_gb: disk.free_gb(),
                minimum_gb,
            }));
        }
        Step::Next(Stage::ResolveVersions)
    }

    fn resolve_versions(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        ctx.installed = self
            .deps
            .resolver
            .installed_version(&self.layout.manifest_path());

        let target = match self
            .deps
            .resolver
            .target_release(plan.target_version.as_ref())
        {
            Ok(target) => target,
            Err(err) => return Step::Finish(UpgradeOutcome::Failed(UpgradeError::network(&err))),
        };
        info!(installed = %ctx.installed, target = %target.version, "resolved versions");

        let up_to_date = ctx.installed.matches(&target.version);
        if let Some(installed) = ctx.installed.as_version() {
            if *installed > target.version {
                warn!(installed = %installed, target = %target.version, "target is older than installed version");
            }
        }
        ctx.target = Some(target);

        if up_to_date {
            if !plan.force {
                info!("installation already at target version");
                return Step::Finish(UpgradeOutcome::SkippedUpToDate);
            }
            warn!("already at target version; reinstalling because force is set");
        }
        Step::Next(Stage::BusyCheck)
    }

    fn busy_check(&self, plan: &UpgradePlan) -> Step {
        let signal = self.deps.busy.sample_busy();
        if !signal.busy {
            info!(service = %signal.service_state, "worker idle");
            return Step::Next(Stage::Backup);
        }
        if plan.dry_run {
            info!(
                max_wait_minutes = plan.max_wait_minutes,
                "dry-run: worker busy; would wait for it to go idle"
            );
            return Step::Next(Stage::Backup);
        }
        info!(max_wait_minutes = plan.max_wait_minutes, "worker busy; waiting for idle");
        Step::Next(Stage::IdleWait)
    }

    fn idle_wait(&self, plan: &UpgradePlan) -> Step {
        let waiter = IdleWaiter::new(self.deps.busy, self.config.busy.poll_interval());
        let outcome = waiter.wait_until_idle(plan.max_wait());
        if outcome.is_idle() {
            return Step::Next(Stage::Backup);
        }
        let waited_secs = outcome.waited().as_secs();
        if !plan.force {
            return Step::Finish(UpgradeOutcome::Failed(UpgradeError::BusyTimeout { waited_secs }));
        }
        warn!(waited_secs, "worker still busy; proceeding because force is set");
        Step::Next(Stage::Backup)
    }

    fn backup(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        if plan.dry_run {
            info!(
                files = ?self.config.backup.state_files,
                "dry-run: would back up state files"
            );
            return Step::Next(Stage::Stop);
        }
        if !plan.takes_backup() {
            warn!("backup skipped by request; a failed install cannot be rolled back");
            return Step::Next(Stage::Stop);
        }

        match create_backup(self.layout, &self.config.backup.state_files) {
            Ok(backup) => {
                ctx.journal.set_backup(backup.id());
                ctx.backup = Some(backup);
                Step::Next(Stage::Stop)
            }
            Err(err) => Step::Finish(UpgradeOutcome::Failed(UpgradeError::backup(&err))),
        }
    }

    fn stop(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        if plan.dry_run {
            let state = self.deps.service.current_state(self.layout);
            info!(state = %state, "dry-run: would stop runner service");
            return Step::Next(Stage::Install);
        }
        match self.deps.service.stop(self.layout) {
            Ok(action) => {
                debug!(?action, "stop finished");
                Step::Next(Stage::Install)
            }
            Err(err) => Step::Finish(UpgradeOutcome::Failed(UpgradeError::service("stop", &err))),
        }
    }

    fn install(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        let Some(target) = ctx.target.as_ref() else {
            return unresolved_target(Stage::Install);
        };
        if plan.dry_run {
            info!(
                version = %target.version,
                url = target.download_url.as_deref().unwrap_or("<none>"),
                "dry-run: would install release"
            );
            return Step::Next(Stage::Verify);
        }

        match self.deps.installer.install(self.layout, target) {
            Ok(()) => Step::Next(Stage::Verify),
            Err(err) => {
                let failure = UpgradeError::install(&target.version, &err);
                warn!(error = %failure, "install failed; rolling back");
                ctx.cause = Some(failure);
                Step::Next(Stage::Rollback)
            }
        }
    }

    fn verify(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        let required = &self.config.verify.required_entries;
        if plan.dry_run {
            info!(entries = ?required, "dry-run: would verify entry points");
            return Step::Next(Stage::Start);
        }

        match verify_installation(self.layout, required) {
            Verification::Pass => Step::Next(Stage::Start),
            Verification::Fail { missing } => {
                let failure = UpgradeError::Verification { missing };
                warn!(error = %failure, "verification failed; rolling back");
                ctx.cause = Some(failure);
                Step::Next(Stage::Rollback)
            }
        }
    }

    fn rollback(&self, ctx: &mut RunContext<'_>) -> Step {
        let cause = ctx.cause.take().unwrap_or_else(|| UpgradeError::Install {
            version: target_label(ctx),
            message: "rollback entered without a recorded failure".to_string(),
        });

        let Some(backup) = ctx.backup.as_ref() else {
            warn!("no backup to restore; leaving installation as the failed step left it");
            return Step::Finish(UpgradeOutcome::Failed(UpgradeError::NoBackupToRestore {
                cause: Box::new(cause),
            }));
        };

        let manager = RollbackManager::new(self.layout, self.deps.service);
        match manager.roll_back(backup) {
            Ok(report) => {
                info!(
                    backup = %report.backup_id,
                    restored = report.restored.len(),
                    "installation rolled back"
                );
                Step::Finish(UpgradeOutcome::RolledBack {
                    cause,
                    backup: backup.dir.clone(),
                })
            }
            Err(failure) => Step::Finish(UpgradeOutcome::Failed(failure)),
        }
    }

    fn start(&self, plan: &UpgradePlan, ctx: &mut RunContext<'_>) -> Step {
        if plan.dry_run {
            info!("dry-run: would start runner service");
            return Step::Finish(UpgradeOutcome::DryRunCompleted);
        }
        match self.deps.service.start(self.layout) {
            Ok(action) => {
                debug!(?action, "start finished");
                Step::Finish(UpgradeOutcome::Succeeded)
            }
            Err(err) => {
                let err = err.context(format!("runner {} is installed", target_label(ctx)));
                Step::Finish(UpgradeOutcome::Failed(UpgradeError::service("start", &err)))
            }
        }
    }

    /// Opens the journal at the first mutating stage and records that stage.
    /// Later mutating stages find it already open.
    fn open_journal(&self, stage: Stage, ctx: &mut RunContext<'_>) {
        if ctx.journal.is_open() {
            return;
        }
        let target = target_label(ctx);
        let installed = ctx.installed.to_string();
        ctx.journal.open(&installed, &target);
        ctx.journal.stage(stage, "entered", None);
    }
}

fn target_label(ctx: &RunContext<'_>) -> String {
    ctx.target
        .as_ref()
        .map(|target| target.version.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn unresolved_target(stage: Stage) -> Step {
    Step::Finish(UpgradeOutcome::Failed(UpgradeError::Install {
        version: "unknown".to_string(),
        message: format!("{stage} reached before a target version was resolved"),
    }))
}
