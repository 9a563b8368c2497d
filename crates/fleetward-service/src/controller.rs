use std::fs;
use std::io;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use fleetward_installer::RunnerLayout;
use tracing::{debug, info, warn};

use crate::manager::ServiceManager;
use crate::state::ServiceState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceAction {
    Stopped,
    Started,
    AlreadyStopped,
    AlreadyRunning,
    /// Fresh installs have no service yet; callers continue.
    NotRegistered,
    DryRun,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Started => "started",
            Self::AlreadyStopped => "already stopped",
            Self::AlreadyRunning => "already running",
            Self::NotRegistered => "not registered",
            Self::DryRun => "dry-run",
        }
    }
}

/// Idempotent start/stop of the runner's registered service.
pub struct ServiceController<'a> {
    manager: &'a dyn ServiceManager,
    name_override: Option<String>,
    dry_run: bool,
    settle_timeout: Duration,
    settle_poll: Duration,
}

impl<'a> ServiceController<'a> {
    pub fn new(manager: &'a dyn ServiceManager, name_override: Option<String>) -> Self {
        Self {
            manager,
            name_override,
            dry_run: false,
            settle_timeout: Duration::from_secs(30),
            settle_poll: Duration::from_millis(500),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn settle_timeout(mut self, settle_timeout: Duration) -> Self {
        self.settle_timeout = settle_timeout;
        self
    }

    pub fn settle_poll(mut self, settle_poll: Duration) -> Self {
        self.settle_poll = settle_poll;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Service name from the config override, else the installation's service file.
    pub fn service_name(&self, layout: &RunnerLayout) -> Result<Option<String>> {
        if let Some(name) = &self.name_override {
            return Ok(Some(name.clone()));
        }
        let path = layout.service_file_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read service file: {}", path.display()));
            }
        };
        Ok(raw
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(ToOwned::to_owned))
    }

    /// Queried fresh on every call; errors degrade to `Unknown`.
    pub fn current_state(&self, layout: &RunnerLayout) -> ServiceState {
        let name = match self.service_name(layout) {
            Ok(Some(name)) => name,
            Ok(None) => return ServiceState::Unknown,
            Err(err) => {
                let detail = format!("{err:#}");
                debug!(error = %detail, "service name unavailable");
                return ServiceState::Unknown;
            }
        };
        match self.manager.query(&name) {
            Ok(state) => state,
            Err(err) => {
                let detail = format!("{err:#}");
                debug!(service = %name, error = %detail, "service query failed");
                ServiceState::Unknown
            }
        }
    }

    pub fn stop(&self, layout: &RunnerLayout) -> Result<ServiceAction> {
        let Some(name) = self.service_name(layout)? else {
            warn!("no registered runner service found; skipping stop");
            return Ok(ServiceAction::NotRegistered);
        };

        let state = self.manager.query(&name)?;
        if state == ServiceState::Stopped {
            info!(service = %name, "service already stopped");
            return Ok(ServiceAction::AlreadyStopped);
        }
        if self.dry_run {
            info!(service = %name, state = %state, "dry-run: would stop service");
            return Ok(ServiceAction::DryRun);
        }

        self.manager.stop(&name)?;
        let settled = self.wait_for_state(&name, ServiceState::Stopped)?;
        match settled {
            ServiceState::Stopped => {}
            ServiceState::Unknown => {
                warn!(service = %name, "service state unknown after stop; continuing");
            }
            ServiceState::Running => {
                return Err(anyhow!(
                    "service '{name}' still running {}s after stop",
                    self.settle_timeout.as_secs()
                ));
            }
        }
        info!(service = %name, "service stopped");
        Ok(ServiceAction::Stopped)
    }

    pub fn start(&self, layout: &RunnerLayout) -> Result<ServiceAction> {
        let Some(name) = self.service_name(layout)? else {
            warn!("no registered runner service found; skipping start");
            return Ok(ServiceAction::NotRegistered);
        };

        let state = self.manager.query(&name)?;
        if state == ServiceState::Running {
            info!(service = %name, "service already running");
            return Ok(ServiceAction::AlreadyRunning);
        }
        if self.dry_run {
            info!(service = %name, state = %state, "dry-run: would start service");
            return Ok(ServiceAction::DryRun);
        }

        self.manager.start(&name)?;
        let settled = self.wait_for_state(&name, ServiceState::Running)?;
        match settled {
            ServiceState::Running => {}
            ServiceState::Unknown => {
                warn!(service = %name, "service state unknown after start");
            }
            ServiceState::Stopped => {
                return Err(anyhow!(
                    "service '{name}' not running {}s after start",
                    self.settle_timeout.as_secs()
                ));
            }
        }
        info!(service = %name, "service started");
        Ok(ServiceAction::Started)
    }

    fn wait_for_state(&self, name: &str, wanted: ServiceState) -> Result<ServiceState> {
        let deadline = Instant::now().checked_add(self.settle_timeout);
        loop {
            let state = self.manager.query(name)?;
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.settle_poll,
            };
            if state == wanted || remaining.is_zero() {
                return Ok(state);
            }
            thread::sleep(self.settle_poll.min(remaining));
        }
    }
}
