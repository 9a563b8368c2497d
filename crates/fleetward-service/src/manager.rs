use std::process::{Command, Output};

use anyhow::{Context, Result};
use fleetward_installer::run_command;
use tracing::debug;

use crate::state::ServiceState;

/// OS-level service registry for a named background service.
pub trait ServiceManager {
    fn query(&self, name: &str) -> Result<ServiceState>;
    fn start(&self, name: &str) -> Result<()>;
    fn stop(&self, name: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceBackend {
    Systemd,
    Launchd,
    WindowsScm,
}

impl ServiceBackend {
    pub fn for_host() -> Self {
        if cfg!(windows) {
            Self::WindowsScm
        } else if cfg!(target_os = "macos") {
            Self::Launchd
        } else {
            Self::Systemd
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Systemd => "systemd",
            Self::Launchd => "launchd",
            Self::WindowsScm => "windows-scm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ControlAction {
    Start,
    Stop,
}

impl ControlAction {
    fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }
}

pub struct SystemServiceManager {
    backend: ServiceBackend,
    use_sudo: bool,
}

impl SystemServiceManager {
    pub fn new(backend: ServiceBackend, use_sudo: bool) -> Self {
        Self { backend, use_sudo }
    }

    pub fn for_host(use_sudo: bool) -> Self {
        Self::new(ServiceBackend::for_host(), use_sudo)
    }

    pub fn backend(&self) -> ServiceBackend {
        self.backend
    }

    fn control(&self, action: ControlAction, name: &str) -> Result<()> {
        let mut command = build_control_command(self.backend, action, name, self.use_sudo);
        debug!(backend = self.backend.as_str(), service = name, action = action.as_str(), "running service command");
        run_command(
            &mut command,
            &format!("failed to {} service '{name}'", action.as_str()),
        )
    }
}

impl ServiceManager for SystemServiceManager {
    fn query(&self, name: &str) -> Result<ServiceState> {
        let output = build_query_command(self.backend, name)
            .output()
            .with_context(|| format!("failed to query service '{name}': command failed to start"))?;
        Ok(parse_query_output(self.backend, &output))
    }

    fn start(&self, name: &str) -> Result<()> {
        self.control(ControlAction::Start, name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.control(ControlAction::Stop, name)
    }
}

pub(crate) fn build_query_command(backend: ServiceBackend, name: &str) -> Command {
    match backend {
        ServiceBackend::Systemd => {
            let mut command = Command::new("systemctl");
            command.arg("is-active").arg(name);
            command
        }
        ServiceBackend::Launchd => {
            let mut command = Command::new("launchctl");
            command.arg("list").arg(name);
            command
        }
        ServiceBackend::WindowsScm => {
            let mut command = Command::new("sc.exe");
            command.arg("query").arg(name);
            command
        }
    }
}

pub(crate) fn build_control_command(
    backend: ServiceBackend,
    action: ControlAction,
    name: &str,
    use_sudo: bool,
) -> Command {
    match backend {
        ServiceBackend::Systemd => {
            let mut command = if use_sudo {
                let mut command = Command::new("sudo");
                command.arg("-n").arg("systemctl");
                command
            } else {
                Command::new("systemctl")
            };
            command.arg(action.as_str()).arg(name);
            command
        }
        ServiceBackend::Launchd => {
            let mut command = Command::new("launchctl");
            command.arg(action.as_str()).arg(name);
            command
        }
        ServiceBackend::WindowsScm => {
            let mut command = Command::new("sc.exe");
            command.arg(action.as_str()).arg(name);
            command
        }
    }
}

fn parse_query_output(backend: ServiceBackend, output: &Output) -> ServiceState {
    let stdout = String::from_utf8_lossy(&output.stdout);
    match backend {
        ServiceBackend::Systemd => parse_systemctl_is_active(&stdout),
        ServiceBackend::Launchd => {
            if output.status.success() {
                parse_launchctl_list(&stdout)
            } else {
                ServiceState::Unknown
            }
        }
        ServiceBackend::WindowsScm => parse_sc_query(&stdout),
    }
}

pub(crate) fn parse_systemctl_is_active(stdout: &str) -> ServiceState {
    match stdout.lines().next().map(str::trim).unwrap_or_default() {
        "active" | "activating" | "reloading" | "deactivating" => ServiceState::Running,
        "inactive" | "failed" => ServiceState::Stopped,
        _ => ServiceState::Unknown,
    }
}

pub(crate) fn parse_launchctl_list(stdout: &str) -> ServiceState {
    let has_pid = stdout.lines().any(|line| {
        let line = line.trim();
        line.starts_with("\"PID\"") && line.contains('=')
    });
    if has_pid {
        ServiceState::Running
    } else {
        ServiceState::Stopped
    }
}

pub(crate) fn parse_sc_query(stdout: &str) -> ServiceState {
    let Some(state_line) = stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("STATE"))
    else {
        return ServiceState::Unknown;
    };

    if state_line.contains("STOPPED") {
        ServiceState::Stopped
    } else if state_line.contains("RUNNING")
        || state_line.contains("STOP_PENDING")
        || state_line.contains("PAUSED")
    {
        ServiceState::Running
    } else {
        ServiceState::Unknown
    }
}
