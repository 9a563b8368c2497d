use std::thread;
use std::time::{Duration, Instant};

use fleetward_core::BusyConfig;
use fleetward_installer::RunnerLayout;
use tracing::{debug, info, warn};

use crate::controller::ServiceController;
use crate::probe::ProcessProbe;
use crate::state::ServiceState;

/// Point-in-time read of whether the worker is mid-job.
#[derive(Debug, Clone, PartialEq)]
pub struct BusySignal {
    pub service_state: ServiceState,
    pub worker_process_present: bool,
    pub cpu_utilization_percent: Option<f64>,
    pub busy: bool,
}

impl BusySignal {
    pub fn evaluate(
        service_state: ServiceState,
        worker_process_present: bool,
        cpu_utilization_percent: Option<f64>,
        cpu_threshold_percent: f64,
    ) -> Self {
        let cpu_hot = cpu_utilization_percent.is_some_and(|cpu| cpu > cpu_threshold_percent);
        let busy = service_state == ServiceState::Running && (worker_process_present || cpu_hot);
        Self {
            service_state,
            worker_process_present,
            cpu_utilization_percent,
            busy,
        }
    }

    pub fn idle(service_state: ServiceState) -> Self {
        Self {
            service_state,
            worker_process_present: false,
            cpu_utilization_percent: None,
            busy: false,
        }
    }
}

pub trait BusySampler {
    /// Single synchronous sample, bounded by the configured CPU window.
    fn sample_busy(&self) -> BusySignal;
}

pub struct BusyDetector<'a> {
    controller: &'a ServiceController<'a>,
    layout: &'a RunnerLayout,
    probe: &'a dyn ProcessProbe,
    config: BusyConfig,
}

impl<'a> BusyDetector<'a> {
    pub fn new(
        controller: &'a ServiceController<'a>,
        layout: &'a RunnerLayout,
        probe: &'a dyn ProcessProbe,
        config: BusyConfig,
    ) -> Self {
        Self {
            controller,
            layout,
            probe,
            config,
        }
    }
}

impl BusySampler for BusyDetector<'_> {
    fn sample_busy(&self) -> BusySignal {
        let service_state = self.controller.current_state(self.layout);
        if service_state != ServiceState::Running {
            debug!(state = %service_state, "service not running; worker idle");
            return BusySignal::idle(service_state);
        }

        let worker_process_present = match self
            .probe
            .worker_process_present(&self.config.worker_process_name)
        {
            Ok(present) => present,
            Err(err) => {
                let detail = format!("{err:#}");
                warn!(error = %detail, "process probe failed; assuming worker present");
                true
            }
        };

        let cpu_utilization_percent = match self
            .probe
            .cpu_utilization_percent(self.config.cpu_sample_window())
        {
            Ok(sample) => sample,
            Err(err) => {
                let detail = format!("{err:#}");
                debug!(error = %detail, "cpu sample unavailable");
                None
            }
        };

        let signal = BusySignal::evaluate(
            service_state,
            worker_process_present,
            cpu_utilization_percent,
            self.config.cpu_threshold_percent,
        );
        debug!(
            worker = signal.worker_process_present,
            cpu = ?signal.cpu_utilization_percent,
            busy = signal.busy,
            "busy sample"
        );
        signal
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IdleOutcome {
    Idle { waited: Duration, samples: u32 },
    TimedOut { waited: Duration, samples: u32 },
}

impl IdleOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle { .. })
    }

    pub fn waited(&self) -> Duration {
        match self {
            Self::Idle { waited, .. } | Self::TimedOut { waited, .. } => *waited,
        }
    }
}

/// Polls a sampler until idle or the deadline passes. Never errors.
pub struct IdleWaiter<'a> {
    sampler: &'a dyn BusySampler,
    poll_interval: Duration,
}

impl<'a> IdleWaiter<'a> {
    pub fn new(sampler: &'a dyn BusySampler, poll_interval: Duration) -> Self {
        Self {
            sampler,
            poll_interval,
        }
    }

    pub fn wait_until_idle(&self, max_wait: Duration) -> IdleOutcome {
        let started = Instant::now();
        // A wait too long to represent as an instant has no deadline.
        let deadline = started.checked_add(max_wait);
        let mut samples = 0u32;

        loop {
            let signal = self.sampler.sample_busy();
            samples += 1;
            if !signal.busy {
                let waited = started.elapsed();
                if samples > 1 {
                    info!(waited_secs = waited.as_secs(), samples, "worker became idle");
                }
                return IdleOutcome::Idle { waited, samples };
            }

            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => self.poll_interval,
            };
            if remaining.is_zero() {
                let waited = started.elapsed();
                warn!(waited_secs = waited.as_secs(), samples, "worker still busy at deadline");
                return IdleOutcome::TimedOut { waited, samples };
            }
            debug!(samples, "worker busy; waiting");
            thread::sleep(self.poll_interval.min(remaining));
        }
    }
}
