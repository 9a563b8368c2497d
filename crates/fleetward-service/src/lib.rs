mod busy;
mod controller;
mod manager;
mod probe;
mod state;

pub use busy::{BusyDetector, BusySampler, BusySignal, IdleOutcome, IdleWaiter};
pub use controller::{ServiceAction, ServiceController};
pub use manager::{ServiceBackend, ServiceManager, SystemServiceManager};
pub use probe::{ProcessProbe, SystemProbe};
pub use state::ServiceState;
