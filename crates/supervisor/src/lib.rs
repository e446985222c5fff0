//! Single-worker-per-datarun process supervision.
//!
//! A [`Monitor`] owns exactly one worker process for one datarun and
//! advertises it through a registration entry in the control plane.
//! [`WorkerControl`] is the caller-facing API: `start_worker` hands a pending
//! datarun to a new monitor, `stop_worker` asks the owning monitor to tear
//! down and waits until it has.

pub mod control;
pub mod error;
pub mod launcher;
pub mod monitor;
pub mod registration;

#[cfg(test)]
mod testing;

pub use control::{MonitorSpawner, ProcessMonitorSpawner, ThreadMonitorSpawner, WorkerControl};
pub use error::SupervisorError;
pub use launcher::{ProcessLauncher, ProcessWorker, WorkerHandle, WorkerLauncher};
pub use monitor::{Monitor, MonitorOutcome};
pub use registration::{registration_key, Registration, Registry, STOP_SENTINEL};
