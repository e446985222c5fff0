//! The monitor: owns one worker for one datarun from spawn to teardown.
//!
//! ## Protocol
//!
//! ```text
//! STARTING ──► SUPERVISING ──► CLEANUP_EXITED ─────┐
//!    │              │                              ├──► DONE
//!    │              └────────► CLEANUP_TERMINATED ─┘
//!    └── stop arrived before the pid was published ─┘
//! ```
//!
//! - STARTING claims the registration entry (`ProtocolViolation` if taken),
//!   dispatches the worker and publishes its pid over the claim.
//! - SUPERVISING polls worker liveness and the entry. A dead worker leads to
//!   CLEANUP_EXITED; an entry that no longer names the pid leads to
//!   CLEANUP_TERMINATED.
//! - Both cleanups requeue a datarun left `Running` and delete the entry. The
//!   terminated path deletes only after the worker is confirmed dead.

use std::thread;

use tracing::{debug, error, info, warn};

use runwarden_core::DatarunId;
use runwarden_infra::{ControlPlaneStore, JobRepository, Timings};

use crate::error::SupervisorError;
use crate::launcher::{WorkerHandle, WorkerLauncher};
use crate::registration::Registry;

/// Why supervision ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// The worker process went away on its own
    WorkerExited,
    /// The registration entry stopped naming our worker
    Signalled,
}

/// Final result of one supervision episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    /// Worker exited by itself.
    Exited {
        pid: u32,
        exit_code: Option<i32>,
        requeued: bool,
    },
    /// Worker was terminated after a stop request.
    Terminated {
        pid: u32,
        exit_code: Option<i32>,
        requeued: bool,
        signals_sent: u32,
    },
}

impl MonitorOutcome {
    pub fn pid(&self) -> u32 {
        match self {
            MonitorOutcome::Exited { pid, .. } | MonitorOutcome::Terminated { pid, .. } => *pid,
        }
    }

    pub fn requeued(&self) -> bool {
        match self {
            MonitorOutcome::Exited { requeued, .. } | MonitorOutcome::Terminated { requeued, .. } => {
                *requeued
            }
        }
    }
}

/// Supervises a single worker per run.
pub struct Monitor<S, R, L> {
    registry: Registry<S>,
    repo: R,
    launcher: L,
    timings: Timings,
}

impl<S, R, L> Monitor<S, R, L>
where
    S: ControlPlaneStore,
    R: JobRepository,
    L: WorkerLauncher,
{
    pub fn new(store: S, repo: R, launcher: L, timings: Timings) -> Self {
        Self {
            registry: Registry::new(store),
            repo,
            launcher,
            timings,
        }
    }

    /// Start the worker without registering it.
    pub fn dispatch(&self, job_id: DatarunId) -> Result<L::Handle, SupervisorError> {
        self.launcher
            .launch(job_id)
            .map_err(|source| SupervisorError::Spawn { job_id, source })
    }

    /// Run one supervision episode to completion.
    ///
    /// Returns an error only from STARTING (duplicate registration, spawn
    /// failure, unreachable control plane). Once a worker exists the monitor
    /// always drives it to DONE.
    pub fn run(&self, job_id: DatarunId) -> Result<MonitorOutcome, SupervisorError> {
        let (mut worker, registered) = self.start(job_id)?;

        let exit = if registered {
            self.supervise(job_id, &mut worker)
        } else {
            Exit::Signalled
        };

        let outcome = match exit {
            Exit::WorkerExited => self.cleanup_exited(job_id, &worker),
            Exit::Signalled => self.cleanup_terminated(job_id, &mut worker),
        };
        debug!(datarun_id = %job_id, outcome = ?outcome, "monitor done");
        Ok(outcome)
    }

    /// STARTING. Returns the handle and whether its pid was published.
    fn start(&self, job_id: DatarunId) -> Result<(L::Handle, bool), SupervisorError> {
        let claim = match self.registry.claim(job_id) {
            Ok(claim) => claim,
            Err(err) => {
                error!(datarun_id = %job_id, error = %err, "cannot register monitor");
                return Err(err);
            }
        };

        let worker = match self.dispatch(job_id) {
            Ok(worker) => worker,
            Err(err) => {
                error!(datarun_id = %job_id, error = %err, "cannot create worker process");
                self.release(job_id);
                return Err(err);
            }
        };
        let pid = worker.pid();
        info!(datarun_id = %job_id, pid, "worker process started");

        match self.registry.publish_pid(job_id, &claim, pid) {
            Ok(true) => {
                info!(datarun_id = %job_id, pid, "worker process registered");
                Ok((worker, true))
            }
            Ok(false) => {
                warn!(datarun_id = %job_id, pid, "stop requested before registration");
                Ok((worker, false))
            }
            Err(err) => {
                error!(datarun_id = %job_id, pid, error = %err, "cannot publish worker pid; tearing down");
                Ok((worker, false))
            }
        }
    }

    /// SUPERVISING.
    fn supervise(&self, job_id: DatarunId, worker: &mut L::Handle) -> Exit {
        let pid = worker.pid();
        loop {
            if !worker.is_alive() {
                return Exit::WorkerExited;
            }

            match self.registry.is_owned_by(job_id, pid) {
                Ok(true) => thread::sleep(self.timings.poll_interval),
                Ok(false) => return Exit::Signalled,
                Err(err) => {
                    // Keep supervising; a stop request will be seen once the
                    // store answers again.
                    warn!(datarun_id = %job_id, pid, error = %err, "cannot read registration");
                    thread::sleep(self.timings.terminate_long_wait);
                }
            }
        }
    }

    /// CLEANUP_EXITED.
    fn cleanup_exited(&self, job_id: DatarunId, worker: &L::Handle) -> MonitorOutcome {
        let pid = worker.pid();
        let exit_code = worker.exit_code();
        warn!(datarun_id = %job_id, pid, exit_code = ?exit_code, "worker process exited");

        self.release(job_id);
        let requeued = self.reconcile(job_id);

        MonitorOutcome::Exited {
            pid,
            exit_code,
            requeued,
        }
    }

    /// CLEANUP_TERMINATED.
    fn cleanup_terminated(&self, job_id: DatarunId, worker: &mut L::Handle) -> MonitorOutcome {
        let pid = worker.pid();
        let mut signals_sent = 0;

        while worker.is_alive() {
            if let Err(err) = worker.terminate() {
                warn!(datarun_id = %job_id, pid, error = %err, "failed to signal worker");
            }
            signals_sent += 1;

            // Delivery is asynchronous: give it a moment before rechecking.
            thread::sleep(self.timings.terminate_short_wait);
            if !worker.is_alive() {
                break;
            }

            warn!(
                datarun_id = %job_id,
                pid,
                attempt = signals_sent,
                wait_ms = self.timings.terminate_short_wait.as_millis() as u64,
                retry_in_ms = self.timings.terminate_long_wait.as_millis() as u64,
                "worker still alive after terminate; retrying"
            );
            thread::sleep(self.timings.terminate_long_wait);
        }

        // The run may or may not have completed before the signal landed.
        let requeued = self.reconcile(job_id);
        let exit_code = worker.exit_code();
        warn!(datarun_id = %job_id, pid, exit_code = ?exit_code, "worker process terminated");
        self.release(job_id);

        MonitorOutcome::Terminated {
            pid,
            exit_code,
            requeued,
            signals_sent,
        }
    }

    /// Requeue a datarun whose worker is gone but which still reads `Running`.
    ///
    /// Best-effort: failures are logged and never block deregistration.
    fn reconcile(&self, job_id: DatarunId) -> bool {
        match self.repo.requeue_if_running(job_id) {
            Ok(true) => {
                info!(datarun_id = %job_id, "datarun was still running; marked pending");
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(datarun_id = %job_id, error = %err, "failed to reconcile datarun status");
                false
            }
        }
    }

    fn release(&self, job_id: DatarunId) {
        if let Err(err) = self.registry.release(job_id) {
            error!(datarun_id = %job_id, error = %err, "failed to delete registration entry");
        }
    }
}
