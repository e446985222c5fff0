//! Control API: the two entry points an API layer calls.
//!
//! - `start_worker` hands a pending datarun to a freshly spawned monitor
//! - `stop_worker` asks the owning monitor to tear down and waits for it
//!
//! Monitors normally run as detached processes ([`ProcessMonitorSpawner`]) so
//! that a crashing caller never takes worker supervision down with it.
//! [`ThreadMonitorSpawner`] runs them as threads instead, for single-process
//! embedding and tests.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, info, warn};

use runwarden_core::DatarunId;
use runwarden_infra::{ControlPlaneStore, JobRepository, Timings};

use crate::error::SupervisorError;
use crate::launcher::WorkerLauncher;
use crate::monitor::{Monitor, MonitorOutcome};
use crate::registration::{Registration, Registry};

/// Starts a monitor bound to one datarun without waiting for it.
pub trait MonitorSpawner: Send + Sync {
    fn spawn_monitor(&self, job_id: DatarunId) -> Result<(), SupervisorError>;
}

/// Spawns `<program> <args...> monitor <id>` as a detached process.
///
/// The child inherits the environment (and with it the configuration). On Unix
/// it is placed in its own process group so terminal signals aimed at the
/// caller do not reach it.
///
/// The monitor outlives the caller, so it never shares the caller's stdout or
/// stderr: both go to `<log_dir>/monitor-<id>.log` when a log directory is set
/// and are discarded otherwise. Workers inherit the monitor's streams.
#[derive(Debug, Clone)]
pub struct ProcessMonitorSpawner {
    program: PathBuf,
    args: Vec<String>,
    log_dir: Option<PathBuf>,
}

impl ProcessMonitorSpawner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_dir: None,
        }
    }

    /// Re-invoke the running binary (`runwarden monitor <id>`).
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    fn log_path(&self, job_id: DatarunId) -> Option<PathBuf> {
        self.log_dir
            .as_ref()
            .map(|dir| dir.join(format!("monitor-{job_id}.log")))
    }

    fn output(&self, job_id: DatarunId) -> io::Result<(Stdio, Stdio)> {
        let Some(path) = self.log_path(job_id) else {
            return Ok((Stdio::null(), Stdio::null()));
        };
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let stdout = OpenOptions::new().create(true).append(true).open(&path)?;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    fn command(&self, job_id: DatarunId) -> io::Result<Command> {
        let (stdout, stderr) = self.output(job_id)?;

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("monitor")
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        Ok(command)
    }
}

impl MonitorSpawner for ProcessMonitorSpawner {
    fn spawn_monitor(&self, job_id: DatarunId) -> Result<(), SupervisorError> {
        let mut child = self
            .command(job_id)
            .and_then(|mut command| command.spawn())
            .map_err(|source| SupervisorError::MonitorSpawn { job_id, source })?;
        let pid = child.id();
        info!(datarun_id = %job_id, pid, "monitor process started");

        // Reap the monitor when it finishes so long-lived callers do not
        // accumulate zombies.
        thread::Builder::new()
            .name(format!("monitor-reaper-{job_id}"))
            .spawn(move || match child.wait() {
                Ok(status) if status.success() => {
                    debug!(datarun_id = %job_id, pid, "monitor process finished")
                }
                Ok(status) => {
                    warn!(datarun_id = %job_id, pid, status = %status, "monitor process failed")
                }
                Err(err) => warn!(datarun_id = %job_id, pid, error = %err, "cannot wait for monitor"),
            })
            .map_err(|source| SupervisorError::MonitorSpawn { job_id, source })?;

        Ok(())
    }
}

type MonitorResult = Result<MonitorOutcome, SupervisorError>;

/// Runs each monitor on its own thread inside the current process.
pub struct ThreadMonitorSpawner<S, R, L> {
    monitor: Arc<Monitor<S, R, L>>,
    running: Mutex<Vec<(DatarunId, thread::JoinHandle<MonitorResult>)>>,
}

impl<S, R, L> ThreadMonitorSpawner<S, R, L>
where
    S: ControlPlaneStore + 'static,
    R: JobRepository + 'static,
    L: WorkerLauncher + 'static,
{
    pub fn new(monitor: Monitor<S, R, L>) -> Self {
        Self {
            monitor: Arc::new(monitor),
            running: Mutex::new(Vec::new()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Vec<(DatarunId, thread::JoinHandle<MonitorResult>)>> {
        self.running.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Wait for every monitor spawned so far and collect their results.
    pub fn join_all(&self) -> Vec<(DatarunId, MonitorResult)> {
        let handles = std::mem::take(&mut *self.tracked());

        handles
            .into_iter()
            .filter_map(|(job_id, handle)| handle.join().ok().map(|result| (job_id, result)))
            .collect()
    }
}

impl<S, R, L> MonitorSpawner for ThreadMonitorSpawner<S, R, L>
where
    S: ControlPlaneStore + 'static,
    R: JobRepository + 'static,
    L: WorkerLauncher + 'static,
{
    fn spawn_monitor(&self, job_id: DatarunId) -> Result<(), SupervisorError> {
        let monitor = self.monitor.clone();
        let handle = thread::Builder::new()
            .name(format!("monitor-{job_id}"))
            .spawn(move || monitor.run(job_id))
            .map_err(|source| SupervisorError::MonitorSpawn { job_id, source })?;

        self.tracked().push((job_id, handle));
        Ok(())
    }
}

impl<T: MonitorSpawner + ?Sized> MonitorSpawner for Arc<T> {
    fn spawn_monitor(&self, job_id: DatarunId) -> Result<(), SupervisorError> {
        (**self).spawn_monitor(job_id)
    }
}

/// Start/stop entry points.
pub struct WorkerControl<S, R, M> {
    registry: Registry<S>,
    repo: R,
    spawner: M,
    timings: Timings,
}

impl<S, R, M> WorkerControl<S, R, M>
where
    S: ControlPlaneStore,
    R: JobRepository,
    M: MonitorSpawner,
{
    pub fn new(store: S, repo: R, spawner: M, timings: Timings) -> Self {
        Self {
            registry: Registry::new(store),
            repo,
            spawner,
            timings,
        }
    }

    /// Current registration for a datarun (for status reporting).
    pub fn registration(&self, job_id: DatarunId) -> Result<Option<Registration>, SupervisorError> {
        Ok(self.registry.lookup(job_id)?)
    }

    /// Hand a pending datarun to a new monitor.
    ///
    /// Does nothing when the datarun is not pending. Returns after the start
    /// grace period; the worker is not guaranteed to be registered yet.
    pub fn start_worker(&self, job_id: DatarunId) -> Result<(), SupervisorError> {
        let record = self
            .repo
            .get_job(job_id)?
            .ok_or(SupervisorError::NotFound(job_id))?;

        if !record.is_pending() {
            debug!(datarun_id = %job_id, status = %record.status, "datarun not pending; start ignored");
            return Ok(());
        }

        self.spawner.spawn_monitor(job_id)?;
        thread::sleep(self.timings.start_grace);
        Ok(())
    }

    /// Stop the datarun's worker.
    ///
    /// Returns `true` once a supervised worker has been torn down and its
    /// entry deleted, `false` when nothing was supervising the datarun (a
    /// stale `Running` status is reset to `Pending` in that case).
    pub fn stop_worker(&self, job_id: DatarunId) -> Result<bool, SupervisorError> {
        if let Some(current) = self.registry.lookup(job_id)? {
            // Overwrite, never delete: deletion is the monitor's
            // acknowledgement that teardown finished.
            if self.registry.signal_stop(job_id)? {
                warn!(datarun_id = %job_id, registration = %current, "terminating worker process");
                while self.registry.is_registered(job_id)? {
                    thread::sleep(self.timings.stop_poll_interval);
                }
                info!(datarun_id = %job_id, "worker process stopped");
                return Ok(true);
            }
        }

        warn!(datarun_id = %job_id, "no registered worker for datarun");
        if self.repo.requeue_if_running(job_id)? {
            warn!(datarun_id = %job_id, "orphaned running datarun marked pending");
        }
        Ok(false)
    }
}
