//! Worker launcher: starts the opaque computation for one datarun as a child
//! process and exposes the handle the monitor supervises.

use std::fs::{self, OpenOptions};
use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;

use tracing::{debug, warn};

use runwarden_core::DatarunId;
use runwarden_infra::WorkerCommand;

/// Handle to one running worker, owned by the monitor that spawned it.
pub trait WorkerHandle: Send {
    /// OS process id.
    fn pid(&self) -> u32;

    /// Non-blocking liveness check. Reaps the process once it has exited.
    fn is_alive(&mut self) -> bool;

    /// Send the termination signal. Delivery is asynchronous; callers recheck
    /// `is_alive` afterwards.
    fn terminate(&mut self) -> io::Result<()>;

    /// Exit code once the process has been reaped.
    ///
    /// On Unix a worker killed by a signal reports the negated signal number.
    fn exit_code(&self) -> Option<i32>;
}

/// Starts workers.
pub trait WorkerLauncher: Send + Sync {
    type Handle: WorkerHandle;

    fn launch(&self, job_id: DatarunId) -> io::Result<Self::Handle>;
}

impl<T: WorkerLauncher + ?Sized> WorkerLauncher for Arc<T> {
    type Handle = T::Handle;

    fn launch(&self, job_id: DatarunId) -> io::Result<Self::Handle> {
        (**self).launch(job_id)
    }
}

/// Launches `<program> <args...> --dataruns <id>`.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    command: WorkerCommand,
}

impl ProcessLauncher {
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }

    fn output(&self, job_id: DatarunId) -> io::Result<(Stdio, Stdio)> {
        let Some(dir) = &self.command.log_dir else {
            return Ok((Stdio::inherit(), Stdio::inherit()));
        };

        fs::create_dir_all(dir)?;
        let path = dir.join(format!("worker-{job_id}.log"));
        let stdout = OpenOptions::new().create(true).append(true).open(&path)?;
        let stderr = stdout.try_clone()?;
        debug!(datarun_id = %job_id, path = %path.display(), "capturing worker output");
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }
}

impl WorkerLauncher for ProcessLauncher {
    type Handle = ProcessWorker;

    fn launch(&self, job_id: DatarunId) -> io::Result<ProcessWorker> {
        let (stdout, stderr) = self.output(job_id)?;

        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .arg("--dataruns")
            .arg(job_id.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .spawn()?;

        Ok(ProcessWorker::new(child))
    }
}

/// A worker running as a direct child process.
#[derive(Debug)]
pub struct ProcessWorker {
    child: Child,
    status: Option<ExitStatus>,
}

impl ProcessWorker {
    pub fn new(child: Child) -> Self {
        Self {
            child,
            status: None,
        }
    }
}

impl WorkerHandle for ProcessWorker {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        if self.status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                self.status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                // The child can no longer be waited on, so it is gone.
                warn!(pid = self.pid(), error = %e, "failed to poll worker process");
                false
            }
        }
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> io::Result<()> {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if self.status.is_some() {
            return Ok(());
        }

        let pid = Pid::from_raw(self.pid() as i32);
        match kill(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> io::Result<()> {
        if self.status.is_some() {
            return Ok(());
        }
        self.child.kill()
    }

    fn exit_code(&self) -> Option<i32> {
        let status = self.status?;

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            status.code().or_else(|| status.signal().map(|sig| -sig))
        }

        #[cfg(not(unix))]
        {
            status.code()
        }
    }
}
