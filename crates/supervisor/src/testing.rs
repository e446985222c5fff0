//! Scripted workers for exercising the monitor and control API in-process.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use runwarden_core::DatarunId;
use runwarden_infra::{ControlPlaneStore, InMemoryControlPlane};

use crate::launcher::{WorkerHandle, WorkerLauncher};
use crate::registration::{registration_key, STOP_SENTINEL};

/// Poll `cond` until it holds; panics after five seconds.
pub(crate) fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Shared state of one fake worker process.
#[derive(Debug)]
pub(crate) struct FakeProcess {
    pid: u32,
    job_id: DatarunId,
    alive: AtomicBool,
    exit_code: Mutex<Option<i32>>,
    ignore_terminates: AtomicU32,
    terminate_calls: AtomicU32,
    entry_present_at_death: Mutex<Option<bool>>,
    store: Option<Arc<InMemoryControlPlane>>,
}

impl FakeProcess {
    /// Let the worker exit on its own with `code`.
    pub(crate) fn exit(&self, code: i32) {
        self.die(code);
    }

    pub(crate) fn is_running(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub(crate) fn terminate_calls(&self) -> u32 {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// Whether the registration entry still existed when the worker died.
    pub(crate) fn entry_present_at_death(&self) -> Option<bool> {
        *self.entry_present_at_death.lock().unwrap()
    }

    fn die(&self, code: i32) {
        if let Some(store) = &self.store {
            let present = store.has(&registration_key(self.job_id)).unwrap();
            *self.entry_present_at_death.lock().unwrap() = Some(present);
        }
        *self.exit_code.lock().unwrap() = Some(code);
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Monitor-side handle onto a [`FakeProcess`].
#[derive(Debug)]
pub(crate) struct FakeWorker(Arc<FakeProcess>);

impl WorkerHandle for FakeWorker {
    fn pid(&self) -> u32 {
        self.0.pid
    }

    fn is_alive(&mut self) -> bool {
        self.0.is_running()
    }

    fn terminate(&mut self) -> io::Result<()> {
        self.0.terminate_calls.fetch_add(1, Ordering::SeqCst);
        let ignored = self
            .0
            .ignore_terminates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !ignored && self.0.is_running() {
            self.0.die(-15);
        }
        Ok(())
    }

    fn exit_code(&self) -> Option<i32> {
        if self.0.is_running() {
            None
        } else {
            *self.0.exit_code.lock().unwrap()
        }
    }
}

/// Launcher producing [`FakeWorker`]s.
#[derive(Debug, Default)]
pub(crate) struct FakeLauncher {
    next_pid: AtomicU32,
    launches: AtomicUsize,
    processes: Mutex<HashMap<DatarunId, Arc<FakeProcess>>>,
    stubborn: u32,
    fail: bool,
    stop_during_launch: bool,
    store: Option<Arc<InMemoryControlPlane>>,
}

impl FakeLauncher {
    pub(crate) fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(9001),
            ..Default::default()
        }
    }

    /// Every launch fails.
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Workers ignore the first `n` terminate signals.
    pub(crate) fn stubborn(mut self, n: u32) -> Self {
        self.stubborn = n;
        self
    }

    /// Write the stop sentinel over the claim while the worker is being
    /// spawned (needs [`FakeLauncher::observing`]).
    pub(crate) fn stopping_during_launch(mut self) -> Self {
        self.stop_during_launch = true;
        self
    }

    /// Record registration state at each worker's death.
    pub(crate) fn observing(mut self, store: Arc<InMemoryControlPlane>) -> Self {
        self.store = Some(store);
        self
    }

    pub(crate) fn process(&self, job_id: DatarunId) -> Option<Arc<FakeProcess>> {
        self.processes.lock().unwrap().get(&job_id).cloned()
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

impl WorkerLauncher for FakeLauncher {
    type Handle = FakeWorker;

    fn launch(&self, job_id: DatarunId) -> io::Result<FakeWorker> {
        if self.fail {
            return Err(io::Error::new(io::ErrorKind::NotFound, "worker program missing"));
        }
        self.launches.fetch_add(1, Ordering::SeqCst);

        if self.stop_during_launch {
            if let Some(store) = &self.store {
                assert!(store.replace(&registration_key(job_id), STOP_SENTINEL).unwrap());
            }
        }

        let process = Arc::new(FakeProcess {
            pid: self.next_pid.fetch_add(1, Ordering::SeqCst),
            job_id,
            alive: AtomicBool::new(true),
            exit_code: Mutex::new(None),
            ignore_terminates: AtomicU32::new(self.stubborn),
            terminate_calls: AtomicU32::new(0),
            entry_present_at_death: Mutex::new(None),
            store: self.store.clone(),
        });
        self.processes
            .lock()
            .unwrap()
            .insert(job_id, process.clone());
        Ok(FakeWorker(process))
    }
}
