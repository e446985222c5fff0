#![cfg(unix)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use runwarden_core::{DatarunId, JobRecord, JobStatus};
use runwarden_infra::{
    ControlPlaneStore, InMemoryControlPlane, InMemoryJobRepository, JobRepository, Timings,
    WorkerCommand,
};
use runwarden_supervisor::{
    registration_key, Monitor, MonitorOutcome, ProcessLauncher, Registration, SupervisorError,
    ThreadMonitorSpawner, WorkerControl,
};

type Spawner = ThreadMonitorSpawner<Arc<InMemoryControlPlane>, Arc<InMemoryJobRepository>, ProcessLauncher>;

struct Harness {
    store: Arc<InMemoryControlPlane>,
    repo: Arc<InMemoryJobRepository>,
    spawner: Arc<Spawner>,
    control: WorkerControl<Arc<InMemoryControlPlane>, Arc<InMemoryJobRepository>, Arc<Spawner>>,
}

impl Harness {
    /// Workers run `sh -c <script> worker <extra...> --dataruns <id>`.
    fn new(script: &str, extra: &[&str]) -> Self {
        let mut args = vec!["-c".to_string(), script.to_string(), "worker".to_string()];
        args.extend(extra.iter().map(|s| s.to_string()));
        let launcher = ProcessLauncher::new(WorkerCommand::new("sh").with_args(args));

        let store = InMemoryControlPlane::arc();
        let repo = InMemoryJobRepository::arc();
        let spawner = Arc::new(ThreadMonitorSpawner::new(Monitor::new(
            store.clone(),
            repo.clone(),
            launcher,
            Timings::fast(),
        )));
        let control = WorkerControl::new(store.clone(), repo.clone(), spawner.clone(), Timings::fast());

        Self {
            store,
            repo,
            spawner,
            control,
        }
    }

    fn registered_pid(&self, id: DatarunId) -> Option<u32> {
        match self.store.get(&registration_key(id)).unwrap().map(|v| Registration::parse(&v)) {
            Some(Registration::Worker(pid)) => Some(pid),
            _ => None,
        }
    }

    fn wait_registered(&self, id: DatarunId) -> u32 {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(pid) = self.registered_pid(id) {
                return pid;
            }
            assert!(Instant::now() < deadline, "worker for {id} never registered");
            thread::sleep(Duration::from_millis(2));
        }
    }

    /// What the worker computation does first: claim the run.
    fn mark_running(&self, id: DatarunId) {
        self.repo
            .update_job(id, &mut |record| record.status = JobStatus::Running)
            .unwrap();
    }

    fn single_outcome(&self) -> MonitorOutcome {
        let mut results = self.spawner.join_all();
        assert_eq!(results.len(), 1, "expected exactly one monitor");
        results.remove(0).1.unwrap()
    }
}

fn gate_path(name: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("runwarden-{name}-{}", std::process::id()));
    let _ = fs::remove_file(&path);
    path
}

fn pid_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

#[test]
fn worker_crash_requeues_running_datarun() {
    let gate = gate_path("crash");
    let h = Harness::new(
        "while [ ! -e \"$1\" ]; do sleep 0.01; done; exit 4",
        &[gate.to_str().unwrap()],
    );
    let id = DatarunId::new(42);
    h.repo.insert(JobRecord::pending(id));

    h.control.start_worker(id).unwrap();
    h.wait_registered(id);
    h.mark_running(id);
    fs::write(&gate, b"go").unwrap();

    match h.single_outcome() {
        MonitorOutcome::Exited {
            exit_code,
            requeued,
            ..
        } => {
            assert_eq!(exit_code, Some(4));
            assert!(requeued);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    assert!(h.store.is_empty());
    let record = h.repo.get_job(id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert!(record.end_time.is_some());
    let _ = fs::remove_file(&gate);
}

#[test]
fn completed_datarun_keeps_its_status() {
    let gate = gate_path("complete");
    let h = Harness::new(
        "while [ ! -e \"$1\" ]; do sleep 0.01; done; exit 0",
        &[gate.to_str().unwrap()],
    );
    let id = DatarunId::new(43);
    h.repo.insert(JobRecord::pending(id));

    h.control.start_worker(id).unwrap();
    h.wait_registered(id);
    h.repo
        .update_job(id, &mut |record| record.status = JobStatus::Complete)
        .unwrap();
    fs::write(&gate, b"go").unwrap();

    let outcome = h.single_outcome();
    assert!(!outcome.requeued());
    assert_eq!(h.repo.get_job(id).unwrap().unwrap().status, JobStatus::Complete);
    assert!(h.store.is_empty());
    let _ = fs::remove_file(&gate);
}

#[test]
fn stop_worker_blocks_until_teardown() {
    let h = Harness::new("exec sleep 30", &[]);
    let id = DatarunId::new(7);
    h.repo.insert(JobRecord::pending(id));

    h.control.start_worker(id).unwrap();
    let pid = h.wait_registered(id);
    h.mark_running(id);
    assert!(pid_alive(pid));

    assert!(h.control.stop_worker(id).unwrap());

    // On return: entry gone, worker reaped, datarun requeued.
    assert!(!h.store.has(&registration_key(id)).unwrap());
    assert!(!pid_alive(pid));
    assert_eq!(h.repo.get_job(id).unwrap().unwrap().status, JobStatus::Pending);

    match h.single_outcome() {
        MonitorOutcome::Terminated {
            pid: terminated,
            exit_code,
            requeued,
            ..
        } => {
            assert_eq!(terminated, pid);
            assert_eq!(exit_code, Some(-15));
            assert!(requeued);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[test]
fn stop_retries_until_worker_dies() {
    // First TERM only clears the trap; the second one is fatal.
    let ready = gate_path("trap-ready");
    let h = Harness::new(
        "trap 'trap - TERM' TERM; : > \"$1\"; while :; do sleep 0.05; done",
        &[ready.to_str().unwrap()],
    );
    let id = DatarunId::new(8);
    h.repo.insert(JobRecord::pending(id));

    h.control.start_worker(id).unwrap();
    let pid = h.wait_registered(id);
    let deadline = Instant::now() + Duration::from_secs(5);
    while !ready.exists() {
        assert!(Instant::now() < deadline, "worker never installed its trap");
        thread::sleep(Duration::from_millis(2));
    }

    assert!(h.control.stop_worker(id).unwrap());
    assert!(!pid_alive(pid));

    match h.single_outcome() {
        MonitorOutcome::Terminated { signals_sent, .. } => assert!(signals_sent >= 2),
        other => panic!("unexpected outcome: {other:?}"),
    }
    // Never ran, so nothing to requeue.
    assert_eq!(h.repo.get_job(id).unwrap().unwrap().status, JobStatus::Pending);
    let _ = fs::remove_file(&ready);
}

#[test]
fn start_is_ignored_for_running_datarun() {
    let h = Harness::new("exit 0", &[]);
    let id = DatarunId::new(9);
    h.repo
        .insert(JobRecord::pending(id).with_status(JobStatus::Running));

    h.control.start_worker(id).unwrap();

    assert!(h.spawner.join_all().is_empty());
    assert!(h.store.is_empty());
    assert_eq!(h.repo.get_job(id).unwrap().unwrap().status, JobStatus::Running);
}

#[test]
fn unknown_datarun_is_not_found() {
    let h = Harness::new("exit 0", &[]);
    let id = DatarunId::new(999);

    let err = h.control.start_worker(id).unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(_)));
    assert_eq!(err.http_status(), 404);

    let err = h.control.stop_worker(id).unwrap_err();
    assert!(matches!(err, SupervisorError::NotFound(_)));
}

#[test]
fn stop_without_monitor_requeues_orphaned_run() {
    let h = Harness::new("exit 0", &[]);
    let id = DatarunId::new(13);
    h.repo
        .insert(JobRecord::pending(id).with_status(JobStatus::Running));

    assert!(!h.control.stop_worker(id).unwrap());

    let record = h.repo.get_job(id).unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Pending);
    assert!(record.end_time.is_some());
    assert!(h.store.is_empty());
}
