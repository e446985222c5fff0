use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use runwarden_core::DatarunId;
use runwarden_infra::{JobRepository, PostgresJobRepository, RedisControlPlane, SupervisorConfig};
use runwarden_supervisor::{
    Monitor, MonitorOutcome, ProcessLauncher, ProcessMonitorSpawner, SupervisorError, WorkerControl,
};

#[derive(Parser)]
#[command(name = "runwarden")]
#[command(about = "Supervise one worker process per datarun", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a monitor in the foreground until its worker is gone
    Monitor {
        /// Datarun id
        id: DatarunId,
    },
    /// Hand a pending datarun to a new detached monitor
    Start {
        /// Datarun id
        id: DatarunId,
    },
    /// Stop the datarun's worker and wait for teardown
    Stop {
        /// Datarun id
        id: DatarunId,
    },
    /// Print the datarun status and its registration entry as JSON
    Status {
        /// Datarun id
        id: DatarunId,
    },
}

fn main() -> ExitCode {
    runwarden_observability::init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "runwarden failed");
            eprintln!("error: {err:#}");
            let status = err
                .downcast_ref::<SupervisorError>()
                .map(SupervisorError::http_status);
            if status == Some(404) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(command: Command) -> anyhow::Result<ExitCode> {
    let config = SupervisorConfig::from_env().context("invalid configuration")?;
    let store = connect_control_plane(&config)?;
    let repo = PostgresJobRepository::connect(config.require_database_url()?, config.jobs_table.clone())
        .context("cannot connect to the datarun database")?;

    match command {
        Command::Monitor { id } => {
            let launcher = ProcessLauncher::new(config.require_worker()?.clone());
            let monitor = Monitor::new(store, repo, launcher, config.timings);
            let outcome = monitor.run(id)?;
            tracing::info!(datarun_id = %id, pid = outcome.pid(), requeued = outcome.requeued(), "monitor finished");
            if let MonitorOutcome::Terminated { signals_sent, .. } = outcome {
                tracing::debug!(datarun_id = %id, signals_sent, "worker terminated on request");
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Start { id } => {
            let spawner = monitor_spawner(&config)?;
            let control = WorkerControl::new(store, repo, spawner, config.timings);
            control.start_worker(id)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Stop { id } => {
            let spawner = monitor_spawner(&config)?;
            let control = WorkerControl::new(store, repo, spawner, config.timings);
            let stopped = control.stop_worker(id)?;
            println!("{}", serde_json::json!({ "datarun_id": id, "stopped": stopped }));
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { id } => {
            let record = repo.get_job(id)?.ok_or(SupervisorError::NotFound(id))?;
            let spawner = monitor_spawner(&config)?;
            let control = WorkerControl::new(store, repo, spawner, config.timings);
            let registration = control.registration(id)?.map(|r| r.to_string());
            println!(
                "{}",
                serde_json::json!({
                    "datarun_id": id,
                    "status": record.status,
                    "end_time": record.end_time,
                    "registration": registration,
                })
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn connect_control_plane(config: &SupervisorConfig) -> anyhow::Result<RedisControlPlane> {
    let store = RedisControlPlane::new(config.require_redis_url()?).context("invalid Redis URL")?;
    Ok(match &config.redis_namespace {
        Some(namespace) => store.with_namespace(namespace.clone()),
        None => store,
    })
}

/// Detached monitors log next to their workers when a log directory is set.
fn monitor_spawner(config: &SupervisorConfig) -> anyhow::Result<ProcessMonitorSpawner> {
    let spawner = ProcessMonitorSpawner::current_exe().context("cannot locate runwarden binary")?;
    Ok(match config.worker.as_ref().and_then(|w| w.log_dir.clone()) {
        Some(dir) => spawner.with_log_dir(dir),
        None => spawner,
    })
}
