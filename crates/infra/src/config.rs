//! Configuration loading and representation.
//!
//! All settings come from the environment; every timing has a default that
//! matches the supervision protocol's reference intervals.

use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::postgres::DEFAULT_TABLE;

pub const REDIS_URL_ENV: &str = "RUNWARDEN_REDIS_URL";
pub const REDIS_NAMESPACE_ENV: &str = "RUNWARDEN_REDIS_NAMESPACE";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";
pub const JOBS_TABLE_ENV: &str = "RUNWARDEN_JOBS_TABLE";
pub const WORKER_PROGRAM_ENV: &str = "RUNWARDEN_WORKER_PROGRAM";
pub const WORKER_ARGS_ENV: &str = "RUNWARDEN_WORKER_ARGS";
pub const WORKER_LOG_DIR_ENV: &str = "RUNWARDEN_WORKER_LOG_DIR";
pub const POLL_INTERVAL_ENV: &str = "RUNWARDEN_POLL_INTERVAL_MS";
pub const TERMINATE_SHORT_ENV: &str = "RUNWARDEN_TERMINATE_SHORT_MS";
pub const TERMINATE_LONG_ENV: &str = "RUNWARDEN_TERMINATE_LONG_MS";
pub const STOP_POLL_ENV: &str = "RUNWARDEN_STOP_POLL_MS";
pub const START_GRACE_ENV: &str = "RUNWARDEN_START_GRACE_MS";

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("{var} must be a whole number of milliseconds, got {value:?}")]
    InvalidDuration { var: &'static str, value: String },
}

/// Intervals driving the monitor and control API loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Sleep between monitor liveness/registration checks
    pub poll_interval: Duration,
    /// Wait after a terminate signal before the first recheck
    pub terminate_short_wait: Duration,
    /// Wait before re-sending a terminate signal that did not take
    pub terminate_long_wait: Duration,
    /// Interval at which `stop_worker` checks for deregistration
    pub stop_poll_interval: Duration,
    /// How long `start_worker` waits after spawning the monitor
    pub start_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            terminate_short_wait: Duration::from_millis(10),
            terminate_long_wait: Duration::from_secs(1),
            stop_poll_interval: Duration::from_secs(1),
            start_grace: Duration::from_millis(100),
        }
    }
}

impl Timings {
    /// Short intervals for tests and in-process embedding.
    pub fn fast() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            terminate_short_wait: Duration::from_millis(2),
            terminate_long_wait: Duration::from_millis(20),
            stop_poll_interval: Duration::from_millis(5),
            start_grace: Duration::from_millis(10),
        }
    }
}

/// How to launch the worker computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// When set, worker stdout/stderr are appended to `worker-<id>.log` here
    pub log_dir: Option<PathBuf>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            log_dir: None,
        }
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
}

/// Full supervisor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    pub redis_url: Option<String>,
    pub redis_namespace: Option<String>,
    pub database_url: Option<String>,
    pub jobs_table: String,
    pub worker: Option<WorkerCommand>,
    pub timings: Timings,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            redis_namespace: None,
            database_url: None,
            jobs_table: DEFAULT_TABLE.to_string(),
            worker: None,
            timings: Timings::default(),
        }
    }
}

impl SupervisorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (tests inject a map here).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Timings::default();

        let millis = |var: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match non_empty(var) {
                None => Ok(default),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|_| ConfigError::InvalidDuration { var, value: raw }),
            }
        };

        let timings = Timings {
            poll_interval: millis(POLL_INTERVAL_ENV, defaults.poll_interval)?,
            terminate_short_wait: millis(TERMINATE_SHORT_ENV, defaults.terminate_short_wait)?,
            terminate_long_wait: millis(TERMINATE_LONG_ENV, defaults.terminate_long_wait)?,
            stop_poll_interval: millis(STOP_POLL_ENV, defaults.stop_poll_interval)?,
            start_grace: millis(START_GRACE_ENV, defaults.start_grace)?,
        };

        let worker = non_empty(WORKER_PROGRAM_ENV).map(|program| {
            let mut command = WorkerCommand::new(program.trim());
            if let Some(args) = non_empty(WORKER_ARGS_ENV) {
                command = command.with_args(args.split_whitespace());
            }
            if let Some(dir) = non_empty(WORKER_LOG_DIR_ENV) {
                command = command.with_log_dir(dir.trim());
            }
            command
        });

        Ok(Self {
            redis_url: non_empty(REDIS_URL_ENV),
            redis_namespace: non_empty(REDIS_NAMESPACE_ENV),
            database_url: non_empty(DATABASE_URL_ENV),
            jobs_table: non_empty(JOBS_TABLE_ENV).unwrap_or_else(|| DEFAULT_TABLE.to_string()),
            worker,
            timings,
        })
    }

    pub fn require_redis_url(&self) -> Result<&str, ConfigError> {
        self.redis_url.as_deref().ok_or(ConfigError::Missing(REDIS_URL_ENV))
    }

    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing(DATABASE_URL_ENV))
    }

    pub fn require_worker(&self) -> Result<&WorkerCommand, ConfigError> {
        self.worker.as_ref().ok_or(ConfigError::Missing(WORKER_PROGRAM_ENV))
    }
}
