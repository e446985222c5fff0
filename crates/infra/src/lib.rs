//! Infrastructure layer: control-plane store, job repository, configuration.

pub mod config;
pub mod control_plane;
pub mod jobs;

pub use config::{ConfigError, SupervisorConfig, Timings, WorkerCommand};
pub use control_plane::{ControlPlaneError, ControlPlaneStore, InMemoryControlPlane};
#[cfg(feature = "redis")]
pub use control_plane::RedisControlPlane;
pub use jobs::{InMemoryJobRepository, JobRepository, PostgresJobRepository, RepositoryError};
