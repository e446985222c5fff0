//! Supervisor error model.

use thiserror::Error;

use runwarden_core::DatarunId;
use runwarden_infra::{ConfigError, ControlPlaneError, RepositoryError};

/// Errors surfaced by the control API and the monitor.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No datarun record exists for the id (client error).
    #[error("no datarun found with id {0}")]
    NotFound(DatarunId),

    /// A second monitor tried to register for a datarun that already has one.
    #[error("datarun {0} already has a registered worker; only one live worker per datarun is allowed")]
    ProtocolViolation(DatarunId),

    /// The worker launcher failed to start the computation.
    #[error("failed to spawn worker for datarun {job_id}: {source}")]
    Spawn {
        job_id: DatarunId,
        #[source]
        source: std::io::Error,
    },

    /// The detached monitor process could not be started.
    #[error("failed to spawn monitor for datarun {job_id}: {source}")]
    MonitorSpawn {
        job_id: DatarunId,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    ControlPlane(#[from] ControlPlaneError),

    #[error(transparent)]
    Repository(RepositoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<RepositoryError> for SupervisorError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(id) => SupervisorError::NotFound(id),
            other => SupervisorError::Repository(other),
        }
    }
}

impl SupervisorError {
    /// HTTP status an API layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            SupervisorError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repository_not_found_becomes_client_error() {
        let err: SupervisorError = RepositoryError::NotFound(DatarunId::new(999)).into();
        assert!(matches!(err, SupervisorError::NotFound(id) if id == DatarunId::new(999)));
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn protocol_violation_is_server_error() {
        let err = SupervisorError::ProtocolViolation(DatarunId::new(1));
        assert_eq!(err.http_status(), 500);
        assert!(err.to_string().contains("only one live worker"));
    }
}
