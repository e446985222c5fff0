//! Registration entries: the control-plane record proving a monitor owns a
//! datarun's worker.
//!
//! Key: `worker:<datarun id>`. Value: the worker pid, the stop sentinel
//! `stop`, or a `claim:<uuid>` token held between claiming the slot and
//! spawning the worker.
//!
//! Write/delete rights are asymmetric: monitors claim, publish and release;
//! callers may only overwrite an existing entry with the stop sentinel.

use core::fmt;

use uuid::Uuid;

use runwarden_core::DatarunId;
use runwarden_infra::{ControlPlaneError, ControlPlaneStore};

use crate::error::SupervisorError;

/// Value written by `stop_worker` to ask the monitor to tear down.
pub const STOP_SENTINEL: &str = "stop";

const CLAIM_PREFIX: &str = "claim:";

/// Control-plane key for a datarun.
pub fn registration_key(job_id: DatarunId) -> String {
    format!("worker:{job_id}")
}

/// Token identifying one monitor's claim on a datarun.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToken(String);

impl ClaimToken {
    fn new() -> Self {
        Self(format!("{CLAIM_PREFIX}{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Decoded registration value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// Slot claimed, worker not yet published
    Claimed(ClaimToken),
    /// Worker running under this pid
    Worker(u32),
    /// Stop requested
    Stop,
    /// Anything else (written by a foreign actor)
    Other(String),
}

impl Registration {
    pub fn parse(raw: &str) -> Self {
        if raw == STOP_SENTINEL {
            Registration::Stop
        } else if raw.starts_with(CLAIM_PREFIX) {
            Registration::Claimed(ClaimToken(raw.to_string()))
        } else if let Ok(pid) = raw.parse::<u32>() {
            Registration::Worker(pid)
        } else {
            Registration::Other(raw.to_string())
        }
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Registration::Claimed(token) => f.write_str(token.as_str()),
            Registration::Worker(pid) => write!(f, "{pid}"),
            Registration::Stop => f.write_str(STOP_SENTINEL),
            Registration::Other(raw) => f.write_str(raw),
        }
    }
}

/// Registration operations on top of a control-plane store.
#[derive(Debug, Clone)]
pub struct Registry<S> {
    store: S,
}

impl<S: ControlPlaneStore> Registry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Atomically take the slot for `job_id`.
    ///
    /// Fails with `ProtocolViolation` when any entry already exists.
    pub fn claim(&self, job_id: DatarunId) -> Result<ClaimToken, SupervisorError> {
        let token = ClaimToken::new();
        if self
            .store
            .set_if_absent(&registration_key(job_id), token.as_str())?
        {
            Ok(token)
        } else {
            Err(SupervisorError::ProtocolViolation(job_id))
        }
    }

    /// Swap our claim for the worker pid.
    ///
    /// Returns `false` when the claim was overwritten in the meantime (stop
    /// requested while the worker was being spawned).
    pub fn publish_pid(
        &self,
        job_id: DatarunId,
        claim: &ClaimToken,
        pid: u32,
    ) -> Result<bool, ControlPlaneError> {
        self.store
            .compare_and_swap(&registration_key(job_id), claim.as_str(), &pid.to_string())
    }

    pub fn lookup(&self, job_id: DatarunId) -> Result<Option<Registration>, ControlPlaneError> {
        Ok(self
            .store
            .get(&registration_key(job_id))?
            .map(|raw| Registration::parse(&raw)))
    }

    /// Whether the entry still names `pid` (the monitor's keep-going check).
    pub fn is_owned_by(&self, job_id: DatarunId, pid: u32) -> Result<bool, ControlPlaneError> {
        Ok(matches!(self.lookup(job_id)?, Some(Registration::Worker(p)) if p == pid))
    }

    /// Overwrite an existing entry with the stop sentinel. Never creates one.
    pub fn signal_stop(&self, job_id: DatarunId) -> Result<bool, ControlPlaneError> {
        self.store.replace(&registration_key(job_id), STOP_SENTINEL)
    }

    pub fn is_registered(&self, job_id: DatarunId) -> Result<bool, ControlPlaneError> {
        self.store.has(&registration_key(job_id))
    }

    /// Remove the entry; only the owning monitor calls this.
    pub fn release(&self, job_id: DatarunId) -> Result<bool, ControlPlaneError> {
        self.store.delete(&registration_key(job_id))
    }
}
