//! `runwarden-core`: shared vocabulary for datarun supervision.
//!
//! This crate contains **pure domain** types (no infrastructure concerns):
//! identifiers, the persisted job status, and the job record shape the
//! supervisor reconciles.

pub mod error;
pub mod id;
pub mod record;

pub use error::{DomainError, DomainResult};
pub use id::DatarunId;
pub use record::{JobRecord, JobStatus};
