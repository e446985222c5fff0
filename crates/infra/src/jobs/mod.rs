//! Job repository: read and reconcile persisted datarun records.
//!
//! The supervisor only ever needs two things from the persistence layer:
//!
//! - `get_job`: a fresh read of a datarun's status
//! - `update_job`: a read-modify-write of one record inside a committed
//!   transaction (session scope)
//!
//! Everything else about the schema belongs to the system that owns the
//! dataruns table.

pub mod postgres;
pub mod store;

pub use postgres::PostgresJobRepository;
pub use store::{InMemoryJobRepository, JobRepository, RepositoryError};
