//! Control-plane store: the process-shared key/value space monitors and
//! callers coordinate through.
//!
//! The store is used purely as a cross-process mutex and signal channel. It
//! carries no durable state; every value written here must be visible to other
//! processes on the next read (no client-side caching).
//!
//! Besides plain `get`/`set`/`has`/`delete`, implementations provide three
//! atomic primitives so that callers never need a read-then-write window:
//!
//! - `set_if_absent` (claim a key that nobody owns)
//! - `replace` (overwrite a key only while it still exists)
//! - `compare_and_swap` (overwrite a key only while it holds a known value)

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;

pub use in_memory::InMemoryControlPlane;
#[cfg(feature = "redis")]
pub use self::redis::RedisControlPlane;

/// Control-plane store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("control-plane connection error: {0}")]
    Connection(String),
    #[error("control-plane command error: {0}")]
    Command(String),
    #[error("control-plane state poisoned")]
    Poisoned,
}

/// Cross-process key/value store abstraction.
pub trait ControlPlaneStore: Send + Sync {
    /// Read the current value of `key`.
    fn get(&self, key: &str) -> Result<Option<String>, ControlPlaneError>;

    /// Unconditionally write `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<(), ControlPlaneError>;

    /// Check whether `key` currently exists.
    fn has(&self, key: &str) -> Result<bool, ControlPlaneError>;

    /// Remove `key`. Returns whether a value was removed.
    fn delete(&self, key: &str) -> Result<bool, ControlPlaneError>;

    /// Write `value` only if `key` does not exist. Returns whether it was written.
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError>;

    /// Overwrite `key` only if it exists. Returns whether it was written.
    fn replace(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError>;

    /// Overwrite `key` with `value` only if it currently holds `expected`.
    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError>;
}

impl<T: ControlPlaneStore + ?Sized> ControlPlaneStore for Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, ControlPlaneError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlPlaneError> {
        (**self).set(key, value)
    }

    fn has(&self, key: &str) -> Result<bool, ControlPlaneError> {
        (**self).has(key)
    }

    fn delete(&self, key: &str) -> Result<bool, ControlPlaneError> {
        (**self).delete(key)
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        (**self).set_if_absent(key, value)
    }

    fn replace(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        (**self).replace(key, value)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError> {
        (**self).compare_and_swap(key, expected, value)
    }
}
