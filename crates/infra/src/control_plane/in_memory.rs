//! In-memory control-plane store for tests/dev.
//!
//! Only visible inside one process, so it is suitable for embedding monitors
//! as threads (tests, single-binary deployments) but not for detached monitor
//! processes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{ControlPlaneError, ControlPlaneStore};

/// Mutex-guarded map; every primitive runs under one lock acquisition.
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_entries<R>(
        &self,
        f: impl FnOnce(&mut HashMap<String, String>) -> R,
    ) -> Result<R, ControlPlaneError> {
        let mut entries = self.entries.lock().map_err(|_| ControlPlaneError::Poisoned)?;
        Ok(f(&mut entries))
    }
}

impl ControlPlaneStore for InMemoryControlPlane {
    fn get(&self, key: &str) -> Result<Option<String>, ControlPlaneError> {
        self.with_entries(|e| e.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ControlPlaneError> {
        self.with_entries(|e| {
            e.insert(key.to_string(), value.to_string());
        })
    }

    fn has(&self, key: &str) -> Result<bool, ControlPlaneError> {
        self.with_entries(|e| e.contains_key(key))
    }

    fn delete(&self, key: &str) -> Result<bool, ControlPlaneError> {
        self.with_entries(|e| e.remove(key).is_some())
    }

    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        self.with_entries(|e| {
            if e.contains_key(key) {
                return false;
            }
            e.insert(key.to_string(), value.to_string());
            true
        })
    }

    fn replace(&self, key: &str, value: &str) -> Result<bool, ControlPlaneError> {
        self.with_entries(|e| match e.get_mut(key) {
            Some(current) => {
                *current = value.to_string();
                true
            }
            None => false,
        })
    }

    fn compare_and_swap(
        &self,
        key: &str,
        expected: &str,
        value: &str,
    ) -> Result<bool, ControlPlaneError> {
        self.with_entries(|e| match e.get_mut(key) {
            Some(current) if current == expected => {
                *current = value.to_string();
                true
            }
            _ => false,
        })
    }
}
