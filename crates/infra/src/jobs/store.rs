//! Repository abstraction and the in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;

use runwarden_core::{DatarunId, DomainError, JobRecord};

/// Job repository error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RepositoryError {
    #[error("datarun not found: {0}")]
    NotFound(DatarunId),
    #[error("invalid record: {0}")]
    Decode(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Session-scoped access to datarun records.
pub trait JobRepository: Send + Sync {
    /// Fetch the current record, if it exists.
    fn get_job(&self, id: DatarunId) -> Result<Option<JobRecord>, RepositoryError>;

    /// Apply `mutator` to the record and commit it in one transaction.
    ///
    /// Returns the committed record, or `NotFound` when there is no such row.
    fn update_job(
        &self,
        id: DatarunId,
        mutator: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<JobRecord, RepositoryError>;

    /// Return a `Running` datarun to `Pending` and stamp its end time, in one
    /// session. Records in any other status are left as they are.
    ///
    /// Returns whether the record was reset.
    fn requeue_if_running(&self, id: DatarunId) -> Result<bool, RepositoryError> {
        let now = Utc::now();
        let mut reset = false;
        self.update_job(id, &mut |record| {
            if record.is_running() {
                record.mark_pending(now);
                reset = true;
            }
        })?;
        Ok(reset)
    }
}

impl<T: JobRepository + ?Sized> JobRepository for Arc<T> {
    fn get_job(&self, id: DatarunId) -> Result<Option<JobRecord>, RepositoryError> {
        (**self).get_job(id)
    }

    fn update_job(
        &self,
        id: DatarunId,
        mutator: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<JobRecord, RepositoryError> {
        (**self).update_job(id, mutator)
    }
}

/// In-memory repository for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    records: RwLock<HashMap<DatarunId, JobRecord>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Insert or overwrite a record (plays the role of the worker computation
    /// and of whoever creates dataruns).
    pub fn insert(&self, record: JobRecord) {
        let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
        records.insert(record.id, record);
    }
}

impl JobRepository for InMemoryJobRepository {
    fn get_job(&self, id: DatarunId) -> Result<Option<JobRecord>, RepositoryError> {
        let records = self
            .records
            .read()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;
        Ok(records.get(&id).cloned())
    }

    fn update_job(
        &self,
        id: DatarunId,
        mutator: &mut dyn FnMut(&mut JobRecord),
    ) -> Result<JobRecord, RepositoryError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RepositoryError::Storage("lock poisoned".to_string()))?;

        // Mutate a copy and write it back, so a panicking mutator leaves the
        // stored record untouched.
        let mut record = records.get(&id).cloned().ok_or(RepositoryError::NotFound(id))?;
        mutator(&mut record);
        record.id = id;
        records.insert(id, record.clone());
        Ok(record)
    }
}
