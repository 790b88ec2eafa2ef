use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kjm_data::{JobId, JobRecord, JobStatus, WorkloadResourceInfo};
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::error::{EngineError, EngineResult};

/// keyed persistence for job records
///
/// every mutating operation fails with `RecordNotFound` for unknown ids and
/// applies its change atomically with respect to other writes of the same id
#[async_trait]
pub trait JobRecordStore: Send + Sync {
    async fn create(&self, record: JobRecord) -> EngineResult<JobRecord>;

    async fn get(&self, id: JobId) -> EngineResult<JobRecord>;

    /// all records, newest first
    async fn list_all(&self) -> EngineResult<Vec<JobRecord>>;

    /// records with the given status, oldest first
    async fn list_by_status(&self, status: JobStatus) -> EngineResult<Vec<JobRecord>>;

    /// moves the record along the state machine, stamping started/completed times
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> EngineResult<JobRecord>;

    /// records the backend workload name, only once and only while Queued
    async fn set_backend_name(&self, id: JobId, name: &str) -> EngineResult<JobRecord>;

    /// sets the backend workload name and moves a Queued record to Running in
    /// one write, a record that left Queued is returned as `InvalidTransition`
    /// and keeps no name
    async fn mark_launched(&self, id: JobId, name: &str) -> EngineResult<JobRecord>;

    async fn set_resource_info(
        &self,
        id: JobId,
        info: WorkloadResourceInfo,
    ) -> EngineResult<JobRecord>;

    /// records in `status` whose start time lies before `started_before`
    async fn list_stale(
        &self,
        status: JobStatus,
        started_before: DateTime<Utc>,
    ) -> EngineResult<Vec<JobRecord>>;
}

struct Entry {
    // insertion order, breaks ties between equal creation times
    seq: u64,
    record: JobRecord,
}

fn assign_backend_name(record: &mut JobRecord, name: String) -> EngineResult<()> {
    if record.status != JobStatus::Queued {
        return Err(EngineError::InvalidTransition {
            from: record.status,
            to: JobStatus::Running,
        });
    }
    if let Some(existing) = &record.backend_workload_name {
        return Err(EngineError::Validation(format!(
            "job record {} already has backend workload {}",
            record.id, existing
        )));
    }
    record.backend_workload_name = Some(name);
    Ok(())
}

/// in-memory record store guarded by a single async mutex
pub struct MemoryJobStore {
    next_seq: AtomicU64,
    records: Arc<Mutex<HashMap<JobId, Entry>>>,
}

impl MemoryJobStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            next_seq: AtomicU64::new(0),
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn modify<F>(&self, id: JobId, change: F) -> EngineResult<JobRecord>
    where
        F: FnOnce(&mut JobRecord) -> EngineResult<()> + Send,
    {
        let mut records = self.records.lock().await;
        let entry = records
            .get_mut(&id)
            .ok_or(EngineError::RecordNotFound(id))?;
        // apply to a copy so a rejected change leaves the stored record untouched
        let mut record = entry.record.clone();
        change(&mut record)?;
        entry.record = record.clone();
        Ok(record)
    }

    async fn sorted(&self, filter: impl Fn(&JobRecord) -> bool) -> Vec<JobRecord> {
        let records = self.records.lock().await;
        let mut entries: Vec<&Entry> = records.values().filter(|e| filter(&e.record)).collect();
        entries.sort_by_key(|e| (e.record.created_at, e.seq));
        entries.into_iter().map(|e| e.record.clone()).collect()
    }
}

#[async_trait]
impl JobRecordStore for MemoryJobStore {
    #[instrument(skip_all, fields(job_id = %record.id))]
    async fn create(&self, record: JobRecord) -> EngineResult<JobRecord> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.id) {
            return Err(EngineError::Validation(format!(
                "job record {} already exists",
                record.id
            )));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        records.insert(
            record.id,
            Entry {
                seq,
                record: record.clone(),
            },
        );
        info!("stored job record");
        Ok(record)
    }

    async fn get(&self, id: JobId) -> EngineResult<JobRecord> {
        let records = self.records.lock().await;
        records
            .get(&id)
            .map(|e| e.record.clone())
            .ok_or(EngineError::RecordNotFound(id))
    }

    async fn list_all(&self) -> EngineResult<Vec<JobRecord>> {
        let mut records = self.sorted(|_| true).await;
        records.reverse();
        Ok(records)
    }

    async fn list_by_status(&self, status: JobStatus) -> EngineResult<Vec<JobRecord>> {
        Ok(self.sorted(|r| r.status == status).await)
    }

    #[instrument(skip(self, error_message))]
    async fn update_status(
        &self,
        id: JobId,
        status: JobStatus,
        error_message: Option<String>,
    ) -> EngineResult<JobRecord> {
        let record = self
            .modify(id, move |record| {
                if !record.status.can_transition_to(status) {
                    return Err(EngineError::InvalidTransition {
                        from: record.status,
                        to: status,
                    });
                }
                let now = Utc::now();
                record.status = status;
                if status == JobStatus::Running {
                    record.started_at = Some(now);
                }
                if status.is_terminal() {
                    record.completed_at = Some(now);
                }
                if error_message.is_some() {
                    record.error_message = error_message;
                }
                Ok(())
            })
            .await?;
        info!("status updated");
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn set_backend_name(&self, id: JobId, name: &str) -> EngineResult<JobRecord> {
        let name = name.to_string();
        self.modify(id, move |record| assign_backend_name(record, name))
            .await
    }

    #[instrument(skip(self))]
    async fn mark_launched(&self, id: JobId, name: &str) -> EngineResult<JobRecord> {
        let name = name.to_string();
        let record = self
            .modify(id, move |record| {
                assign_backend_name(record, name)?;
                record.status = JobStatus::Running;
                record.started_at = Some(Utc::now());
                Ok(())
            })
            .await?;
        info!("status updated");
        Ok(record)
    }

    async fn set_resource_info(
        &self,
        id: JobId,
        info: WorkloadResourceInfo,
    ) -> EngineResult<JobRecord> {
        self.modify(id, move |record| {
            record.resource_info = Some(info);
            Ok(())
        })
        .await
    }

    async fn list_stale(
        &self,
        status: JobStatus,
        started_before: DateTime<Utc>,
    ) -> EngineResult<Vec<JobRecord>> {
        Ok(self
            .sorted(|r| {
                r.status == status && r.started_at.map_or(false, |at| at < started_before)
            })
            .await)
    }
}
