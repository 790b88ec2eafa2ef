use std::sync::Arc;

use kjm_data::{
    CreateJobRequest, ExecutionUnitInfo, JobId, JobRecord, JobStatus, WorkloadResourceInfo,
};
use tracing::{info, instrument, warn};

use crate::{
    cluster::{delete_workload_and_config, ClusterWorkloadClient, DeleteOutcome},
    config::EngineConfig,
    error::{EngineError, EngineResult},
    projector::{fetch_resource_info, project},
    store::JobRecordStore,
};

/// operations exposed to the HTTP layer
#[derive(Clone)]
pub struct JobService {
    store: Arc<dyn JobRecordStore>,
    cluster: Arc<dyn ClusterWorkloadClient>,
    config: Arc<EngineConfig>,
}

fn validate(request: &CreateJobRequest) -> EngineResult<()> {
    if request.name.trim().is_empty() {
        return Err(EngineError::Validation("name must not be empty".into()));
    }
    if request.container_image.trim().is_empty() {
        return Err(EngineError::Validation(
            "containerImage must not be empty".into(),
        ));
    }
    if let Some(key) = request
        .labels
        .keys()
        .chain(request.configuration.keys())
        .find(|key| key.trim().is_empty())
    {
        return Err(EngineError::Validation(format!(
            "invalid empty key {:?} in labels or configuration",
            key
        )));
    }
    Ok(())
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobRecordStore>,
        cluster: Arc<dyn ClusterWorkloadClient>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            cluster,
            config,
        }
    }

    #[instrument(skip_all, fields(job_name = %request.name))]
    pub async fn create(&self, request: CreateJobRequest) -> EngineResult<JobRecord> {
        validate(&request)?;
        let record = self.store.create(JobRecord::new(request)).await?;
        info!(job_id = %record.id, "job queued");
        Ok(record)
    }

    pub async fn get(&self, id: JobId) -> EngineResult<JobRecord> {
        self.store.get(id).await
    }

    /// all records newest first, or the records of one status oldest first
    pub async fn list(&self, status: Option<JobStatus>) -> EngineResult<Vec<JobRecord>> {
        match status {
            Some(status) => self.store.list_by_status(status).await,
            None => self.store.list_all().await,
        }
    }

    /// only Queued records can be cancelled, a running workload is never stopped
    #[instrument(skip(self))]
    pub async fn cancel(&self, id: JobId) -> EngineResult<JobRecord> {
        let record = self
            .store
            .update_status(id, JobStatus::Cancelled, None)
            .await?;
        info!("job cancelled");
        Ok(record)
    }

    /// fetches the backend state of the record's workload and stores it
    #[instrument(skip(self))]
    pub async fn refresh(&self, id: JobId) -> EngineResult<JobRecord> {
        let record = self.store.get(id).await?;
        let workload_name = match record.backend_workload_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => return Err(EngineError::NoBackendWorkload(id)),
        };
        match fetch_resource_info(self.cluster.as_ref(), &workload_name, &self.config.namespace)
            .await?
        {
            Some((_, info)) => self.store.set_resource_info(id, info).await,
            None => {
                warn!(workload = %workload_name, "backend workload not found, nothing to refresh");
                Ok(record)
            }
        }
    }

    /// managed workloads in the engine namespace, without execution units
    pub async fn list_workloads(&self) -> EngineResult<Vec<WorkloadResourceInfo>> {
        let workloads = self
            .cluster
            .list_workloads(&self.config.namespace, &self.config.management_selector())
            .await?;
        Ok(workloads.iter().map(|w| project(w, Vec::new())).collect())
    }

    pub async fn workload_info(&self, name: &str) -> EngineResult<WorkloadResourceInfo> {
        fetch_resource_info(self.cluster.as_ref(), name, &self.config.namespace)
            .await?
            .map(|(_, info)| info)
            .ok_or_else(|| EngineError::WorkloadNotFound(name.to_string()))
    }

    pub async fn execution_units(&self, workload_name: &str) -> EngineResult<Vec<ExecutionUnitInfo>> {
        Ok(self
            .cluster
            .get_execution_units_for(workload_name, &self.config.namespace)
            .await?)
    }

    /// execution units of all managed workloads
    pub async fn list_execution_units(&self) -> EngineResult<Vec<ExecutionUnitInfo>> {
        Ok(self
            .cluster
            .list_execution_units(&self.config.namespace, &self.config.management_selector())
            .await?)
    }

    pub async fn execution_unit(&self, unit_name: &str) -> EngineResult<ExecutionUnitInfo> {
        self.cluster
            .get_execution_unit(unit_name, &self.config.namespace)
            .await?
            .ok_or_else(|| EngineError::WorkloadNotFound(unit_name.to_string()))
    }

    pub async fn unit_logs(&self, unit_name: &str, container: Option<&str>) -> EngineResult<String> {
        Ok(self
            .cluster
            .get_logs(unit_name, &self.config.namespace, container)
            .await?)
    }

    /// idempotent, also removes the workload's config object
    #[instrument(skip(self))]
    pub async fn delete_workload(&self, name: &str) -> EngineResult<DeleteOutcome> {
        Ok(delete_workload_and_config(self.cluster.as_ref(), name, &self.config.namespace).await?)
    }
}
