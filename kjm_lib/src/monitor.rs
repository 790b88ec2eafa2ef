use std::sync::Arc;

use async_trait::async_trait;
use kjm_data::{JobRecord, JobStatus};
use tracing::{error, info, instrument, warn};

use crate::{
    cluster::ClusterWorkloadClient,
    config::EngineConfig,
    error::EngineResult,
    projector::fetch_resource_info,
    scheduler::ReconcileLoop,
    store::JobRecordStore,
};

pub const DEFAULT_FAILURE_MESSAGE: &str = "job failed";
pub const ORPHANED_MESSAGE: &str =
    "backend resource not found - may have been deleted externally";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub completed: usize,
    pub failed: usize,
    pub orphaned: usize,
    pub in_progress: usize,
    /// Running records without a backend workload name
    pub skipped: usize,
    pub errors: usize,
}

enum MonitorOutcome {
    Completed,
    Failed,
    Orphaned,
    InProgress,
}

/// reconciles Running records against the backend
pub struct MonitorLoop {
    store: Arc<dyn JobRecordStore>,
    cluster: Arc<dyn ClusterWorkloadClient>,
    config: Arc<EngineConfig>,
}

impl MonitorLoop {
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

    #[instrument(name = "monitor_cycle", skip_all)]
    pub async fn run_cycle(&self) -> EngineResult<MonitorReport> {
        info!("monitor cycle started");
        let running = self.store.list_by_status(JobStatus::Running).await?;
        info!("monitoring {} running jobs", running.len());
        let mut report = MonitorReport::default();
        for record in running {
            let workload_name = match record.backend_workload_name.as_deref() {
                Some(name) if !name.is_empty() => name.to_string(),
                _ => {
                    warn!(job_id = %record.id, "job is running but has no backend workload name");
                    report.skipped += 1;
                    continue;
                }
            };
            match self.reconcile(&record, &workload_name).await {
                Ok(MonitorOutcome::Completed) => report.completed += 1,
                Ok(MonitorOutcome::Failed) => report.failed += 1,
                Ok(MonitorOutcome::Orphaned) => report.orphaned += 1,
                Ok(MonitorOutcome::InProgress) => report.in_progress += 1,
                Err(err) => {
                    error!(
                        job_id = %record.id,
                        job_name = %record.name,
                        error = %err,
                        "failed to check status of job"
                    );
                    report.errors += 1;
                }
            }
        }
        info!(
            completed = report.completed,
            failed = report.failed,
            orphaned = report.orphaned,
            in_progress = report.in_progress,
            skipped = report.skipped,
            errors = report.errors,
            "monitor cycle completed"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(job_id = %record.id, workload = workload_name))]
    async fn reconcile(
        &self,
        record: &JobRecord,
        workload_name: &str,
    ) -> EngineResult<MonitorOutcome> {
        let snapshot =
            fetch_resource_info(self.cluster.as_ref(), workload_name, &self.config.namespace)
                .await?;
        let (workload, info) = match snapshot {
            Some(snapshot) => snapshot,
            None => {
                self.store
                    .update_status(
                        record.id,
                        JobStatus::Orphaned,
                        Some(ORPHANED_MESSAGE.to_string()),
                    )
                    .await?;
                warn!("job is orphaned, backend workload not found");
                return Ok(MonitorOutcome::Orphaned);
            }
        };
        self.store.set_resource_info(record.id, info).await?;

        if workload.is_complete() {
            self.store
                .update_status(record.id, JobStatus::Completed, None)
                .await?;
            info!("job completed successfully");
            Ok(MonitorOutcome::Completed)
        } else if workload.is_failed() {
            let message = workload
                .last_condition_message()
                .unwrap_or(DEFAULT_FAILURE_MESSAGE)
                .to_string();
            warn!(error_message = %message, "job failed");
            self.store
                .update_status(record.id, JobStatus::Failed, Some(message))
                .await?;
            Ok(MonitorOutcome::Failed)
        } else {
            Ok(MonitorOutcome::InProgress)
        }
    }
}

#[async_trait]
impl ReconcileLoop for MonitorLoop {
    fn name(&self) -> &'static str {
        "monitor"
    }

    async fn cycle(&self) -> EngineResult<()> {
        self.run_cycle().await.map(|_| ())
    }
}
