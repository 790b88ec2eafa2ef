use std::sync::Arc;

use async_trait::async_trait;
use kjm_data::{JobRecord, JobStatus};
use tracing::{error, info, instrument, warn};

use crate::{
    cluster::{
        config_name_for, delete_workload_and_config, workload_name_for, ClusterWorkloadClient,
        WorkloadSpec,
    },
    config::EngineConfig,
    error::{EngineError, EngineResult},
    scheduler::ReconcileLoop,
    store::JobRecordStore,
};

/// workload and config object for a record; reserved labels win over user labels
pub fn build_workload_spec(record: &JobRecord, config: &EngineConfig) -> WorkloadSpec {
    let mut config_labels = record.labels.clone();
    config_labels.insert(
        config.management_label_key.clone(),
        config.management_label_value.clone(),
    );
    let mut labels = config_labels.clone();
    labels.insert(config.record_id_label_key.clone(), record.id.to_string());
    WorkloadSpec {
        name: workload_name_for(record.id),
        namespace: config.namespace.clone(),
        image: record.container_image.clone(),
        container_name: config.container_name.clone(),
        command: record.command.clone(),
        args: record.args.clone(),
        labels,
        config_name: config_name_for(record.id),
        config_data: record.configuration.clone(),
        config_labels,
        config_mount_path: config.config_mount_path.clone(),
        backoff_limit: config.backoff_limit,
        ttl_seconds_after_finished: config.ttl_seconds_after_finished,
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaunchReport {
    pub launched: usize,
    pub failed: usize,
    /// records that left Queued while their workload was being created
    pub skipped: usize,
}

enum LaunchOutcome {
    Launched,
    Failed,
    Skipped,
}

/// promotes Queued records into running backend workloads
pub struct LaunchLoop {
    store: Arc<dyn JobRecordStore>,
    cluster: Arc<dyn ClusterWorkloadClient>,
    config: Arc<EngineConfig>,
}

impl LaunchLoop {
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

    #[instrument(name = "launch_cycle", skip_all)]
    pub async fn run_cycle(&self) -> EngineResult<LaunchReport> {
        info!("launch cycle started");
        let queued = self.store.list_by_status(JobStatus::Queued).await?;
        info!("found {} queued jobs", queued.len());
        let mut report = LaunchReport::default();
        for record in queued {
            match self.launch(&record).await {
                LaunchOutcome::Launched => report.launched += 1,
                LaunchOutcome::Failed => report.failed += 1,
                LaunchOutcome::Skipped => report.skipped += 1,
            }
        }
        info!(
            launched = report.launched,
            failed = report.failed,
            skipped = report.skipped,
            "launch cycle completed"
        );
        Ok(report)
    }

    #[instrument(skip_all, fields(job_id = %record.id, job_name = %record.name))]
    async fn launch(&self, record: &JobRecord) -> LaunchOutcome {
        let spec = build_workload_spec(record, &self.config);
        info!(workload = %spec.name, "launching job");
        let workload = match self.cluster.create_workload(&spec).await {
            Ok(workload) => workload,
            Err(err) => {
                error!(error = %err, "failed to launch job");
                let message = err.to_string();
                if let Err(store_err) = self
                    .store
                    .update_status(record.id, JobStatus::Failed, Some(message))
                    .await
                {
                    error!(error = %store_err, "could not mark job as failed");
                }
                return LaunchOutcome::Failed;
            }
        };

        match self.commit(record, &workload.name).await {
            Ok(()) => {
                info!(workload = %workload.name, "launched job");
                LaunchOutcome::Launched
            }
            Err(err @ (EngineError::InvalidTransition { .. } | EngineError::RecordNotFound(_))) => {
                warn!(error = %err, "job left the queue during launch, removing its workload");
                if let Err(delete_err) = delete_workload_and_config(
                    self.cluster.as_ref(),
                    &workload.name,
                    &self.config.namespace,
                )
                .await
                {
                    error!(error = %delete_err, "could not remove workload of dequeued job");
                }
                LaunchOutcome::Skipped
            }
            Err(err) => {
                // workload exists but the record does not know it; a later cycle
                // may create a duplicate
                error!(workload = %workload.name, error = %err, "could not record launched workload");
                LaunchOutcome::Failed
            }
        }
    }

    async fn commit(&self, record: &JobRecord, workload_name: &str) -> EngineResult<()> {
        self.store.mark_launched(record.id, workload_name).await?;
        Ok(())
    }
}

#[async_trait]
impl ReconcileLoop for LaunchLoop {
    fn name(&self) -> &'static str {
        "launch"
    }

    async fn cycle(&self) -> EngineResult<()> {
        self.run_cycle().await.map(|_| ())
    }
}
