use std::sync::Arc;

pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod kube_client;
pub mod launch;
pub mod memory_cluster;
pub mod monitor;
pub mod projector;
pub mod scheduler;
pub mod service;
pub mod store;

use cleanup::CleanupLoop;
use cluster::ClusterWorkloadClient;
use config::EngineConfig;
use launch::LaunchLoop;
use monitor::MonitorLoop;
use scheduler::ScheduledLoop;
use store::JobRecordStore;

/// the launch, monitor and cleanup loops with their configured intervals
pub fn build_loops(
    store: Arc<dyn JobRecordStore>,
    cluster: Arc<dyn ClusterWorkloadClient>,
    config: Arc<EngineConfig>,
) -> Vec<ScheduledLoop> {
    vec![
        ScheduledLoop::new(
            Arc::new(LaunchLoop::new(store.clone(), cluster.clone(), config.clone())),
            config.launch_interval(),
        ),
        ScheduledLoop::new(
            Arc::new(MonitorLoop::new(store, cluster.clone(), config.clone())),
            config.monitor_interval(),
        ),
        ScheduledLoop::new(
            Arc::new(CleanupLoop::new(cluster, config.clone())),
            config.cleanup_interval(),
        ),
    ]
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use kjm_data::{CreateJobRequest, JobStatus};
    use tokio::time::sleep;

    use super::build_loops;
    use crate::{
        config::EngineConfig,
        memory_cluster::InMemoryCluster,
        scheduler::{CycleOutcome, ReconciliationScheduler},
        service::JobService,
        store::{
            test::{setup, RUNTIME},
            MemoryJobStore,
        },
    };

    #[test]
    fn test_scheduled_engine_runs_job_to_completion() {
        setup();
        RUNTIME.block_on(async {
            let store = Arc::new(MemoryJobStore::new());
            let cluster = InMemoryCluster::new();
            let config = Arc::new(EngineConfig {
                launch_interval_secs: 3600,
                monitor_interval_secs: 3600,
                cleanup_interval_secs: 3600,
                ..EngineConfig::default()
            });
            let service = JobService::new(store.clone(), Arc::new(cluster.clone()), config.clone());
            let scheduler = ReconciliationScheduler::start(build_loops(
                store,
                Arc::new(cluster.clone()),
                config,
            ));
            assert_eq!(
                vec!["launch", "monitor", "cleanup"],
                scheduler.loops().iter().map(|l| l.name()).collect::<Vec<_>>()
            );
            // first ticks have nothing to do yet
            sleep(Duration::from_millis(50)).await;

            let created = service
                .create(CreateJobRequest::new("demo", "busybox", &["echo", "hi"]))
                .await
                .unwrap();
            assert_eq!(Some(CycleOutcome::Finished), scheduler.trigger("launch").await);
            let launched = service.get(created.id).await.unwrap();
            assert_eq!(JobStatus::Running, launched.status);

            let workload = launched.backend_workload_name.unwrap();
            cluster.set_counts(&workload, "default", None, Some(1), None).await;
            assert_eq!(Some(CycleOutcome::Finished), scheduler.trigger("monitor").await);
            assert_eq!(
                JobStatus::Completed,
                service.get(created.id).await.unwrap().status
            );

            scheduler.shutdown().await;
        });
    }
}
