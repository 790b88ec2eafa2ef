use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, instrument};

use crate::{
    cluster::{delete_workload_and_config, ClusterWorkloadClient, DeleteOutcome, Workload},
    config::EngineConfig,
    error::EngineResult,
    scheduler::ReconcileLoop,
};

/// a limit reaching past the earliest representable time selects nothing
fn created_before(workload: &Workload, now: DateTime<Utc>, age: Duration) -> bool {
    match (workload.created_at, now.checked_sub_signed(age)) {
        (Some(at), Some(limit)) => at < limit,
        _ => false,
    }
}

/// terminal and created before `now - threshold`
pub fn is_stale(workload: &Workload, now: DateTime<Utc>, threshold: Duration) -> bool {
    workload.is_terminal() && created_before(workload, now, threshold)
}

/// never progressed and created before `now - cutoff`
pub fn is_stuck(workload: &Workload, now: DateTime<Utc>, cutoff: Duration) -> bool {
    !workload.has_progress() && created_before(workload, now, cutoff)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub stale_deleted: usize,
    pub orphans_deleted: usize,
    pub errors: usize,
}

#[derive(Clone, Copy, Debug)]
enum Sweep {
    Stale,
    Orphaned,
}

/// deletes stale terminal and stuck backend workloads owned by the engine
pub struct CleanupLoop {
    cluster: Arc<dyn ClusterWorkloadClient>,
    config: Arc<EngineConfig>,
}

impl CleanupLoop {
    pub fn new(cluster: Arc<dyn ClusterWorkloadClient>, config: Arc<EngineConfig>) -> Self {
        Self { cluster, config }
    }

    #[instrument(name = "cleanup_cycle", skip_all)]
    pub async fn run_cycle(&self) -> EngineResult<CleanupReport> {
        info!("cleanup cycle started");
        let mut report = CleanupReport::default();
        let now = Utc::now();

        let threshold = self.config.stale_threshold();
        match self
            .sweep(Sweep::Stale, |w| is_stale(w, now, threshold), &mut report)
            .await
        {
            Ok(deleted) => report.stale_deleted = deleted,
            Err(err) => {
                error!(error = %err, "stale workload sweep failed");
                report.errors += 1;
            }
        }

        let cutoff = self.config.orphan_cutoff();
        match self
            .sweep(Sweep::Orphaned, |w| is_stuck(w, now, cutoff), &mut report)
            .await
        {
            Ok(deleted) => report.orphans_deleted = deleted,
            Err(err) => {
                error!(error = %err, "orphaned workload sweep failed");
                report.errors += 1;
            }
        }

        info!(
            stale_deleted = report.stale_deleted,
            orphans_deleted = report.orphans_deleted,
            errors = report.errors,
            "cleanup cycle completed"
        );
        Ok(report)
    }

    /// lists managed workloads, deletes the selected ones, returns how many are gone
    async fn sweep(
        &self,
        sweep: Sweep,
        select: impl Fn(&Workload) -> bool,
        report: &mut CleanupReport,
    ) -> EngineResult<usize> {
        let namespace = &self.config.namespace;
        let workloads = self
            .cluster
            .list_workloads(namespace, &self.config.management_selector())
            .await?;
        let selected: Vec<Workload> = workloads.into_iter().filter(|w| select(w)).collect();
        info!("found {} {:?} workloads to clean up", selected.len(), sweep);

        let mut deleted = 0;
        for workload in selected {
            match delete_workload_and_config(self.cluster.as_ref(), &workload.name, namespace)
                .await
            {
                Ok(DeleteOutcome::Deleted) | Ok(DeleteOutcome::AlreadyGone) => {
                    info!(workload = %workload.name, ?sweep, "cleaned up workload");
                    deleted += 1;
                }
                Err(err) => {
                    error!(workload = %workload.name, ?sweep, error = %err, "failed to clean up workload");
                    report.errors += 1;
                }
            }
        }
        Ok(deleted)
    }
}

#[async_trait]
impl ReconcileLoop for CleanupLoop {
    fn name(&self) -> &'static str {
        "cleanup"
    }

    async fn cycle(&self) -> EngineResult<()> {
        self.run_cycle().await.map(|_| ())
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use kjm_data::StringMap;

    use super::{is_stale, is_stuck, CleanupLoop, CleanupReport};
    use crate::{
        cluster::Workload,
        config::EngineConfig,
        memory_cluster::InMemoryCluster,
        store::test::{setup, RUNTIME},
    };

    fn managed_labels() -> StringMap {
        let mut labels = StringMap::new();
        labels.insert("managed-by".to_string(), "k8s-job-manager".to_string());
        labels
    }

    fn workload(
        name: &str,
        age: Duration,
        counts: (Option<i32>, Option<i32>, Option<i32>),
    ) -> Workload {
        Workload {
            name: name.to_string(),
            namespace: "default".to_string(),
            labels: managed_labels(),
            created_at: Some(Utc::now() - age),
            active: counts.0,
            succeeded: counts.1,
            failed: counts.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_selection_rules() {
        let now = Utc::now();
        let threshold = Duration::hours(2);
        let cutoff = Duration::hours(24);

        let old_done = workload("a", Duration::hours(3), (None, Some(1), None));
        let young_done = workload("b", Duration::minutes(30), (None, Some(1), None));
        let old_failed = workload("c", Duration::hours(3), (None, None, Some(1)));
        let old_running = workload("d", Duration::hours(30), (Some(1), None, None));
        let old_stuck = workload("e", Duration::hours(30), (None, None, None));
        let zero_stuck = workload("f", Duration::hours(30), (Some(0), Some(0), Some(0)));
        let young_stuck = workload("g", Duration::hours(3), (None, None, None));
        let undated = Workload {
            created_at: None,
            ..workload("h", Duration::zero(), (None, Some(1), None))
        };

        assert!(is_stale(&old_done, now, threshold));
        assert!(!is_stale(&young_done, now, threshold));
        assert!(is_stale(&old_failed, now, threshold));
        assert!(!is_stale(&old_running, now, threshold));
        assert!(!is_stale(&undated, now, threshold));

        assert!(is_stuck(&old_stuck, now, cutoff));
        assert!(is_stuck(&zero_stuck, now, cutoff));
        assert!(!is_stuck(&young_stuck, now, cutoff));
        assert!(!is_stuck(&old_running, now, cutoff));
        assert!(!is_stuck(&old_done, now, cutoff));

        assert!(!is_stale(&old_done, now, Duration::MAX));
        assert!(!is_stuck(&old_stuck, now, Duration::MAX));
    }

    #[test]
    fn test_cleanup_cycle() {
        setup();
        let cluster = InMemoryCluster::new();
        let cleanup = CleanupLoop::new(Arc::new(cluster.clone()), Arc::new(EngineConfig::default()));
        RUNTIME.block_on(async {
            let fixtures = [
                workload("job-old-done", Duration::hours(3), (None, Some(1), None)),
                workload("job-young-done", Duration::minutes(10), (None, Some(1), None)),
                workload("job-old-failed", Duration::hours(5), (None, None, Some(3))),
                workload("job-long-running", Duration::hours(48), (Some(1), None, None)),
                workload("job-stuck", Duration::hours(25), (None, None, None)),
                workload("job-pending", Duration::hours(1), (None, None, None)),
            ];
            for w in fixtures.iter() {
                cluster.insert_workload(w.clone()).await;
            }
            cluster
                .insert_workload(Workload {
                    labels: StringMap::new(),
                    ..workload("foreign-done", Duration::hours(5), (None, Some(1), None))
                })
                .await;

            let report = cleanup.run_cycle().await.unwrap();
            assert_eq!(
                CleanupReport {
                    stale_deleted: 2,
                    orphans_deleted: 1,
                    errors: 0
                },
                report
            );
            assert_eq!(
                vec![
                    "foreign-done".to_string(),
                    "job-long-running".to_string(),
                    "job-pending".to_string(),
                    "job-young-done".to_string(),
                ],
                cluster.workload_names("default").await
            );

            // nothing left to do
            let report = cleanup.run_cycle().await.unwrap();
            assert_eq!(CleanupReport::default(), report);
        });
    }

    #[test]
    fn test_listing_failure_is_logged_not_raised() {
        setup();
        let cluster = InMemoryCluster::new();
        let cleanup = CleanupLoop::new(Arc::new(cluster.clone()), Arc::new(EngineConfig::default()));
        RUNTIME.block_on(async {
            cluster
                .insert_workload(workload("job-old-done", Duration::hours(3), (None, Some(1), None)))
                .await;
            cluster.set_unavailable(true).await;
            let report = cleanup.run_cycle().await.unwrap();
            assert_eq!(2, report.errors);

            cluster.set_unavailable(false).await;
            let report = cleanup.run_cycle().await.unwrap();
            assert_eq!(1, report.stale_deleted);
        });
    }
}
