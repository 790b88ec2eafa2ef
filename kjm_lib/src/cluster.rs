use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kjm_data::{ExecutionUnitInfo, JobId, StringMap, WorkloadCondition};
use tracing::{info, warn};

use crate::error::{BackendError, BackendResult};

const WORKLOAD_PREFIX: &str = "job-";
const CONFIG_PREFIX: &str = "config-";

/// everything the backend needs to create one workload and its config object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkloadSpec {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub container_name: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub labels: StringMap,
    pub config_name: String,
    pub config_data: StringMap,
    pub config_labels: StringMap,
    pub config_mount_path: String,
    pub backoff_limit: i32,
    pub ttl_seconds_after_finished: i32,
}

/// backend view of a workload, as returned by create/get/list
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Workload {
    pub name: String,
    pub namespace: String,
    pub labels: StringMap,
    pub created_at: Option<DateTime<Utc>>,
    pub active: Option<i32>,
    pub succeeded: Option<i32>,
    pub failed: Option<i32>,
    pub start_time: Option<DateTime<Utc>>,
    pub completion_time: Option<DateTime<Utc>>,
    pub conditions: Vec<WorkloadCondition>,
}

impl Workload {
    pub fn is_complete(&self) -> bool {
        self.succeeded.unwrap_or(0) > 0
    }

    pub fn is_failed(&self) -> bool {
        self.failed.unwrap_or(0) > 0
    }

    pub fn is_terminal(&self) -> bool {
        self.is_complete() || self.is_failed()
    }

    /// false while no execution unit was ever observed active, succeeded or failed
    pub fn has_progress(&self) -> bool {
        self.active.unwrap_or(0) > 0 || self.is_terminal()
    }

    /// message of the most recent condition, if any
    pub fn last_condition_message(&self) -> Option<&str> {
        self.conditions.last().and_then(|c| c.message.as_deref())
    }
}

#[async_trait]
pub trait ClusterWorkloadClient: Send + Sync {
    /// creates the config object and the workload mounting it
    async fn create_workload(&self, spec: &WorkloadSpec) -> BackendResult<Workload>;

    async fn get_workload(&self, name: &str, namespace: &str) -> BackendResult<Option<Workload>>;

    /// `label_selector` is a comma separated list of `key=value` terms
    async fn list_workloads(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<Workload>>;

    /// fails with `BackendError::NotFound` when the workload is absent
    async fn delete_workload(&self, name: &str, namespace: &str) -> BackendResult<()>;

    /// fails with `BackendError::NotFound` when the config object is absent
    async fn delete_config(&self, name: &str, namespace: &str) -> BackendResult<()>;

    async fn get_execution_units_for(
        &self,
        workload_name: &str,
        namespace: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>>;

    /// execution units of all workloads matching `label_selector`
    async fn list_execution_units(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>>;

    async fn get_execution_unit(
        &self,
        unit_name: &str,
        namespace: &str,
    ) -> BackendResult<Option<ExecutionUnitInfo>>;

    async fn get_logs(
        &self,
        unit_name: &str,
        namespace: &str,
        container_name: Option<&str>,
    ) -> BackendResult<String>;
}

pub fn workload_name_for(id: JobId) -> String {
    format!("{}{}", WORKLOAD_PREFIX, id)
}

pub fn config_name_for(id: JobId) -> String {
    format!("{}{}", CONFIG_PREFIX, id)
}

/// name of the config object that belongs to a workload
pub fn config_name_for_workload(workload_name: &str) -> String {
    let suffix = workload_name
        .strip_prefix(WORKLOAD_PREFIX)
        .unwrap_or(workload_name);
    format!("{}{}", CONFIG_PREFIX, suffix)
}

/// parses `k=v,k2=v2` into pairs, empty terms are ignored
pub fn parse_label_selector(selector: &str) -> Vec<(String, String)> {
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(|term| match term.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (term.to_string(), String::new()),
        })
        .collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
}

/// deletes a workload and then its config object
///
/// an absent workload counts as success; a failing config delete is logged
/// and never undoes the workload delete
pub async fn delete_workload_and_config(
    cluster: &dyn ClusterWorkloadClient,
    name: &str,
    namespace: &str,
) -> BackendResult<DeleteOutcome> {
    let outcome = match cluster.delete_workload(name, namespace).await {
        Ok(()) => DeleteOutcome::Deleted,
        Err(BackendError::NotFound(_)) => {
            info!(workload = name, "workload already gone");
            DeleteOutcome::AlreadyGone
        }
        Err(err) => return Err(err),
    };
    let config_name = config_name_for_workload(name);
    match cluster.delete_config(&config_name, namespace).await {
        Ok(()) | Err(BackendError::NotFound(_)) => {}
        Err(err) => warn!(
            workload = name,
            config = %config_name,
            error = %err,
            "could not delete config object"
        ),
    }
    Ok(outcome)
}

#[cfg(test)]
mod test {
    use uuid::Uuid;

    use super::{
        config_name_for, config_name_for_workload, delete_workload_and_config,
        parse_label_selector, workload_name_for, DeleteOutcome,
    };
    use crate::{
        memory_cluster::InMemoryCluster,
        store::test::{setup, RUNTIME},
    };

    #[test]
    fn test_derived_names() {
        let id = Uuid::new_v4();
        assert_eq!(format!("job-{}", id), workload_name_for(id));
        assert_eq!(config_name_for(id), config_name_for_workload(&workload_name_for(id)));
        assert_eq!("config-external", config_name_for_workload("external"));
    }

    #[test]
    fn test_parse_label_selector() {
        assert_eq!(
            vec![
                ("managed-by".to_string(), "k8s-job-manager".to_string()),
                ("team".to_string(), "data".to_string())
            ],
            parse_label_selector("managed-by=k8s-job-manager, team=data,")
        );
        assert!(parse_label_selector("").is_empty());
    }

    #[test]
    fn test_delete_twice_is_not_an_error() {
        setup();
        let cluster = InMemoryCluster::new();
        RUNTIME.block_on(async {
            let spec = crate::launch::test::spec_named("job-twice");
            cluster.seed(&spec).await;
            let first = delete_workload_and_config(&cluster, "job-twice", "default").await;
            assert_eq!(DeleteOutcome::Deleted, first.unwrap());
            assert!(cluster.config_names("default").await.is_empty());
            let second = delete_workload_and_config(&cluster, "job-twice", "default").await;
            assert_eq!(DeleteOutcome::AlreadyGone, second.unwrap());
        });
    }

    #[test]
    fn test_config_delete_failure_keeps_workload_deleted() {
        setup();
        let cluster = InMemoryCluster::new();
        RUNTIME.block_on(async {
            let spec = crate::launch::test::spec_named("job-cfg");
            cluster.seed(&spec).await;
            cluster.fail_config_deletes(true).await;
            let outcome = delete_workload_and_config(&cluster, "job-cfg", "default").await;
            assert_eq!(DeleteOutcome::Deleted, outcome.unwrap());
            assert!(cluster.workload("job-cfg", "default").await.is_none());
            assert_eq!(vec!["config-cfg".to_string()], cluster.config_names("default").await);
        });
    }
}
