use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use chrono::Utc;
use kjm_data::{ExecutionUnitInfo, StringMap, WorkloadCondition};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    cluster::{parse_label_selector, ClusterWorkloadClient, Workload, WorkloadSpec},
    error::{BackendError, BackendResult},
};

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

struct StoredConfig {
    data: StringMap,
    labels: StringMap,
}

#[derive(Default)]
struct ClusterState {
    workloads: BTreeMap<Key, Workload>,
    configs: BTreeMap<Key, StoredConfig>,
    units: BTreeMap<Key, Vec<ExecutionUnitInfo>>,
    logs: BTreeMap<Key, String>,
    failing_creates: HashSet<String>,
    failing_gets: HashSet<String>,
    failing_config_deletes: bool,
    unavailable: bool,
    create_calls: usize,
}

impl ClusterState {
    fn check_available(&self) -> BackendResult<()> {
        if self.unavailable {
            return Err(BackendError::Transient("cluster unreachable".to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, spec: &WorkloadSpec) -> Workload {
        self.configs.insert(
            key(&spec.namespace, &spec.config_name),
            StoredConfig {
                data: spec.config_data.clone(),
                labels: spec.config_labels.clone(),
            },
        );
        let workload = Workload {
            name: spec.name.clone(),
            namespace: spec.namespace.clone(),
            labels: spec.labels.clone(),
            created_at: Some(Utc::now()),
            ..Default::default()
        };
        self.workloads
            .insert(key(&spec.namespace, &spec.name), workload.clone());
        workload
    }
}

fn matches_selector(labels: &StringMap, terms: &[(String, String)]) -> bool {
    terms
        .iter()
        .all(|(k, v)| labels.get(k).map_or(false, |value| value == v))
}

/// in-process cluster, nothing is executed and workloads only change when a
/// caller says so
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// creates a workload bypassing failure injection
    pub async fn seed(&self, spec: &WorkloadSpec) -> Workload {
        self.state.lock().await.insert(spec)
    }

    /// stores a workload as given, without a config object
    pub async fn insert_workload(&self, workload: Workload) {
        let mut state = self.state.lock().await;
        state
            .workloads
            .insert(key(&workload.namespace, &workload.name), workload);
    }

    /// overwrites the counts of an existing workload, returns false if absent
    pub async fn set_counts(
        &self,
        name: &str,
        namespace: &str,
        active: Option<i32>,
        succeeded: Option<i32>,
        failed: Option<i32>,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state.workloads.get_mut(&key(namespace, name)) {
            Some(workload) => {
                workload.active = active;
                workload.succeeded = succeeded;
                workload.failed = failed;
                let now = Some(Utc::now());
                if active.is_some() && workload.start_time.is_none() {
                    workload.start_time = now;
                }
                if succeeded.unwrap_or(0) > 0 {
                    workload.completion_time = now;
                }
                true
            }
            None => false,
        }
    }

    pub async fn push_condition(&self, name: &str, namespace: &str, condition: WorkloadCondition) {
        let mut state = self.state.lock().await;
        if let Some(workload) = state.workloads.get_mut(&key(namespace, name)) {
            workload.conditions.push(condition);
        }
    }

    /// deletes a workload behind the engine's back
    pub async fn remove_workload(&self, name: &str, namespace: &str) -> Option<Workload> {
        self.state
            .lock()
            .await
            .workloads
            .remove(&key(namespace, name))
    }

    pub async fn add_unit(&self, workload_name: &str, unit: ExecutionUnitInfo) {
        let mut state = self.state.lock().await;
        state
            .units
            .entry(key(&unit.namespace, workload_name))
            .or_default()
            .push(unit);
    }

    pub async fn set_logs(&self, unit_name: &str, namespace: &str, logs: &str) {
        let mut state = self.state.lock().await;
        state.logs.insert(key(namespace, unit_name), logs.to_string());
    }

    pub async fn fail_create(&self, workload_name: &str) {
        let mut state = self.state.lock().await;
        state.failing_creates.insert(workload_name.to_string());
    }

    pub async fn fail_get(&self, workload_name: &str) {
        let mut state = self.state.lock().await;
        state.failing_gets.insert(workload_name.to_string());
    }

    pub async fn fail_config_deletes(&self, failing: bool) {
        self.state.lock().await.failing_config_deletes = failing;
    }

    /// every call fails with a transient error while set
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().await.unavailable = unavailable;
    }

    pub async fn workload(&self, name: &str, namespace: &str) -> Option<Workload> {
        self.state
            .lock()
            .await
            .workloads
            .get(&key(namespace, name))
            .cloned()
    }

    pub async fn workload_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .workloads
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn config_names(&self, namespace: &str) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .configs
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub async fn config(&self, name: &str, namespace: &str) -> Option<(StringMap, StringMap)> {
        let state = self.state.lock().await;
        state
            .configs
            .get(&key(namespace, name))
            .map(|c| (c.data.clone(), c.labels.clone()))
    }

    pub async fn create_calls(&self) -> usize {
        self.state.lock().await.create_calls
    }
}

#[async_trait]
impl ClusterWorkloadClient for InMemoryCluster {
    async fn create_workload(&self, spec: &WorkloadSpec) -> BackendResult<Workload> {
        let mut state = self.state.lock().await;
        state.create_calls += 1;
        state.check_available()?;
        if state.failing_creates.contains(&spec.name) {
            return Err(BackendError::Transient(format!(
                "admission rejected workload {}",
                spec.name
            )));
        }
        if state.workloads.contains_key(&key(&spec.namespace, &spec.name)) {
            return Err(BackendError::Transient(format!(
                "workload {} already exists",
                spec.name
            )));
        }
        debug!(workload = %spec.name, "creating in-memory workload");
        Ok(state.insert(spec))
    }

    async fn get_workload(&self, name: &str, namespace: &str) -> BackendResult<Option<Workload>> {
        let state = self.state.lock().await;
        state.check_available()?;
        if state.failing_gets.contains(name) {
            return Err(BackendError::Transient(format!("timed out reading {}", name)));
        }
        Ok(state.workloads.get(&key(namespace, name)).cloned())
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<Workload>> {
        let state = self.state.lock().await;
        state.check_available()?;
        let terms = parse_label_selector(label_selector);
        Ok(state
            .workloads
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, workload)| workload)
            .filter(|workload| matches_selector(&workload.labels, &terms))
            .cloned()
            .collect())
    }

    async fn delete_workload(&self, name: &str, namespace: &str) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.units.remove(&key(namespace, name));
        state
            .workloads
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn delete_config(&self, name: &str, namespace: &str) -> BackendResult<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        if state.failing_config_deletes {
            return Err(BackendError::Transient(format!("could not delete {}", name)));
        }
        state
            .configs
            .remove(&key(namespace, name))
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(name.to_string()))
    }

    async fn get_execution_units_for(
        &self,
        workload_name: &str,
        namespace: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .units
            .get(&key(namespace, workload_name))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_execution_units(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>> {
        let state = self.state.lock().await;
        state.check_available()?;
        let terms = parse_label_selector(label_selector);
        Ok(state
            .units
            .iter()
            .filter(|(workload_key, _)| {
                workload_key.0 == namespace
                    && state
                        .workloads
                        .get(*workload_key)
                        .map_or(false, |w| matches_selector(&w.labels, &terms))
            })
            .flat_map(|(_, units)| units.iter().cloned())
            .collect())
    }

    async fn get_execution_unit(
        &self,
        unit_name: &str,
        namespace: &str,
    ) -> BackendResult<Option<ExecutionUnitInfo>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state
            .units
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .flat_map(|(_, units)| units.iter())
            .find(|unit| unit.name == unit_name)
            .cloned())
    }

    async fn get_logs(
        &self,
        unit_name: &str,
        namespace: &str,
        _container_name: Option<&str>,
    ) -> BackendResult<String> {
        let state = self.state.lock().await;
        state.check_available()?;
        state
            .logs
            .get(&key(namespace, unit_name))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(unit_name.to_string()))
    }
}
