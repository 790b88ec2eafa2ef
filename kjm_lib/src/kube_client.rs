use async_trait::async_trait;
use k8s_openapi::api::{
    batch::v1::Job,
    core::v1::{ConfigMap, Pod},
};
use kjm_data::ExecutionUnitInfo;
use kube::{
    api::{DeleteParams, ListParams, LogParams, PostParams},
    Api, Client,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    cluster::{ClusterWorkloadClient, Workload, WorkloadSpec},
    error::{BackendError, BackendResult, EngineError, EngineResult},
    projector::{unit_from_pod, workload_from_job},
};

const CONFIG_VOLUME: &str = "config-volume";

/// gateway to a Kubernetes cluster: workloads are batch/v1 Jobs, their
/// config objects ConfigMaps and execution units Pods
#[derive(Clone)]
pub struct KubeWorkloadClient {
    client: Client,
}

impl KubeWorkloadClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// in-cluster service account first, local kubeconfig otherwise
    pub async fn connect() -> EngineResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|err| EngineError::FatalInit(err.to_string()))?;
        info!("connected to kubernetes cluster");
        Ok(Self::new(client))
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(response) if response.code == 409)
}

/// only a config map created by the failed attempt itself is removed; a
/// conflicting job may be live and mounting it
fn should_remove_config(config_created: bool, job_err: &kube::Error) -> bool {
    config_created && !is_conflict(job_err)
}

pub fn config_map_manifest(spec: &WorkloadSpec) -> BackendResult<ConfigMap> {
    serde_json::from_value(json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {
            "name": spec.config_name,
            "namespace": spec.namespace,
            "labels": spec.config_labels,
        },
        "data": spec.config_data,
    }))
    .map_err(|err| BackendError::Transient(format!("invalid config map manifest: {}", err)))
}

pub fn job_manifest(spec: &WorkloadSpec) -> BackendResult<Job> {
    let mut container = json!({
        "name": spec.container_name,
        "image": spec.image,
        "volumeMounts": [{"name": CONFIG_VOLUME, "mountPath": spec.config_mount_path}],
    });
    if !spec.command.is_empty() {
        container["command"] = json!(spec.command);
    }
    if !spec.args.is_empty() {
        container["args"] = json!(spec.args);
    }
    serde_json::from_value(json!({
        "apiVersion": "batch/v1",
        "kind": "Job",
        "metadata": {
            "name": spec.name,
            "namespace": spec.namespace,
            "labels": spec.labels,
        },
        "spec": {
            "backoffLimit": spec.backoff_limit,
            "ttlSecondsAfterFinished": spec.ttl_seconds_after_finished,
            "template": {
                "metadata": {"labels": spec.labels},
                "spec": {
                    "restartPolicy": "Never",
                    "containers": [container],
                    "volumes": [{"name": CONFIG_VOLUME, "configMap": {"name": spec.config_name}}],
                },
            },
        },
    }))
    .map_err(|err| BackendError::Transient(format!("invalid job manifest: {}", err)))
}

#[async_trait]
impl ClusterWorkloadClient for KubeWorkloadClient {
    #[instrument(skip_all, fields(workload = %spec.name))]
    async fn create_workload(&self, spec: &WorkloadSpec) -> BackendResult<Workload> {
        let config_map = config_map_manifest(spec)?;
        let job = job_manifest(spec)?;
        let config_maps = self.config_maps(&spec.namespace);
        let config_created = match config_maps.create(&PostParams::default(), &config_map).await {
            Ok(_) => true,
            // left over from an earlier attempt, reuse it
            Err(err) if is_conflict(&err) => {
                warn!(config = %spec.config_name, "config map already exists");
                false
            }
            Err(err) => return Err(err.into()),
        };
        match self.jobs(&spec.namespace).create(&PostParams::default(), &job).await {
            Ok(created) => {
                info!("created kubernetes job");
                Ok(workload_from_job(&created))
            }
            Err(err) if !should_remove_config(config_created, &err) => {
                warn!(error = %err, "could not create kubernetes job, keeping config map");
                Err(err.into())
            }
            Err(err) => {
                if let Err(cleanup_err) = config_maps
                    .delete(&spec.config_name, &DeleteParams::default())
                    .await
                {
                    warn!(error = %cleanup_err, "could not remove config map of failed job");
                }
                Err(err.into())
            }
        }
    }

    async fn get_workload(&self, name: &str, namespace: &str) -> BackendResult<Option<Workload>> {
        let job = self.jobs(namespace).get_opt(name).await?;
        Ok(job.as_ref().map(workload_from_job))
    }

    async fn list_workloads(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<Workload>> {
        let params = ListParams::default().labels(label_selector);
        let jobs = self.jobs(namespace).list(&params).await?;
        Ok(jobs.items.iter().map(workload_from_job).collect())
    }

    #[instrument(skip(self))]
    async fn delete_workload(&self, name: &str, namespace: &str) -> BackendResult<()> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await?;
        info!("deleted kubernetes job");
        Ok(())
    }

    async fn delete_config(&self, name: &str, namespace: &str) -> BackendResult<()> {
        self.config_maps(namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_execution_units_for(
        &self,
        workload_name: &str,
        namespace: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>> {
        let params = ListParams::default().labels(&format!("job-name={}", workload_name));
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items.iter().map(unit_from_pod).collect())
    }

    async fn list_execution_units(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> BackendResult<Vec<ExecutionUnitInfo>> {
        let params = ListParams::default().labels(label_selector);
        let pods = self.pods(namespace).list(&params).await?;
        Ok(pods.items.iter().map(unit_from_pod).collect())
    }

    async fn get_execution_unit(
        &self,
        unit_name: &str,
        namespace: &str,
    ) -> BackendResult<Option<ExecutionUnitInfo>> {
        let pod = self.pods(namespace).get_opt(unit_name).await?;
        Ok(pod.as_ref().map(unit_from_pod))
    }

    async fn get_logs(
        &self,
        unit_name: &str,
        namespace: &str,
        container_name: Option<&str>,
    ) -> BackendResult<String> {
        let params = LogParams {
            container: container_name.map(str::to_string),
            ..LogParams::default()
        };
        Ok(self.pods(namespace).logs(unit_name, &params).await?)
    }
}
