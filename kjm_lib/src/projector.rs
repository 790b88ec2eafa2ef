use k8s_openapi::{
    api::{
        batch::v1::Job,
        core::v1::{ContainerState, ContainerStatus, Pod},
    },
    apimachinery::pkg::apis::meta::v1::Time,
};
use kjm_data::{
    ContainerStateInfo, ContainerStateKind, ContainerStatusInfo, ExecutionUnitInfo,
    WorkloadCondition, WorkloadPhase, WorkloadResourceInfo,
};

use crate::{
    cluster::{ClusterWorkloadClient, Workload},
    error::BackendResult,
};

/// Succeeded wins over Failed, Failed over Running
pub fn phase_of(active: Option<i32>, succeeded: Option<i32>, failed: Option<i32>) -> WorkloadPhase {
    if succeeded.unwrap_or(0) > 0 {
        WorkloadPhase::Succeeded
    } else if failed.unwrap_or(0) > 0 {
        WorkloadPhase::Failed
    } else if active.unwrap_or(0) > 0 {
        WorkloadPhase::Running
    } else {
        WorkloadPhase::Pending
    }
}

pub fn project(workload: &Workload, units: Vec<ExecutionUnitInfo>) -> WorkloadResourceInfo {
    WorkloadResourceInfo {
        name: workload.name.clone(),
        namespace: workload.namespace.clone(),
        creation_timestamp: workload.created_at,
        phase: phase_of(workload.active, workload.succeeded, workload.failed),
        active: workload.active,
        succeeded: workload.succeeded,
        failed: workload.failed,
        start_time: workload.start_time,
        completion_time: workload.completion_time,
        conditions: workload.conditions.clone(),
        units,
    }
}

/// fresh snapshot of a workload and its execution units, None if the workload is gone
pub async fn fetch_resource_info(
    cluster: &dyn ClusterWorkloadClient,
    name: &str,
    namespace: &str,
) -> BackendResult<Option<(Workload, WorkloadResourceInfo)>> {
    let workload = match cluster.get_workload(name, namespace).await? {
        Some(workload) => workload,
        None => return Ok(None),
    };
    let units = cluster.get_execution_units_for(name, namespace).await?;
    let info = project(&workload, units);
    Ok(Some((workload, info)))
}

fn time(t: &Option<Time>) -> Option<chrono::DateTime<chrono::Utc>> {
    t.as_ref().map(|t| t.0)
}

pub fn workload_from_job(job: &Job) -> Workload {
    let status = job.status.as_ref();
    Workload {
        name: job.metadata.name.clone().unwrap_or_default(),
        namespace: job.metadata.namespace.clone().unwrap_or_default(),
        labels: job.metadata.labels.clone().unwrap_or_default(),
        created_at: time(&job.metadata.creation_timestamp),
        active: status.and_then(|s| s.active),
        succeeded: status.and_then(|s| s.succeeded),
        failed: status.and_then(|s| s.failed),
        start_time: status.and_then(|s| time(&s.start_time)),
        completion_time: status.and_then(|s| time(&s.completion_time)),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| WorkloadCondition {
                        condition_type: c.type_.clone(),
                        status: c.status.clone(),
                        last_transition_time: time(&c.last_transition_time),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

pub fn unit_from_pod(pod: &Pod) -> ExecutionUnitInfo {
    let status = pod.status.as_ref();
    ExecutionUnitInfo {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        creation_timestamp: time(&pod.metadata.creation_timestamp),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ip: status.and_then(|s| s.pod_ip.clone()),
        node_name: pod.spec.as_ref().and_then(|s| s.node_name.clone()),
        start_time: status.and_then(|s| time(&s.start_time)),
        containers: status
            .and_then(|s| s.container_statuses.as_ref())
            .map(|statuses| statuses.iter().map(container_status).collect())
            .unwrap_or_default(),
        conditions: status
            .and_then(|s| s.conditions.as_ref())
            .map(|conditions| {
                conditions
                    .iter()
                    .map(|c| WorkloadCondition {
                        condition_type: c.type_.clone(),
                        status: c.status.clone(),
                        last_transition_time: time(&c.last_transition_time),
                        reason: c.reason.clone(),
                        message: c.message.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn container_status(status: &ContainerStatus) -> ContainerStatusInfo {
    ContainerStatusInfo {
        name: status.name.clone(),
        ready: status.ready,
        restart_count: status.restart_count,
        image: status.image.clone(),
        image_id: Some(status.image_id.clone()).filter(|id| !id.is_empty()),
        container_id: status.container_id.clone(),
        state: status.state.as_ref().and_then(container_state),
        last_termination_state: status.last_state.as_ref().and_then(container_state),
    }
}

// running, then terminated, then waiting; an empty state maps to None
fn container_state(state: &ContainerState) -> Option<ContainerStateInfo> {
    if let Some(running) = &state.running {
        return Some(ContainerStateInfo {
            state: ContainerStateKind::Running,
            started_at: time(&running.started_at),
            finished_at: None,
            reason: None,
            message: None,
            exit_code: None,
            signal: None,
        });
    }
    if let Some(terminated) = &state.terminated {
        return Some(ContainerStateInfo {
            state: ContainerStateKind::Terminated,
            started_at: time(&terminated.started_at),
            finished_at: time(&terminated.finished_at),
            reason: terminated.reason.clone(),
            message: terminated.message.clone(),
            exit_code: Some(terminated.exit_code),
            signal: terminated.signal,
        });
    }
    state.waiting.as_ref().map(|waiting| ContainerStateInfo {
        state: ContainerStateKind::Waiting,
        started_at: None,
        finished_at: None,
        reason: waiting.reason.clone(),
        message: waiting.message.clone(),
        exit_code: None,
        signal: None,
    })
}

#[cfg(test)]
pub(crate) mod test {
    use k8s_openapi::api::{batch::v1::Job, core::v1::Pod};
    use kjm_data::{ContainerStateKind, WorkloadPhase, WorkloadResourceInfo};
    use serde_json::json;

    use super::{phase_of, project, unit_from_pod, workload_from_job};
    use crate::cluster::Workload;

    pub(crate) fn info_with_counts(
        name: &str,
        active: i32,
        succeeded: i32,
        failed: i32,
    ) -> WorkloadResourceInfo {
        let workload = Workload {
            name: name.to_string(),
            namespace: "default".to_string(),
            active: Some(active),
            succeeded: Some(succeeded),
            failed: Some(failed),
            ..Default::default()
        };
        project(&workload, Vec::new())
    }

    #[test]
    fn test_phase_precedence() {
        assert_eq!(WorkloadPhase::Succeeded, phase_of(Some(1), Some(1), Some(1)));
        assert_eq!(WorkloadPhase::Failed, phase_of(Some(1), Some(0), Some(2)));
        assert_eq!(WorkloadPhase::Running, phase_of(Some(1), None, None));
        assert_eq!(WorkloadPhase::Pending, phase_of(None, None, None));
        assert_eq!(WorkloadPhase::Pending, phase_of(Some(0), Some(0), Some(0)));
    }

    #[test]
    fn test_workload_from_job() {
        let job: Job = serde_json::from_value(json!({
            "metadata": {
                "name": "job-1",
                "namespace": "default",
                "labels": {"managed-by": "k8s-job-manager"},
                "creationTimestamp": "2024-05-01T10:00:00Z"
            },
            "status": {
                "failed": 1,
                "startTime": "2024-05-01T10:00:05Z",
                "conditions": [
                    {"type": "FailureTarget", "status": "True", "message": "first"},
                    {"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded",
                     "message": "Job has reached the specified backoff limit",
                     "lastTransitionTime": "2024-05-01T10:01:00Z"}
                ]
            }
        }))
        .unwrap();

        let workload = workload_from_job(&job);
        assert_eq!("job-1", workload.name);
        assert!(workload.is_failed());
        assert!(!workload.is_complete());
        assert!(workload.created_at.is_some());
        assert_eq!(2, workload.conditions.len());
        assert_eq!("Failed", workload.conditions[1].condition_type);
        assert_eq!(
            Some("Job has reached the specified backoff limit"),
            workload.last_condition_message()
        );
        assert_eq!(WorkloadPhase::Failed, project(&workload, Vec::new()).phase);
    }

    #[test]
    fn test_job_without_status_is_pending() {
        let job: Job = serde_json::from_value(json!({"metadata": {"name": "job-2"}})).unwrap();
        let workload = workload_from_job(&job);
        assert!(!workload.has_progress());
        assert!(workload.conditions.is_empty());
        assert_eq!(WorkloadPhase::Pending, project(&workload, Vec::new()).phase);
    }

    #[test]
    fn test_unit_from_pod() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "job-1-abcde", "namespace": "default"},
            "spec": {"nodeName": "node-a", "containers": [{"name": "job-container"}]},
            "status": {
                "phase": "Failed",
                "podIP": "10.0.0.7",
                "containerStatuses": [{
                    "name": "job-container",
                    "ready": false,
                    "restartCount": 2,
                    "image": "busybox",
                    "imageID": "docker.io/library/busybox@sha256:abc",
                    "state": {"terminated": {"exitCode": 137, "signal": 9, "reason": "OOMKilled"}},
                    "lastState": {"waiting": {"reason": "ContainerCreating"}}
                }]
            }
        }))
        .unwrap();

        let unit = unit_from_pod(&pod);
        assert_eq!("Failed", unit.phase);
        assert_eq!(Some("node-a".to_string()), unit.node_name);
        assert_eq!(Some("10.0.0.7".to_string()), unit.ip);
        let container = &unit.containers[0];
        assert_eq!(2, container.restart_count);
        let state = container.state.as_ref().unwrap();
        assert_eq!(ContainerStateKind::Terminated, state.state);
        assert_eq!(Some(137), state.exit_code);
        assert_eq!(Some(9), state.signal);
        assert_eq!(Some("OOMKilled".to_string()), state.reason);
        let last = container.last_termination_state.as_ref().unwrap();
        assert_eq!(ContainerStateKind::Waiting, last.state);
    }

    #[test]
    fn test_pod_without_status() {
        let pod: Pod = serde_json::from_value(json!({"metadata": {"name": "p"}})).unwrap();
        let unit = unit_from_pod(&pod);
        assert_eq!("Unknown", unit.phase);
        assert!(unit.containers.is_empty());
    }
}
