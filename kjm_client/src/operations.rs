use kjm_data::{CreateJobRequest, ExecutionUnitInfo, JobRecord, JobStatus, WorkloadResourceInfo};
use reqwest::blocking::{Client, RequestBuilder, Response};

fn send(request: RequestBuilder) -> Result<Response, String> {
    request
        .send()
        .map_err(|e| format!("error executing request: {}", e))
}

/// body text of an error response, or the whole response if it has none
fn unexpected(response: Response) -> String {
    let status = response.status();
    match response.text() {
        Ok(body) if !body.is_empty() => format!("{}: {}", status, body),
        _ => format!("unexpected response: {}", status),
    }
}

pub fn format_record(record: &JobRecord) -> String {
    let mut lines = vec![
        format!("{} {} [{}]", record.id, record.name, record.status),
        format!("  image:    {}", record.container_image),
        format!("  created:  {}", record.created_at.to_rfc3339()),
    ];
    if let Some(started) = record.started_at {
        lines.push(format!("  started:  {}", started.to_rfc3339()));
    }
    if let Some(completed) = record.completed_at {
        lines.push(format!("  finished: {}", completed.to_rfc3339()));
    }
    if let Some(workload) = &record.backend_workload_name {
        lines.push(format!("  workload: {}", workload));
    }
    if let Some(error) = &record.error_message {
        lines.push(format!("  error:    {}", error));
    }
    if let Some(info) = &record.resource_info {
        lines.push(format!(
            "  phase:    {} (active {}, succeeded {}, failed {})",
            info.phase,
            info.active.unwrap_or(0),
            info.succeeded.unwrap_or(0),
            info.failed.unwrap_or(0)
        ));
        for unit in &info.units {
            lines.push(format!("    unit {} {}", unit.name, unit.phase));
        }
    }
    lines.join("\n")
}

fn record_response(request: RequestBuilder) -> String {
    match send(request) {
        Ok(response) if response.status().is_success() => match response.json::<JobRecord>() {
            Ok(record) => format_record(&record),
            Err(e) => format!("could not read job: {}", e),
        },
        Ok(response) if response.status().as_u16() == 404 => "Job not found".to_string(),
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}

pub fn submit(http_client: &Client, url: &str, request: &CreateJobRequest) -> String {
    match send(http_client.post(format!("{}/api/jobs", url)).json(request)) {
        Ok(response) if response.status().is_success() => match response.json::<JobRecord>() {
            Ok(record) => record.id.to_string(),
            Err(e) => format!("could not read job: {}", e),
        },
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}

pub fn list(http_client: &Client, url: &str, status: Option<JobStatus>) -> String {
    let mut request = http_client.get(format!("{}/api/jobs", url));
    if let Some(status) = status {
        request = request.query(&[("status", status.as_str())]);
    }
    match send(request) {
        Ok(response) if response.status().is_success() => {
            match response.json::<Vec<JobRecord>>() {
                Ok(records) => records
                    .iter()
                    .map(|r| format!("{}: {} [{}] {}", r.id, r.name, r.status, r.container_image))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("could not read jobs: {}", e),
            }
        }
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}

pub fn show(http_client: &Client, url: &str, job_id: &str) -> String {
    record_response(http_client.get(format!("{}/api/jobs/{}", url, job_id)))
}

pub fn cancel(http_client: &Client, url: &str, job_id: &str) -> String {
    record_response(http_client.delete(format!("{}/api/jobs/{}", url, job_id)))
}

pub fn refresh(http_client: &Client, url: &str, job_id: &str) -> String {
    record_response(http_client.post(format!("{}/api/jobs/{}/refresh", url, job_id)))
}

pub fn workloads(http_client: &Client, url: &str) -> String {
    match send(http_client.get(format!("{}/api/cluster/workloads", url))) {
        Ok(response) if response.status().is_success() => {
            match response.json::<Vec<WorkloadResourceInfo>>() {
                Ok(workloads) => workloads
                    .iter()
                    .map(|w| format!("{} [{}]", w.name, w.phase))
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("could not read workloads: {}", e),
            }
        }
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}

pub fn units(http_client: &Client, url: &str) -> String {
    match send(http_client.get(format!("{}/api/cluster/units", url))) {
        Ok(response) if response.status().is_success() => {
            match response.json::<Vec<ExecutionUnitInfo>>() {
                Ok(units) => units
                    .iter()
                    .map(|u| {
                        let node = u.node_name.as_deref().unwrap_or("-");
                        format!("{} [{}] {}", u.name, u.phase, node)
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                Err(e) => format!("could not read execution units: {}", e),
            }
        }
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}

pub fn logs(http_client: &Client, url: &str, unit: &str, container: Option<&str>) -> String {
    let mut request = http_client.get(format!("{}/api/cluster/units/{}/logs", url, unit));
    if let Some(container) = container {
        request = request.query(&[("container", container)]);
    }
    match send(request) {
        Ok(response) if response.status().is_success() => response
            .text()
            .unwrap_or_else(|e| format!("could not read logs: {}", e)),
        Ok(response) if response.status().as_u16() == 404 => "Execution unit not found".to_string(),
        Ok(response) => unexpected(response),
        Err(e) => e,
    }
}
