use kjm_data::{
    CreateJobRequest, ExecutionUnitInfo, JobId, JobRecord, JobStatus, WorkloadResourceInfo,
};
use kjm_lib::{cluster::DeleteOutcome, error::EngineError, service::JobService};
use rocket::{
    http::Status,
    response::status,
    serde::json::Json,
    Build, Rocket, State,
};
use tracing::error;
use uuid::Uuid;

type ApiResult<T> = Result<T, status::Custom<String>>;

fn to_response(err: EngineError) -> status::Custom<String> {
    let code = match &err {
        EngineError::RecordNotFound(_) | EngineError::WorkloadNotFound(_) => Status::NotFound,
        EngineError::Validation(_) | EngineError::NoBackendWorkload(_) => Status::BadRequest,
        EngineError::InvalidTransition { .. } => Status::Conflict,
        EngineError::TransientBackend(_) | EngineError::FatalInit(_) => {
            error!(error = %err, "request failed");
            Status::InternalServerError
        }
    };
    status::Custom(code, err.to_string())
}

fn bad_request(message: String) -> status::Custom<String> {
    status::Custom(Status::BadRequest, message)
}

fn parse_id(id: &str) -> ApiResult<JobId> {
    Uuid::parse_str(id).map_err(|err| bad_request(format!("invalid job id {}: {}", id, err)))
}

#[post("/jobs", format = "json", data = "<request>")]
async fn create_job(
    service: &State<JobService>,
    request: Json<CreateJobRequest>,
) -> ApiResult<status::Created<Json<JobRecord>>> {
    let record = service.create(request.into_inner()).await.map_err(to_response)?;
    Ok(status::Created::new(format!("/api/jobs/{}", record.id)).body(Json(record)))
}

#[get("/jobs?<status>")]
async fn list_jobs(
    service: &State<JobService>,
    status: Option<&str>,
) -> ApiResult<Json<Vec<JobRecord>>> {
    let status = status
        .map(|s| s.parse::<JobStatus>())
        .transpose()
        .map_err(|err| bad_request(err.to_string()))?;
    service.list(status).await.map(Json).map_err(to_response)
}

#[get("/jobs/<id>")]
async fn get_job(service: &State<JobService>, id: &str) -> ApiResult<Json<JobRecord>> {
    service.get(parse_id(id)?).await.map(Json).map_err(to_response)
}

#[delete("/jobs/<id>")]
async fn cancel_job(service: &State<JobService>, id: &str) -> ApiResult<Json<JobRecord>> {
    service.cancel(parse_id(id)?).await.map(Json).map_err(to_response)
}

#[post("/jobs/<id>/refresh")]
async fn refresh_job(service: &State<JobService>, id: &str) -> ApiResult<Json<JobRecord>> {
    service.refresh(parse_id(id)?).await.map(Json).map_err(to_response)
}

#[get("/cluster/workloads")]
async fn list_workloads(service: &State<JobService>) -> ApiResult<Json<Vec<WorkloadResourceInfo>>> {
    service.list_workloads().await.map(Json).map_err(to_response)
}

#[get("/cluster/workloads/<name>")]
async fn get_workload(
    service: &State<JobService>,
    name: &str,
) -> ApiResult<Json<WorkloadResourceInfo>> {
    service.workload_info(name).await.map(Json).map_err(to_response)
}

#[get("/cluster/workloads/<name>/units")]
async fn list_units(
    service: &State<JobService>,
    name: &str,
) -> ApiResult<Json<Vec<ExecutionUnitInfo>>> {
    service.execution_units(name).await.map(Json).map_err(to_response)
}

#[get("/cluster/units")]
async fn list_all_units(service: &State<JobService>) -> ApiResult<Json<Vec<ExecutionUnitInfo>>> {
    service.list_execution_units().await.map(Json).map_err(to_response)
}

#[get("/cluster/units/<name>")]
async fn get_unit(service: &State<JobService>, name: &str) -> ApiResult<Json<ExecutionUnitInfo>> {
    service.execution_unit(name).await.map(Json).map_err(to_response)
}

#[get("/cluster/units/<name>/logs?<container>")]
async fn unit_logs(
    service: &State<JobService>,
    name: &str,
    container: Option<&str>,
) -> ApiResult<String> {
    service.unit_logs(name, container).await.map_err(to_response)
}

#[delete("/cluster/workloads/<name>")]
async fn delete_workload(service: &State<JobService>, name: &str) -> ApiResult<String> {
    match service.delete_workload(name).await.map_err(to_response)? {
        DeleteOutcome::Deleted => Ok(format!("workload {} deleted", name)),
        DeleteOutcome::AlreadyGone => Ok(format!("workload {} already gone", name)),
    }
}

/// mounts the api under `/api`
pub fn mount(rocket: Rocket<Build>, service: JobService) -> Rocket<Build> {
    rocket.manage(service).mount(
        "/api",
        routes![
            create_job,
            list_jobs,
            get_job,
            cancel_job,
            refresh_job,
            list_workloads,
            get_workload,
            list_units,
            list_all_units,
            get_unit,
            unit_logs,
            delete_workload,
        ],
    )
}
