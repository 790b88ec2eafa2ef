use kjm_data::{JobId, JobStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend resource not found: {0}")]
    NotFound(String),
    #[error("backend request failed: {0}")]
    Transient(String),
}

impl From<kube::Error> for BackendError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                BackendError::NotFound(response.message)
            }
            err => BackendError::Transient(err.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("job record {0} not found")]
    RecordNotFound(JobId),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
    #[error("job record {0} has no backend workload")]
    NoBackendWorkload(JobId),
    #[error("backend workload {0} not found")]
    WorkloadNotFound(String),
    #[error("transient backend error: {0}")]
    TransientBackend(String),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("could not initialize cluster client: {0}")]
    FatalInit(String),
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound(name) => EngineError::WorkloadNotFound(name),
            BackendError::Transient(msg) => EngineError::TransientBackend(msg),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
pub(crate) mod test {
    use kube::core::ErrorResponse;

    use super::{BackendError, EngineError};

    pub(crate) fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("request failed with {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_error_mapping() {
        match BackendError::from(api_error(404)) {
            BackendError::NotFound(message) => assert_eq!("request failed with 404", message),
            other => panic!("unexpected mapping {:?}", other),
        }
        for code in [409, 500, 503] {
            assert!(matches!(
                BackendError::from(api_error(code)),
                BackendError::Transient(_)
            ));
        }
        assert!(matches!(
            EngineError::from(BackendError::from(api_error(404))),
            EngineError::WorkloadNotFound(_)
        ));
        assert!(matches!(
            EngineError::from(BackendError::from(api_error(500))),
            EngineError::TransientBackend(_)
        ));
    }
}
