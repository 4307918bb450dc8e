//! Orchestration error types

use calcflow_execution::EngineError;
use calcflow_ipc::IpcError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OrchestrationError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Job timeout: no result for {job_id} within {timeout:?}")]
    JobTimeout { job_id: String, timeout: Duration },

    #[error("{message}")]
    JobFailed { job_id: String, message: String },

    #[error("Invalid job payload: {0}")]
    Payload(#[from] IpcError),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Batch {0} is already running")]
    BatchAlreadyRunning(String),

    #[error("Workflow {0} is already running")]
    WorkflowAlreadyRunning(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<validator::ValidationErrors> for OrchestrationError {
    fn from(errors: validator::ValidationErrors) -> Self {
        OrchestrationError::InvalidWorkflow(errors.to_string())
    }
}
