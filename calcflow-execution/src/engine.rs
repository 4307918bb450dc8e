//! Public contract of a job engine

use async_trait::async_trait;
use calcflow_ipc::{JobResult, JsonMap};

use crate::error::EngineError;

/// Asynchronous job submission against a single worksheet session.
///
/// `submit` returns as soon as the request is queued. Results are looked up by
/// id; an absent result means the job has not completed yet or the id is
/// unknown, and callers apply their own timeout.
#[async_trait]
pub trait JobEngine: Send + Sync {
    async fn submit(&self, command: &str, payload: JsonMap) -> Result<String, EngineError>;

    async fn get_job(&self, job_id: &str) -> Option<JobResult>;

    /// Tear the engine down and bring up a fresh one.
    ///
    /// Every job id issued before the restart that has not completed will
    /// never resolve.
    async fn restart(&self) -> Result<(), EngineError>;

    async fn is_running(&self) -> bool;
}
