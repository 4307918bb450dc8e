//! Submit-and-wait on top of the non-blocking job engine

use calcflow_execution::JobEngine;
use calcflow_ipc::{JobCommand, JobPayload, JobResult, JsonMap};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::OrchestrationError;

/// Polls the engine's result table with a fixed interval and deadline
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    pub timeout: Duration,
    pub interval: Duration,
}

impl JobPoller {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Wait for a submitted job's result
    pub async fn wait(
        &self,
        engine: &dyn JobEngine,
        job_id: &str,
    ) -> Result<JobResult, OrchestrationError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if let Some(result) = engine.get_job(job_id).await {
                return Ok(result);
            }
            if Instant::now() >= deadline {
                return Err(OrchestrationError::JobTimeout {
                    job_id: job_id.to_string(),
                    timeout: self.timeout,
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }

    /// Submit a command, wait for it, and require a successful result
    pub async fn run_command(
        &self,
        engine: &dyn JobEngine,
        command: JobCommand,
        payload: JsonMap,
    ) -> Result<JsonMap, OrchestrationError> {
        let job_id = engine.submit(command.as_str(), payload).await?;
        let result = self.wait(engine, &job_id).await?;

        if result.is_success() {
            Ok(result.data)
        } else {
            Err(OrchestrationError::JobFailed {
                message: result
                    .error_message
                    .unwrap_or_else(|| format!("{} failed without a message", command)),
                job_id,
            })
        }
    }

    pub async fn run<P: JobPayload>(
        &self,
        engine: &dyn JobEngine,
        payload: P,
    ) -> Result<JsonMap, OrchestrationError> {
        let map = payload.into_payload()?;
        self.run_command(engine, P::COMMAND, map).await
    }
}
