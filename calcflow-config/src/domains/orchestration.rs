//! Batch and workflow execution settings

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_required_string, Validatable};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub batch: BatchSettings,

    #[serde(default)]
    pub workflow: WorkflowSettings,
}

/// Parameter sweep execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSettings {
    /// How long to wait for a single job before treating it as failed
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_batch_job_timeout")]
    pub job_timeout: Duration,

    /// Sleep between result lookups
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_batch_poll_interval")]
    pub poll_interval: Duration,

    /// Engine restarts allowed per row before it is recorded as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Chained worksheet execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    #[serde(with = "crate::domains::utils::serde_duration", default = "default_workflow_job_timeout")]
    pub job_timeout: Duration,

    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_workflow_poll_interval")]
    pub poll_interval: Duration,

    /// Export directory for workflows that do not name one
    #[serde(default = "default_output_dir")]
    pub default_output_dir: PathBuf,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            job_timeout: default_batch_job_timeout(),
            poll_interval: default_batch_poll_interval(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            job_timeout: default_workflow_job_timeout(),
            poll_interval: default_workflow_poll_interval(),
            default_output_dir: default_output_dir(),
        }
    }
}

impl Validatable for OrchestrationConfig {
    fn validate(&self) -> ConfigResult<()> {
        self.batch.validate()?;
        self.workflow.validate()?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "orchestration"
    }
}

impl Validatable for BatchSettings {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.job_timeout, "job_timeout", self.domain_name())?;
        validate_duration(self.poll_interval, "poll_interval", self.domain_name())?;

        if self.poll_interval > self.job_timeout {
            return Err(self.validation_error("poll_interval must not exceed job_timeout"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "orchestration.batch"
    }
}

impl Validatable for WorkflowSettings {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.job_timeout, "job_timeout", self.domain_name())?;
        validate_duration(self.poll_interval, "poll_interval", self.domain_name())?;
        validate_required_string(
            &self.default_output_dir.to_string_lossy(),
            "default_output_dir",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "orchestration.workflow"
    }
}

fn default_batch_job_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_batch_poll_interval() -> Duration {
    Duration::from_millis(500)
}

fn default_max_retries() -> u32 {
    1
}

fn default_workflow_job_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_workflow_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("results")
}
