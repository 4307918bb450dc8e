//! Engine supervisor configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_required_string, Validatable};

/// How the supervisor launches and tears down the sidecar process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program to launch; the running executable when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sidecar_program: Option<PathBuf>,

    /// Arguments passed to the sidecar program
    #[serde(default = "default_sidecar_args")]
    pub sidecar_args: Vec<String>,

    /// Time the sidecar gets to exit after the shutdown sentinel
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_shutdown_grace_period")]
    pub shutdown_grace_period: Duration,

    /// Time to wait for the process to die after a forced kill
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_kill_timeout")]
    pub kill_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sidecar_program: None,
            sidecar_args: default_sidecar_args(),
            shutdown_grace_period: default_shutdown_grace_period(),
            kill_timeout: default_kill_timeout(),
        }
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(program) = &self.sidecar_program {
            validate_required_string(
                &program.to_string_lossy(),
                "sidecar_program",
                self.domain_name(),
            )?;
        }

        validate_duration(self.shutdown_grace_period, "shutdown_grace_period", self.domain_name())?;
        validate_duration(self.kill_timeout, "kill_timeout", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}

fn default_sidecar_args() -> Vec<String> {
    vec!["--sidecar".to_string()]
}

fn default_shutdown_grace_period() -> Duration {
    Duration::from_secs(2)
}

fn default_kill_timeout() -> Duration {
    Duration::from_secs(1)
}
