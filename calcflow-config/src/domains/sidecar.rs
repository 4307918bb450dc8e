//! Settings read by the sidecar process

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, Validatable};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// How long one receive blocks before the loop ticks again
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_receive_timeout")]
    pub receive_timeout: Duration,

    /// Pause after a channel-level failure before reading again
    #[serde(with = "crate::domains::utils::serde_duration_ms", default = "default_error_backoff")]
    pub error_backoff: Duration,

    /// Lowest automation target major version that can export PDF
    #[serde(default = "default_min_pdf_major_version")]
    pub min_pdf_major_version: u32,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            receive_timeout: default_receive_timeout(),
            error_backoff: default_error_backoff(),
            min_pdf_major_version: default_min_pdf_major_version(),
        }
    }
}

impl Validatable for SidecarConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.receive_timeout, "receive_timeout", self.domain_name())?;
        validate_duration(self.error_backoff, "error_backoff", self.domain_name())?;
        validate_positive(
            self.min_pdf_major_version,
            "min_pdf_major_version",
            self.domain_name(),
        )?;
        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "sidecar"
    }
}

fn default_receive_timeout() -> Duration {
    Duration::from_millis(500)
}

fn default_error_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_min_pdf_major_version() -> u32 {
    5
}
