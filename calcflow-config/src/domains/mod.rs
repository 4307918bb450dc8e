//! Domain-specific configuration modules

pub mod engine;
pub mod logging;
pub mod orchestration;
pub mod sidecar;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Calcflow configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CalcflowConfig {
    /// Sidecar process supervision
    #[serde(default)]
    pub engine: engine::EngineConfig,

    /// Settings read by the sidecar process itself
    #[serde(default)]
    pub sidecar: sidecar::SidecarConfig,

    /// Batch and workflow execution
    #[serde(default)]
    pub orchestration: orchestration::OrchestrationConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl CalcflowConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.sidecar.validate()?;
        self.orchestration.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = CalcflowConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
