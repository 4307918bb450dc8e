//! Configuration loading and environment variable handling

use crate::domains::CalcflowConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "CALCFLOW".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<CalcflowConfig> {
        let path = path.as_ref();
        let content =
            std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
                path: path.to_path_buf(),
                source,
            })?;
        let mut config: CalcflowConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<CalcflowConfig> {
        let mut config = CalcflowConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<CalcflowConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut CalcflowConfig) -> ConfigResult<()> {
        self.apply_engine_overrides(&mut config.engine)?;
        self.apply_orchestration_overrides(&mut config.orchestration)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    fn apply_engine_overrides(
        &self,
        config: &mut crate::domains::engine::EngineConfig,
    ) -> ConfigResult<()> {
        if let Ok(program) = self.get_env_var("SIDECAR_PROGRAM") {
            config.sidecar_program = Some(PathBuf::from(program));
        }

        if let Ok(grace) = self.get_env_var("ENGINE_SHUTDOWN_GRACE_MS") {
            config.shutdown_grace_period = Duration::from_millis(self.parse_var(
                "ENGINE_SHUTDOWN_GRACE_MS",
                &grace,
            )?);
        }

        Ok(())
    }

    fn apply_orchestration_overrides(
        &self,
        config: &mut crate::domains::orchestration::OrchestrationConfig,
    ) -> ConfigResult<()> {
        if let Ok(timeout) = self.get_env_var("BATCH_JOB_TIMEOUT_SECONDS") {
            config.batch.job_timeout =
                Duration::from_secs(self.parse_var("BATCH_JOB_TIMEOUT_SECONDS", &timeout)?);
        }

        if let Ok(retries) = self.get_env_var("BATCH_MAX_RETRIES") {
            config.batch.max_retries = self.parse_var("BATCH_MAX_RETRIES", &retries)?;
        }

        if let Ok(timeout) = self.get_env_var("WORKFLOW_JOB_TIMEOUT_SECONDS") {
            config.workflow.job_timeout =
                Duration::from_secs(self.parse_var("WORKFLOW_JOB_TIMEOUT_SECONDS", &timeout)?);
        }

        if let Ok(dir) = self.get_env_var("WORKFLOW_OUTPUT_DIR") {
            config.workflow.default_output_dir = PathBuf::from(dir);
        }

        Ok(())
    }

    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = self.parse_var("LOG_LEVEL", &log_level)?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = self.parse_var("LOG_FORMAT", &format)?;
        }

        Ok(())
    }

    fn parse_var<T>(&self, name: &str, raw: &str) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        raw.trim().parse().map_err(|e: T::Err| ConfigError::EnvError {
            var: self.var_name(name),
            message: format!("{:?}: {}", raw, e),
        })
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}_{}", self.prefix, name)
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(self.var_name(name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
