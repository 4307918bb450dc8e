//! CLI command implementations

pub mod batch;
pub mod config;
pub mod job;
pub mod workflow;

use anyhow::{Context, Result};
use calcflow_config::{CalcflowConfig, EngineConfig};
use calcflow_execution::EngineSupervisor;
use calcflow_ipc::{JobCommand, JsonMap};
use calcflow_orchestration::JobPoller;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub use batch::{handle_batch, BatchArgs};
pub use config::{handle_config_generate, handle_config_show, handle_config_validate};
pub use job::{handle_job, handle_metadata};
pub use workflow::handle_workflow;

/// What every engine-backed command needs from the command line
pub struct CommandContext {
    pub config: CalcflowConfig,
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl CommandContext {
    /// Engine settings for this invocation.
    ///
    /// When the sidecar is this same executable it is handed the same
    /// `--config` and `--log-level` so both processes agree on settings.
    pub fn engine_config(&self) -> EngineConfig {
        let mut engine = self.config.engine.clone();
        if engine.sidecar_program.is_none() {
            if let Some(path) = &self.config_path {
                engine.sidecar_args.push("--config".to_string());
                engine.sidecar_args.push(path.display().to_string());
            }
            if let Some(level) = &self.log_level {
                engine.sidecar_args.push("--log-level".to_string());
                engine.sidecar_args.push(level.clone());
            }
        }
        engine
    }

    pub async fn start_engine(&self) -> Result<Arc<EngineSupervisor>> {
        let engine = Arc::new(EngineSupervisor::new(self.engine_config()));
        engine
            .start()
            .await
            .context("Failed to start the worksheet engine")?;
        info!(pid = ?engine.pid().await, "Worksheet engine started");
        Ok(engine)
    }

    /// Poller for one-off jobs, using the batch job deadline
    pub fn poller(&self) -> JobPoller {
        let batch = &self.config.orchestration.batch;
        JobPoller::new(batch.job_timeout, batch.poll_interval)
    }

    /// Open the session with the worksheet service
    pub async fn connect(&self, engine: &EngineSupervisor) -> Result<()> {
        self.poller()
            .run_command(engine, JobCommand::Connect, JsonMap::new())
            .await
            .context("Failed to connect to the worksheet service")?;
        Ok(())
    }
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let formatted =
        serde_json::to_string_pretty(value).context("Failed to format result as JSON")?;
    println!("{}", formatted);
    Ok(())
}
