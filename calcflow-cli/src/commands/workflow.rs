//! `calcflow workflow`

use anyhow::{anyhow, bail, Context, Result};
use calcflow_execution::EngineSupervisor;
use calcflow_orchestration::{WorkflowConfig, WorkflowExecutor, WorkflowState, WorkflowStatus};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{print_json, CommandContext};

/// Load a workflow definition; JSON is accepted as a subset of YAML
pub fn read_definition(path: &Path) -> Result<WorkflowConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow definition {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("Invalid workflow definition {}", path.display()))
}

pub async fn handle_workflow(
    ctx: &CommandContext,
    definition: &Path,
    workflow_id: Option<String>,
) -> Result<()> {
    let config = read_definition(definition)?;
    let workflow_id = workflow_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    info!(workflow_id = %workflow_id, name = %config.name, "Starting workflow");

    let engine = ctx.start_engine().await?;
    let outcome = run_workflow(ctx, Arc::clone(&engine), &workflow_id, config).await;
    engine.stop().await?;

    let state = outcome?;
    print_json(&state)?;
    if state.status == WorkflowStatus::Failed {
        bail!(
            "Workflow {} failed: {}",
            state.workflow_id,
            state.error.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

async fn run_workflow(
    ctx: &CommandContext,
    engine: Arc<EngineSupervisor>,
    workflow_id: &str,
    config: WorkflowConfig,
) -> Result<WorkflowState> {
    ctx.connect(&engine).await?;

    let settings = ctx.config.orchestration.workflow.clone();
    let poll_interval = settings.poll_interval;
    let executor = WorkflowExecutor::new(engine, settings);
    executor.submit_workflow(workflow_id, config).await?;

    let mut ticks = tokio::time::interval(poll_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let state = executor
                    .get_state(workflow_id)
                    .await
                    .ok_or_else(|| anyhow!("Workflow {} disappeared", workflow_id))?;
                if state.is_finished() {
                    return Ok(state);
                }
                debug!(workflow_id, progress = state.progress(), "Workflow progress");
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!(workflow_id, "Interrupted, stopping before the next step");
                executor.stop_workflow(workflow_id).await;
            }
        }
    }
}
