//! Single-job commands

use anyhow::{anyhow, Context, Result};
use calcflow_execution::EngineSupervisor;
use calcflow_ipc::{JobResult, JsonMap, MetadataPayload};
use serde_json::Value as JsonValue;
use std::path::Path;
use tracing::info;

use super::{print_json, CommandContext};

/// Parse `--payload`; no payload means an empty object
pub fn parse_payload(payload: Option<&str>) -> Result<JsonMap> {
    let Some(text) = payload else {
        return Ok(JsonMap::new());
    };
    match serde_json::from_str(text).context("Failed to parse payload JSON")? {
        JsonValue::Object(map) => Ok(map),
        other => Err(anyhow!("Payload must be a JSON object, got {}", other)),
    }
}

/// Submit one job to a fresh engine and print its raw result
pub async fn handle_job(ctx: &CommandContext, command: &str, payload: Option<&str>) -> Result<()> {
    let payload = parse_payload(payload)?;
    info!(command, "Submitting job");

    let engine = ctx.start_engine().await?;
    let outcome = submit_and_wait(ctx, &engine, command, payload).await;
    engine.stop().await?;

    let result = outcome?;
    print_json(&result)?;
    if result.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "Job {} failed: {}",
            result.job_id,
            result.error_message.as_deref().unwrap_or("no message")
        ))
    }
}

async fn submit_and_wait(
    ctx: &CommandContext,
    engine: &EngineSupervisor,
    command: &str,
    payload: JsonMap,
) -> Result<JobResult> {
    let job_id = engine
        .submit(command, payload)
        .await
        .context("Failed to submit job")?;
    let result = ctx.poller().wait(engine, &job_id).await?;
    Ok(result)
}

/// Print the declared inputs and outputs of a worksheet
pub async fn handle_metadata(ctx: &CommandContext, file: &Path) -> Result<()> {
    let payload = MetadataPayload {
        path: Some(file.display().to_string()),
    };

    let engine = ctx.start_engine().await?;
    let outcome = ctx
        .poller()
        .run(engine.as_ref(), payload)
        .await
        .with_context(|| format!("Failed to read metadata of {}", file.display()));
    engine.stop().await?;

    print_json(&outcome?)
}
