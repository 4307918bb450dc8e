//! `calcflow batch`

use anyhow::{anyhow, bail, Context, Result};
use calcflow_execution::EngineSupervisor;
use calcflow_ipc::JsonMap;
use calcflow_orchestration::batch::PATH_FIELD;
use calcflow_orchestration::{BatchExecutor, BatchRequest, BatchState, BatchStatus};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{print_json, CommandContext};

pub struct BatchArgs {
    pub rows: PathBuf,
    pub output_dir: PathBuf,
    pub file: Option<String>,
    pub batch_id: Option<String>,
    pub export_pdf: bool,
    pub export_mcdx: bool,
}

/// Read the rows file and give every row without a `path` the default worksheet.
///
/// Each row must carry its worksheet so a retry after an engine restart can
/// reopen it.
pub fn read_rows(path: &Path, default_file: Option<&str>) -> Result<Vec<JsonMap>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rows from {}", path.display()))?;
    let mut rows: Vec<JsonMap> = serde_json::from_str(&content)
        .with_context(|| format!("{} must be a JSON array of objects", path.display()))?;

    if let Some(file) = default_file {
        for row in &mut rows {
            row.entry(PATH_FIELD)
                .or_insert_with(|| JsonValue::String(file.to_string()));
        }
    }
    Ok(rows)
}

pub async fn handle_batch(ctx: &CommandContext, args: BatchArgs) -> Result<()> {
    let rows = read_rows(&args.rows, args.file.as_deref())?;
    let request = BatchRequest {
        batch_id: args
            .batch_id
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        rows,
        output_dir: args.output_dir,
        export_pdf: args.export_pdf,
        export_mcdx: args.export_mcdx,
    };
    info!(batch_id = %request.batch_id, rows = request.rows.len(), "Starting batch");

    let engine = ctx.start_engine().await?;
    let outcome = run_batch(ctx, Arc::clone(&engine), request).await;
    engine.stop().await?;

    let state = outcome?;
    print_json(&state)?;
    if state.status == BatchStatus::Failed {
        bail!(
            "Batch {} failed: {}",
            state.id,
            state.error.as_deref().unwrap_or("no message")
        );
    }
    Ok(())
}

async fn run_batch(
    ctx: &CommandContext,
    engine: Arc<EngineSupervisor>,
    request: BatchRequest,
) -> Result<BatchState> {
    ctx.connect(&engine).await?;

    let batch_id = request.batch_id.clone();
    let executor = BatchExecutor::new(engine, ctx.config.orchestration.batch.clone());
    executor.start_batch(request).await?;

    let mut ticks = tokio::time::interval(ctx.config.orchestration.batch.poll_interval);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            _ = ticks.tick() => {
                let state = executor
                    .get_status(&batch_id)
                    .await
                    .ok_or_else(|| anyhow!("Batch {} disappeared", batch_id))?;
                if state.is_finished() {
                    return Ok(state);
                }
                debug!(batch_id = %batch_id, progress = state.progress(), "Batch progress");
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                warn!(batch_id = %batch_id, "Interrupted, stopping after the current row");
                executor.stop_batch(&batch_id).await;
            }
        }
    }
}
