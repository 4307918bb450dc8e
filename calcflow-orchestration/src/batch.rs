//! Parameter sweeps over one worksheet
//!
//! Rows run strictly one after another: the worksheet service holds a single
//! active session. A failed row is retried after a full engine restart until
//! its retry budget is spent, then recorded as failed. Failed rows still
//! count towards progress.

use calcflow_config::BatchSettings;
use calcflow_execution::JobEngine;
use calcflow_ipc::{CalculatePayload, ExportFormat, InputSpec, JobCommand, JsonMap};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::OrchestrationError;
use crate::export::{batch_file_name, export_active_worksheet, worksheet_stem};
use crate::poll::JobPoller;

/// Row field naming the worksheet instead of an input
pub const PATH_FIELD: &str = "path";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub batch_id: String,
    #[serde(alias = "inputs")]
    pub rows: Vec<JsonMap>,
    pub output_dir: PathBuf,
    #[serde(default = "default_export_pdf")]
    pub export_pdf: bool,
    #[serde(default)]
    pub export_mcdx: bool,
}

fn default_export_pdf() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Running,
    Stopped,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RowStage {
    #[serde(rename = "Calculating")]
    Calculating,
    #[serde(rename = "Exporting PDF")]
    ExportingPdf,
    #[serde(rename = "Exporting MCDX")]
    ExportingMcdx,
    #[serde(rename = "Restarting engine")]
    RestartingEngine,
    #[serde(rename = "Done")]
    Done,
    #[serde(rename = "Failed")]
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRow {
    pub row: usize,
    pub status: RowStatus,
    pub stage: RowStage,
    #[serde(default)]
    pub data: JsonMap,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mcdx: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchRow {
    fn started(row: usize) -> Self {
        Self {
            row,
            status: RowStatus::Running,
            stage: RowStage::Calculating,
            data: JsonMap::new(),
            pdf: None,
            mcdx: None,
            error: None,
        }
    }
}

/// Snapshot of a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchState {
    pub id: String,
    pub total: usize,
    pub completed: usize,
    pub status: BatchStatus,
    pub results: Vec<BatchRow>,
    pub generated_files: Vec<PathBuf>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BatchState {
    fn new(id: &str, total: usize) -> Self {
        Self {
            id: id.to_string(),
            total,
            completed: 0,
            status: BatchStatus::Running,
            results: Vec::with_capacity(total),
            generated_files: Vec::new(),
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Percentage of rows finished, failed rows included
    pub fn progress(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        ((self.completed * 100) / self.total) as u8
    }

    /// True once the batch routine has exited
    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    fn row_mut(&mut self, index: usize) -> Option<&mut BatchRow> {
        self.results.iter_mut().rev().find(|row| row.row == index)
    }
}

/// Split a row into its worksheet path and input assignments
pub fn row_inputs(row: &JsonMap) -> (Option<String>, Vec<InputSpec>) {
    let path = row
        .get(PATH_FIELD)
        .and_then(JsonValue::as_str)
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string);

    let inputs = row
        .iter()
        .filter(|(alias, _)| alias.as_str() != PATH_FIELD)
        .filter_map(|(alias, entry)| InputSpec::from_entry(alias, entry))
        .collect();

    (path, inputs)
}

pub struct BatchExecutor {
    engine: Arc<dyn JobEngine>,
    settings: BatchSettings,
    batches: RwLock<HashMap<String, Arc<RwLock<BatchState>>>>,
}

impl BatchExecutor {
    pub fn new(engine: Arc<dyn JobEngine>, settings: BatchSettings) -> Self {
        Self {
            engine,
            settings,
            batches: RwLock::new(HashMap::new()),
        }
    }

    /// Register the batch and launch its routine; returns immediately
    pub async fn start_batch(&self, request: BatchRequest) -> Result<(), OrchestrationError> {
        let mut batches = self.batches.write().await;
        if let Some(existing) = batches.get(&request.batch_id) {
            if !existing.read().await.is_finished() {
                return Err(OrchestrationError::BatchAlreadyRunning(request.batch_id));
            }
        }

        let state = Arc::new(RwLock::new(BatchState::new(
            &request.batch_id,
            request.rows.len(),
        )));
        batches.insert(request.batch_id.clone(), Arc::clone(&state));

        info!(
            batch_id = %request.batch_id,
            rows = request.rows.len(),
            output_dir = %request.output_dir.display(),
            "Starting batch"
        );

        let routine = BatchRoutine {
            engine: Arc::clone(&self.engine),
            poller: JobPoller::new(self.settings.job_timeout, self.settings.poll_interval),
            max_retries: self.settings.max_retries,
            state,
            request,
        };
        tokio::spawn(routine.run());
        Ok(())
    }

    pub async fn get_status(&self, batch_id: &str) -> Option<BatchState> {
        let state = self.batches.read().await.get(batch_id).cloned()?;
        let snapshot = state.read().await.clone();
        Some(snapshot)
    }

    /// Ask a running batch to stop before its next row.
    ///
    /// Returns false, and changes nothing, if the batch is unknown or no
    /// longer running.
    pub async fn stop_batch(&self, batch_id: &str) -> bool {
        let Some(state) = self.batches.read().await.get(batch_id).cloned() else {
            return false;
        };
        let mut state = state.write().await;
        if state.status != BatchStatus::Running {
            return false;
        }
        state.status = BatchStatus::Stopped;
        info!(batch_id, "Batch stop requested");
        true
    }
}

struct BatchRoutine {
    engine: Arc<dyn JobEngine>,
    poller: JobPoller,
    max_retries: u32,
    state: Arc<RwLock<BatchState>>,
    request: BatchRequest,
}

impl BatchRoutine {
    async fn run(self) {
        let batch_id = self.request.batch_id.as_str();

        let output_dir = match prepare_output_dir(&self.request.output_dir).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(batch_id, error = %e, "Cannot prepare output directory");
                let mut state = self.state.write().await;
                state.status = BatchStatus::Failed;
                state.error = Some(format!(
                    "Cannot create output directory {}: {}",
                    self.request.output_dir.display(),
                    e
                ));
                state.finished_at = Some(Utc::now());
                return;
            }
        };

        for (index, row) in self.request.rows.iter().enumerate() {
            if self.state.read().await.status == BatchStatus::Stopped {
                info!(batch_id, row = index, "Batch stopped");
                break;
            }
            self.process_row(index, row, &output_dir).await;
        }

        let mut state = self.state.write().await;
        if state.status == BatchStatus::Running {
            state.status = BatchStatus::Completed;
        }
        state.finished_at = Some(Utc::now());
        info!(
            batch_id,
            status = ?state.status,
            completed = state.completed,
            total = state.total,
            "Batch finished"
        );
    }

    async fn process_row(&self, index: usize, row: &JsonMap, output_dir: &Path) {
        let batch_id = self.request.batch_id.as_str();
        let (path, inputs) = row_inputs(row);
        self.state.write().await.results.push(BatchRow::started(index));

        let mut retries_left = self.max_retries;
        loop {
            self.set_stage(index, RowStage::Calculating).await;
            debug!(batch_id, row = index, inputs = inputs.len(), "Calculating row");

            let payload = CalculatePayload {
                path: path.clone(),
                inputs: inputs.clone(),
            };
            match self.poller.run(self.engine.as_ref(), payload).await {
                Ok(data) => {
                    self.finish_row(index, path.as_deref(), &inputs, data, output_dir)
                        .await;
                    return;
                }
                Err(e) if retries_left > 0 => {
                    retries_left -= 1;
                    warn!(batch_id, row = index, error = %e, "Row failed, restarting engine and retrying");
                    self.set_stage(index, RowStage::RestartingEngine).await;
                    self.recover().await;
                }
                Err(e) => {
                    warn!(batch_id, row = index, error = %e, "Row failed");
                    let mut state = self.state.write().await;
                    if let Some(entry) = state.row_mut(index) {
                        entry.status = RowStatus::Failed;
                        entry.stage = RowStage::Failed;
                        entry.error = Some(e.to_string());
                    }
                    state.completed += 1;
                    return;
                }
            }
        }
    }

    /// Restart the engine and reconnect; failures here surface on the retry
    async fn recover(&self) {
        if let Err(e) = self.engine.restart().await {
            warn!(batch_id = %self.request.batch_id, error = %e, "Engine restart failed");
            return;
        }
        if let Err(e) = self
            .poller
            .run_command(self.engine.as_ref(), JobCommand::Connect, JsonMap::new())
            .await
        {
            warn!(batch_id = %self.request.batch_id, error = %e, "Reconnect after restart failed");
        }
    }

    async fn finish_row(
        &self,
        index: usize,
        path: Option<&str>,
        inputs: &[InputSpec],
        data: JsonMap,
        output_dir: &Path,
    ) {
        if let Some(entry) = self.state.write().await.row_mut(index) {
            entry.data = data;
        }

        let stem = worksheet_stem(path);
        let mut formats = Vec::new();
        if self.request.export_pdf {
            formats.push((ExportFormat::Pdf, RowStage::ExportingPdf));
        }
        if self.request.export_mcdx {
            formats.push((ExportFormat::Mcdx, RowStage::ExportingMcdx));
        }

        let mut export_errors = Vec::new();
        for (format, stage) in formats {
            self.set_stage(index, stage).await;
            let target = output_dir.join(batch_file_name(&stem, inputs, index, format));

            match export_active_worksheet(&self.poller, self.engine.as_ref(), &target, format).await
            {
                Ok(()) => {
                    let mut state = self.state.write().await;
                    if let Some(entry) = state.row_mut(index) {
                        match format {
                            ExportFormat::Pdf => entry.pdf = Some(target.clone()),
                            ExportFormat::Mcdx => entry.mcdx = Some(target.clone()),
                        }
                    }
                    state.generated_files.push(target);
                }
                Err(e) => {
                    warn!(batch_id = %self.request.batch_id, row = index, %format, error = %e, "Export failed");
                    export_errors.push(format!("{} export failed: {}", format, e));
                }
            }
        }

        let mut state = self.state.write().await;
        if let Some(entry) = state.row_mut(index) {
            entry.status = RowStatus::Success;
            entry.stage = RowStage::Done;
            if !export_errors.is_empty() {
                entry.error = Some(export_errors.join("; "));
            }
        }
        state.completed += 1;
    }

    async fn set_stage(&self, index: usize, stage: RowStage) {
        if let Some(entry) = self.state.write().await.row_mut(index) {
            entry.stage = stage;
        }
    }
}

async fn prepare_output_dir(dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::canonicalize(dir).await
}
