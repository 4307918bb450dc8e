//! Chained worksheet execution
//!
//! Steps run in chain order. Before each step its inputs are resolved from
//! the explicit values plus every mapping that targets it, reading the
//! outputs recorded for earlier steps. A failed step is never retried.

use calcflow_config::WorkflowSettings;
use calcflow_execution::JobEngine;
use calcflow_ipc::{CalculatePayload, ExportFormat, InputSpec, JsonMap, WorksheetValue};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use validator::{Validate, ValidationError};

use crate::error::OrchestrationError;
use crate::export::{export_active_worksheet, workflow_file_name};
use crate::poll::JobPoller;

/// Routes one step's output into a later step's input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FileMapping {
    #[validate(length(min = 1))]
    pub source_file: String,
    #[validate(length(min = 1))]
    pub source_alias: String,
    #[validate(length(min = 1))]
    pub target_file: String,
    #[validate(length(min = 1))]
    pub target_alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct WorkflowFile {
    #[validate(length(min = 1))]
    pub file_path: String,
    #[serde(default)]
    pub inputs: Vec<InputSpec>,
    #[serde(default)]
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_chain"))]
pub struct WorkflowConfig {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1), nested)]
    pub files: Vec<WorkflowFile>,
    #[serde(default)]
    #[validate(nested)]
    pub mappings: Vec<FileMapping>,
    #[serde(default = "default_true")]
    pub stop_on_error: bool,
    #[serde(default = "default_true")]
    pub export_pdf: bool,
    #[serde(default)]
    pub export_mcdx: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl WorkflowConfig {
    /// Steps in execution order; equal positions keep their declared order
    pub fn ordered_files(&self) -> Vec<&WorkflowFile> {
        let mut files: Vec<&WorkflowFile> = self.files.iter().collect();
        files.sort_by_key(|file| file.position);
        files
    }
}

/// Mappings may only read from a step that runs no later than their target
fn validate_chain(config: &WorkflowConfig) -> Result<(), ValidationError> {
    let order: HashMap<&str, usize> = config
        .ordered_files()
        .into_iter()
        .enumerate()
        .map(|(index, file)| (file.file_path.as_str(), index))
        .collect();

    for mapping in &config.mappings {
        let source = order.get(mapping.source_file.as_str());
        let target = order.get(mapping.target_file.as_str());
        match (source, target) {
            (Some(source), Some(target)) if target >= source => {}
            (Some(_), Some(_)) => {
                return Err(chain_error(format!(
                    "mapping {}:{} -> {}:{} targets an earlier step",
                    mapping.source_file,
                    mapping.source_alias,
                    mapping.target_file,
                    mapping.target_alias
                )))
            }
            (None, _) => {
                return Err(chain_error(format!(
                    "mapping source {} is not a workflow step",
                    mapping.source_file
                )))
            }
            (_, None) => {
                return Err(chain_error(format!(
                    "mapping target {} is not a workflow step",
                    mapping.target_file
                )))
            }
        }
    }
    Ok(())
}

fn chain_error(message: String) -> ValidationError {
    let mut error = ValidationError::new("chain");
    error.message = Some(Cow::Owned(message));
    error
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub config: WorkflowConfig,
    pub status: WorkflowStatus,
    pub current_file_index: usize,
    pub completed_files: Vec<String>,
    /// Outputs of every successful step, keyed by file path
    pub intermediate_results: BTreeMap<String, JsonMap>,
    pub error: Option<String>,
    /// Set by `stop_workflow`; observed before the next step even after a
    /// non-fatal step failure
    #[serde(default)]
    pub stop_requested: bool,
    pub final_results: Option<BTreeMap<String, JsonMap>>,
    pub generated_files: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowState {
    fn new(workflow_id: &str, config: WorkflowConfig) -> Self {
        Self {
            workflow_id: workflow_id.to_string(),
            config,
            status: WorkflowStatus::Pending,
            current_file_index: 0,
            completed_files: Vec::new(),
            intermediate_results: BTreeMap::new(),
            error: None,
            stop_requested: false,
            final_results: None,
            generated_files: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn progress(&self) -> u8 {
        let total = self.config.files.len();
        if total == 0 {
            return 0;
        }
        ((self.current_file_index * 100) / total) as u8
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    /// The routine is still alive, whatever the reported status
    fn is_active(&self) -> bool {
        !self.is_finished()
    }
}

/// Compact status view of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatusReport {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    pub current_file_index: usize,
    pub total_files: usize,
    pub completed_files: Vec<String>,
    pub progress: u8,
    pub error: Option<String>,
    pub generated_files: Vec<PathBuf>,
}

impl From<&WorkflowState> for WorkflowStatusReport {
    fn from(state: &WorkflowState) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            current_file_index: state.current_file_index,
            total_files: state.config.files.len(),
            completed_files: state.completed_files.clone(),
            progress: state.progress(),
            error: state.error.clone(),
            generated_files: state.generated_files.clone(),
        }
    }
}

/// Build a step's inputs: explicit ones first, then mapped upstream outputs.
///
/// A mapping whose source output has not been recorded contributes nothing.
pub fn resolve_inputs(
    file: &WorkflowFile,
    mappings: &[FileMapping],
    intermediate_results: &BTreeMap<String, JsonMap>,
) -> Vec<InputSpec> {
    let mut inputs = file.inputs.clone();

    for mapping in mappings.iter().filter(|m| m.target_file == file.file_path) {
        let value = intermediate_results
            .get(&mapping.source_file)
            .and_then(|outputs| outputs.get(&mapping.source_alias))
            .and_then(WorksheetValue::from_json);

        match value {
            Some(value) => inputs.push(InputSpec::new(&mapping.target_alias, value)),
            None => debug!(
                source_file = %mapping.source_file,
                source_alias = %mapping.source_alias,
                "Mapped output not available, skipping"
            ),
        }
    }

    inputs
}

pub struct WorkflowExecutor {
    engine: Arc<dyn JobEngine>,
    settings: WorkflowSettings,
    workflows: RwLock<HashMap<String, Arc<RwLock<WorkflowState>>>>,
}

impl WorkflowExecutor {
    pub fn new(engine: Arc<dyn JobEngine>, settings: WorkflowSettings) -> Self {
        Self {
            engine,
            settings,
            workflows: RwLock::new(HashMap::new()),
        }
    }

    /// Validate the chain, register it, and launch its routine
    pub async fn submit_workflow(
        &self,
        workflow_id: &str,
        config: WorkflowConfig,
    ) -> Result<String, OrchestrationError> {
        config.validate()?;

        let mut workflows = self.workflows.write().await;
        if let Some(existing) = workflows.get(workflow_id) {
            if existing.read().await.is_active() {
                return Err(OrchestrationError::WorkflowAlreadyRunning(
                    workflow_id.to_string(),
                ));
            }
        }

        info!(
            workflow_id,
            name = %config.name,
            steps = config.files.len(),
            mappings = config.mappings.len(),
            "Submitting workflow"
        );

        let output_dir = config
            .output_dir
            .clone()
            .unwrap_or_else(|| self.settings.default_output_dir.clone());
        let state = Arc::new(RwLock::new(WorkflowState::new(workflow_id, config)));
        workflows.insert(workflow_id.to_string(), Arc::clone(&state));

        let routine = WorkflowRoutine {
            engine: Arc::clone(&self.engine),
            poller: JobPoller::new(self.settings.job_timeout, self.settings.poll_interval),
            output_dir,
            state,
        };
        tokio::spawn(routine.run());
        Ok(workflow_id.to_string())
    }

    pub async fn get_status(&self, workflow_id: &str) -> Option<WorkflowStatusReport> {
        let state = self.workflows.read().await.get(workflow_id).cloned()?;
        let report = WorkflowStatusReport::from(&*state.read().await);
        Some(report)
    }

    /// Full state including intermediate and final results
    pub async fn get_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        let state = self.workflows.read().await.get(workflow_id).cloned()?;
        let snapshot = state.read().await.clone();
        Some(snapshot)
    }

    /// Ask a workflow whose routine is still alive to stop before its next
    /// step.
    ///
    /// Returns false, and changes nothing, once the routine has exited or a
    /// stop was already requested.
    pub async fn stop_workflow(&self, workflow_id: &str) -> bool {
        let Some(state) = self.workflows.read().await.get(workflow_id).cloned() else {
            return false;
        };
        let mut state = state.write().await;
        if !state.is_active() || state.stop_requested {
            return false;
        }
        state.stop_requested = true;
        state.status = WorkflowStatus::Stopped;
        info!(workflow_id, "Workflow stop requested");
        true
    }
}

struct WorkflowRoutine {
    engine: Arc<dyn JobEngine>,
    poller: JobPoller,
    output_dir: PathBuf,
    state: Arc<RwLock<WorkflowState>>,
}

impl WorkflowRoutine {
    async fn run(self) {
        let (workflow_id, config) = {
            let mut state = self.state.write().await;
            if state.status == WorkflowStatus::Pending {
                state.status = WorkflowStatus::Running;
            }
            (state.workflow_id.clone(), state.config.clone())
        };

        let exporting = config.export_pdf || config.export_mcdx;
        let output_dir = if exporting {
            match prepare_output_dir(&self.output_dir).await {
                Ok(dir) => Some(dir),
                Err(e) => {
                    self.fail(&format!(
                        "Cannot create output directory {}: {}",
                        self.output_dir.display(),
                        e
                    ))
                    .await;
                    self.finish(&workflow_id).await;
                    return;
                }
            }
        } else {
            None
        };

        for (index, file) in config.ordered_files().into_iter().enumerate() {
            let intermediate = {
                let state = self.state.read().await;
                if state.stop_requested {
                    info!(workflow_id = %workflow_id, step = index + 1, "Workflow stopped");
                    break;
                }
                state.intermediate_results.clone()
            };

            let inputs = resolve_inputs(file, &config.mappings, &intermediate);
            info!(
                workflow_id = %workflow_id,
                step = index + 1,
                file = %file.file_path,
                inputs = inputs.len(),
                "Running workflow step"
            );

            let payload = CalculatePayload {
                path: Some(file.file_path.clone()),
                inputs,
            };
            match self.poller.run(self.engine.as_ref(), payload).await {
                Ok(outputs) => {
                    {
                        let mut state = self.state.write().await;
                        state
                            .intermediate_results
                            .insert(file.file_path.clone(), outputs);
                        state.completed_files.push(file.file_path.clone());
                        state.current_file_index += 1;
                    }
                    if let Some(dir) = &output_dir {
                        self.export_step(&config, index + 1, &file.file_path, dir)
                            .await;
                    }
                }
                Err(e) => {
                    warn!(workflow_id = %workflow_id, step = index + 1, error = %e, "Workflow step failed");
                    self.fail(&e.to_string()).await;
                    if config.stop_on_error {
                        break;
                    }
                }
            }
        }

        {
            let mut state = self.state.write().await;
            if state.status == WorkflowStatus::Running {
                state.status = WorkflowStatus::Completed;
                state.final_results = Some(state.intermediate_results.clone());
            }
        }
        self.finish(&workflow_id).await;
    }

    async fn export_step(
        &self,
        config: &WorkflowConfig,
        step_number: usize,
        file_path: &str,
        output_dir: &Path,
    ) {
        let mut formats = Vec::new();
        if config.export_pdf {
            formats.push(ExportFormat::Pdf);
        }
        if config.export_mcdx {
            formats.push(ExportFormat::Mcdx);
        }

        for format in formats {
            let target =
                output_dir.join(workflow_file_name(&config.name, step_number, file_path, format));
            match export_active_worksheet(&self.poller, self.engine.as_ref(), &target, format).await
            {
                Ok(()) => self.state.write().await.generated_files.push(target),
                Err(e) => warn!(
                    step = step_number,
                    file = %file_path,
                    %format,
                    error = %e,
                    "Workflow export failed"
                ),
            }
        }
    }

    async fn fail(&self, message: &str) {
        let mut state = self.state.write().await;
        // A stop request wins over later failures
        if !state.stop_requested {
            state.status = WorkflowStatus::Failed;
        }
        state.error = Some(message.to_string());
    }

    async fn finish(&self, workflow_id: &str) {
        let mut state = self.state.write().await;
        state.finished_at = Some(Utc::now());
        info!(
            workflow_id,
            status = ?state.status,
            completed = state.completed_files.len(),
            "Workflow finished"
        );
    }
}

async fn prepare_output_dir(dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::canonicalize(dir).await
}
