//! Workflow executor behaviour against a scripted engine

mod common;

use calcflow_config::WorkflowSettings;
use calcflow_ipc::{InputSpec, JsonMap, WorksheetValue};
use calcflow_orchestration::{
    FileMapping, OrchestrationError, WorkflowConfig, WorkflowExecutor, WorkflowFile,
    WorkflowState, WorkflowStatus,
};
use common::{echo_outputs, eventually, input_value, Reply, ScriptedEngine, FAST_POLL, FAST_TIMEOUT};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn settings(output_dir: &Path) -> WorkflowSettings {
    WorkflowSettings {
        job_timeout: FAST_TIMEOUT,
        poll_interval: FAST_POLL,
        default_output_dir: output_dir.to_path_buf(),
    }
}

fn step(path: &str, position: u32, inputs: Vec<InputSpec>) -> WorkflowFile {
    WorkflowFile {
        file_path: path.to_string(),
        inputs,
        position,
    }
}

fn mapping(source: &str, source_alias: &str, target: &str, target_alias: &str) -> FileMapping {
    FileMapping {
        source_file: source.to_string(),
        source_alias: source_alias.to_string(),
        target_file: target.to_string(),
        target_alias: target_alias.to_string(),
    }
}

fn chain(files: Vec<WorkflowFile>, mappings: Vec<FileMapping>) -> WorkflowConfig {
    WorkflowConfig {
        name: "Frame".to_string(),
        files,
        mappings,
        stop_on_error: true,
        export_pdf: false,
        export_mcdx: false,
        output_dir: None,
    }
}

fn number(alias: &str, value: f64) -> InputSpec {
    InputSpec::new(alias, WorksheetValue::Number(value))
}

async fn finished(executor: &WorkflowExecutor, workflow_id: &str) -> WorkflowState {
    eventually(|| async move {
        executor
            .get_state(workflow_id)
            .await
            .filter(|state| state.is_finished())
    })
    .await
}

/// Fails every calculation of `failing`, echoes the rest
fn failing_on(failing: &'static str) -> ScriptedEngine {
    ScriptedEngine::new(move |command, payload| match command {
        "calculate_job" if payload["path"] == failing => {
            Reply::Error(format!("Failed to open {}", failing))
        }
        "calculate_job" => Reply::Success(echo_outputs(payload)),
        _ => Reply::Success(JsonMap::new()),
    })
}

#[tokio::test]
async fn test_outputs_flow_into_downstream_inputs() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(
        vec![
            step("/sheets/loads.mcdx", 0, vec![number("Stress", 12.5)]),
            step("/sheets/beam.mcdx", 1, vec![number("Width", 0.3)]),
        ],
        vec![mapping("/sheets/loads.mcdx", "Stress", "/sheets/beam.mcdx", "Load")],
    );
    let id = executor.submit_workflow("w1", config).await.unwrap();
    assert_eq!(id, "w1");
    let state = finished(&executor, "w1").await;

    assert_eq!(state.status, WorkflowStatus::Completed);
    assert_eq!(state.current_file_index, 2);
    assert_eq!(state.completed_files, vec!["/sheets/loads.mcdx", "/sheets/beam.mcdx"]);

    let calculations = engine.submissions_of("calculate_job");
    assert_eq!(calculations.len(), 2);
    assert_eq!(calculations[1].payload["path"], json!("/sheets/beam.mcdx"));
    assert_eq!(input_value(&calculations[1].payload, "Width"), Some(json!(0.3)));
    assert_eq!(input_value(&calculations[1].payload, "Load"), Some(json!(12.5)));

    let final_results = state.final_results.unwrap();
    assert_eq!(final_results["/sheets/beam.mcdx"]["Load"], json!(12.5));

    let report = executor.get_status("w1").await.unwrap();
    assert_eq!(report.progress, 100);
    assert_eq!(report.total_files, 2);
}

#[tokio::test]
async fn test_steps_run_in_position_order() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(
        vec![
            step("/sheets/c.mcdx", 2, Vec::new()),
            step("/sheets/a.mcdx", 0, Vec::new()),
            step("/sheets/b.mcdx", 1, Vec::new()),
        ],
        Vec::new(),
    );
    executor.submit_workflow("w2", config).await.unwrap();
    finished(&executor, "w2").await;

    let paths: Vec<String> = engine
        .submissions_of("calculate_job")
        .iter()
        .map(|s| s.payload["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["/sheets/a.mcdx", "/sheets/b.mcdx", "/sheets/c.mcdx"]);
}

#[tokio::test]
async fn test_stop_on_error_halts_chain() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(failing_on("/sheets/a.mcdx"));
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(
        vec![step("/sheets/a.mcdx", 0, Vec::new()), step("/sheets/b.mcdx", 1, Vec::new())],
        Vec::new(),
    );
    executor.submit_workflow("w3", config).await.unwrap();
    let state = finished(&executor, "w3").await;

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("Failed to open /sheets/a.mcdx"));
    assert!(state.final_results.is_none());
    assert_eq!(engine.submissions_of("calculate_job").len(), 1);
    assert_eq!(engine.restarts(), 0);
}

#[tokio::test]
async fn test_continue_on_error_attempts_remaining_steps() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(failing_on("/sheets/a.mcdx"));
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let mut config = chain(
        vec![step("/sheets/a.mcdx", 0, Vec::new()), step("/sheets/b.mcdx", 1, Vec::new())],
        vec![mapping("/sheets/a.mcdx", "Stress", "/sheets/b.mcdx", "Load")],
    );
    config.stop_on_error = false;
    executor.submit_workflow("w4", config).await.unwrap();
    let state = finished(&executor, "w4").await;

    assert_eq!(state.status, WorkflowStatus::Failed);
    assert_eq!(state.completed_files, vec!["/sheets/b.mcdx"]);
    assert_eq!(state.current_file_index, 1);

    let calculations = engine.submissions_of("calculate_job");
    assert_eq!(calculations.len(), 2);
    // The failed step recorded no outputs, so the mapping contributes nothing
    assert_eq!(input_value(&calculations[1].payload, "Load"), None);
}

#[tokio::test]
async fn test_missing_mapped_output_is_not_a_failure() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(
        vec![
            step("/sheets/a.mcdx", 0, vec![number("Stress", 1.0)]),
            step("/sheets/b.mcdx", 1, Vec::new()),
        ],
        vec![mapping("/sheets/a.mcdx", "Deflection", "/sheets/b.mcdx", "Limit")],
    );
    executor.submit_workflow("w5", config).await.unwrap();
    let state = finished(&executor, "w5").await;

    assert_eq!(state.status, WorkflowStatus::Completed);
    let calculations = engine.submissions_of("calculate_job");
    assert_eq!(calculations[1].payload["inputs"], json!([]));
}

#[tokio::test]
async fn test_exports_use_step_numbers() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let mut config = chain(
        vec![step("/sheets/loads.mcdx", 0, Vec::new()), step("/sheets/beam.mcdx", 1, Vec::new())],
        Vec::new(),
    );
    config.name = "Frame check".to_string();
    config.export_pdf = true;
    config.export_mcdx = true;
    config.output_dir = Some(dir.path().join("chain"));
    executor.submit_workflow("w6", config).await.unwrap();
    let state = finished(&executor, "w6").await;

    let names: Vec<String> = state
        .generated_files
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(
        names,
        vec![
            "Frame_check_Step1_loads.pdf",
            "Frame_check_Step1_loads.mcdx",
            "Frame_check_Step2_beam.pdf",
            "Frame_check_Step2_beam.mcdx",
        ]
    );
    assert!(dir.path().join("chain").is_dir());
    assert_eq!(engine.submissions_of("save_as").len(), 4);
}

#[tokio::test]
async fn test_stop_before_first_step() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(vec![step("/sheets/a.mcdx", 0, Vec::new())], Vec::new());
    executor.submit_workflow("w7", config).await.unwrap();
    assert!(executor.stop_workflow("w7").await);

    let state = finished(&executor, "w7").await;
    assert_eq!(state.status, WorkflowStatus::Stopped);
    assert!(engine.submissions().is_empty());

    // Stopping again is a no-op
    assert!(!executor.stop_workflow("w7").await);
    assert!(!executor.stop_workflow("unknown").await);
}

#[tokio::test]
async fn test_invalid_workflow_is_rejected_before_running() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(
        vec![step("/sheets/a.mcdx", 0, Vec::new()), step("/sheets/b.mcdx", 1, Vec::new())],
        vec![mapping("/sheets/b.mcdx", "Stress", "/sheets/a.mcdx", "Load")],
    );
    let err = executor.submit_workflow("w8", config).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::InvalidWorkflow(_)));
    assert!(executor.get_status("w8").await.is_none());
    assert!(engine.submissions().is_empty());
}

#[tokio::test]
async fn test_failed_step_times_out_without_retry() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|_, _| Reply::Hang));
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(vec![step("/sheets/a.mcdx", 0, Vec::new())], Vec::new());
    executor.submit_workflow("w9", config.clone()).await.unwrap();

    let err = executor.submit_workflow("w9", config).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::WorkflowAlreadyRunning(_)));

    let state = finished(&executor, "w9").await;
    assert_eq!(state.status, WorkflowStatus::Failed);
    assert!(state.error.unwrap().contains("Job timeout"));
    assert_eq!(engine.restarts(), 0);
    assert_eq!(engine.submissions_of("calculate_job").len(), 1);
}

/// Fails `/a`, never answers `/b`, echoes everything else
fn failing_then_hanging() -> ScriptedEngine {
    ScriptedEngine::new(|command, payload| match command {
        "calculate_job" if payload["path"] == "/a" => Reply::Error("Failed to open /a".to_string()),
        "calculate_job" if payload["path"] == "/b" => Reply::Hang,
        "calculate_job" => Reply::Success(echo_outputs(payload)),
        _ => Reply::Success(JsonMap::new()),
    })
}

async fn wait_for_calculations(engine: &ScriptedEngine, count: usize) {
    eventually(|| async move {
        (engine.submissions_of("calculate_job").len() >= count).then_some(())
    })
    .await
}

fn calculated_paths(engine: &ScriptedEngine) -> Vec<String> {
    engine
        .submissions_of("calculate_job")
        .iter()
        .map(|s| s.payload["path"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_stop_after_completed_step() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::new(|command, payload| match command {
        "calculate_job" if payload["path"] == "/b" => Reply::Hang,
        "calculate_job" => Reply::Success(echo_outputs(payload)),
        _ => Reply::Success(JsonMap::new()),
    }));
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let files = vec![
        step("/a", 0, vec![number("Width", 2.0)]),
        step("/b", 1, Vec::new()),
        step("/c", 2, Vec::new()),
    ];
    executor.submit_workflow("w10", chain(files, Vec::new())).await.unwrap();
    wait_for_calculations(&engine, 2).await;

    assert!(executor.stop_workflow("w10").await);
    let state = finished(&executor, "w10").await;

    assert_eq!(state.status, WorkflowStatus::Stopped);
    assert_eq!(state.completed_files, vec!["/a"]);
    assert_eq!(state.current_file_index, 1);
    assert!(state.final_results.is_none());
    assert_eq!(calculated_paths(&engine), vec!["/a", "/b"]);
}

#[tokio::test]
async fn test_stop_is_honoured_after_non_fatal_failure() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(failing_then_hanging());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let files = vec![
        step("/a", 0, Vec::new()),
        step("/b", 1, Vec::new()),
        step("/c", 2, Vec::new()),
        step("/d", 3, Vec::new()),
    ];
    let mut config = chain(files, Vec::new());
    config.stop_on_error = false;
    executor.submit_workflow("w11", config.clone()).await.unwrap();
    wait_for_calculations(&engine, 2).await;

    let mid_run = executor.get_state("w11").await.unwrap();
    assert_eq!(mid_run.status, WorkflowStatus::Failed);
    assert!(!mid_run.is_finished());

    // The first routine is still driving the engine
    let err = executor.submit_workflow("w11", config).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::WorkflowAlreadyRunning(id) if id == "w11"));

    assert!(executor.stop_workflow("w11").await);
    assert!(!executor.stop_workflow("w11").await);

    let state = finished(&executor, "w11").await;
    assert_eq!(state.status, WorkflowStatus::Stopped);
    assert!(state.stop_requested);
    assert!(state.completed_files.is_empty());
    assert!(state.error.is_some());
    assert_eq!(calculated_paths(&engine), vec!["/a", "/b"]);
}

#[tokio::test]
async fn test_stop_is_noop_on_completed_workflow() {
    let dir = TempDir::new().unwrap();
    let engine = Arc::new(ScriptedEngine::echo());
    let executor = WorkflowExecutor::new(engine.clone(), settings(dir.path()));

    let config = chain(vec![step("/sheets/a.mcdx", 0, Vec::new())], Vec::new());
    executor.submit_workflow("w12", config.clone()).await.unwrap();
    let state = finished(&executor, "w12").await;
    assert_eq!(state.status, WorkflowStatus::Completed);

    assert!(!executor.stop_workflow("w12").await);
    let state = executor.get_state("w12").await.unwrap();
    assert_eq!(state.status, WorkflowStatus::Completed);
    assert!(!state.stop_requested);
    assert!(state.final_results.is_some());

    // A finished id may be submitted again
    executor.submit_workflow("w12", config).await.unwrap();
    finished(&executor, "w12").await;
    assert_eq!(engine.submissions_of("calculate_job").len(), 2);
}
