//! End-to-end tests against the real `calcflow --sidecar` process

use calcflow_config::{BatchSettings, EngineConfig};
use calcflow_execution::{EngineError, EngineSupervisor};
use calcflow_ipc::{JobCommand, JsonMap};
use calcflow_orchestration::{BatchExecutor, BatchRequest, BatchStatus, JobPoller, RowStatus};
use serde_json::{json, Value as JsonValue};
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const CALCFLOW: &str = env!("CARGO_BIN_EXE_calcflow");

fn engine_config() -> EngineConfig {
    EngineConfig {
        sidecar_program: Some(PathBuf::from(CALCFLOW)),
        ..EngineConfig::default()
    }
}

fn poller() -> JobPoller {
    JobPoller::new(Duration::from_secs(10), Duration::from_millis(20))
}

fn payload(value: JsonValue) -> JsonMap {
    match value {
        JsonValue::Object(map) => map,
        _ => panic!("payload must be an object"),
    }
}

fn worksheet(dir: &TempDir, name: &str) -> String {
    let path = dir.path().join(name);
    std::fs::write(&path, b"worksheet").unwrap();
    path.display().to_string()
}

#[tokio::test]
async fn test_ping_round_trip() {
    let supervisor = EngineSupervisor::new(engine_config());
    supervisor.start().await.unwrap();
    assert!(supervisor.is_running().await);

    let job_id = supervisor
        .submit("ping", payload(json!({"echo": "hello"})))
        .await
        .unwrap();
    let result = poller().wait(&supervisor, &job_id).await.unwrap();

    assert_eq!(result.job_id, job_id);
    assert!(result.is_success());
    assert_eq!(result.data["echo"], "hello");

    supervisor.stop().await.unwrap();
    assert!(!supervisor.is_running().await);
}

#[tokio::test]
async fn test_unknown_command_is_reported() {
    let supervisor = EngineSupervisor::new(engine_config());
    supervisor.start().await.unwrap();

    let job_id = supervisor.submit("explode", JsonMap::new()).await.unwrap();
    let result = poller().wait(&supervisor, &job_id).await.unwrap();
    assert!(!result.is_success());
    assert!(result
        .error_message
        .unwrap()
        .contains("Unknown command: explode"));

    // The sidecar keeps serving after a failed job
    let job_id = supervisor.submit("ping", JsonMap::new()).await.unwrap();
    assert!(poller().wait(&supervisor, &job_id).await.unwrap().is_success());

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_replaces_process_and_forgets_results() {
    let supervisor = EngineSupervisor::new(engine_config());
    supervisor.start().await.unwrap();
    let first_pid = supervisor.pid().await.unwrap();

    let job_id = supervisor.submit("ping", JsonMap::new()).await.unwrap();
    poller().wait(&supervisor, &job_id).await.unwrap();

    supervisor.restart().await.unwrap();
    let second_pid = supervisor.pid().await.unwrap();
    assert_ne!(first_pid, second_pid);
    assert!(supervisor.get_job(&job_id).await.is_none());

    // Connection state does not survive a restart
    let job_id = supervisor
        .submit("calculate_job", JsonMap::new())
        .await
        .unwrap();
    let result = poller().wait(&supervisor, &job_id).await.unwrap();
    assert!(!result.is_success());

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let supervisor = EngineSupervisor::new(engine_config());
    supervisor.start().await.unwrap();
    supervisor.stop().await.unwrap();
    supervisor.stop().await.unwrap();

    let err = supervisor.submit("ping", JsonMap::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::EngineNotRunning));
}

#[tokio::test]
async fn test_metadata_after_calculation() {
    let dir = TempDir::new().unwrap();
    let sheet = worksheet(&dir, "beam.mcdx");
    let supervisor = EngineSupervisor::new(engine_config());
    supervisor.start().await.unwrap();
    let poller = poller();

    poller
        .run_command(&supervisor, JobCommand::Connect, JsonMap::new())
        .await
        .unwrap();
    let outputs = poller
        .run_command(
            &supervisor,
            JobCommand::CalculateJob,
            payload(json!({
                "path": sheet,
                "inputs": [{"alias": "L", "value": 12.5, "units": "ft"}],
            })),
        )
        .await
        .unwrap();
    assert_eq!(outputs["L"], json!(12.5));

    let metadata = poller
        .run_command(&supervisor, JobCommand::GetMetadata, JsonMap::new())
        .await
        .unwrap();
    assert_eq!(metadata["path"], json!(sheet));
    assert_eq!(metadata["inputs"][0]["alias"], "L");
    assert_eq!(metadata["inputs"][0]["units"], "ft");

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_batch_against_real_sidecar() {
    let dir = TempDir::new().unwrap();
    let sheet = worksheet(&dir, "beam.mcdx");
    let output_dir = dir.path().join("out");

    let supervisor = Arc::new(EngineSupervisor::new(engine_config()));
    supervisor.start().await.unwrap();
    poller()
        .run_command(supervisor.as_ref(), JobCommand::Connect, JsonMap::new())
        .await
        .unwrap();

    let settings = BatchSettings {
        job_timeout: Duration::from_secs(10),
        poll_interval: Duration::from_millis(20),
        max_retries: 1,
    };
    let executor = BatchExecutor::new(supervisor.clone(), settings);
    executor
        .start_batch(BatchRequest {
            batch_id: "e2e".to_string(),
            rows: vec![
                payload(json!({"path": sheet, "L": 10})),
                payload(json!({"path": sheet, "L": 20})),
            ],
            output_dir: output_dir.clone(),
            export_pdf: true,
            export_mcdx: false,
        })
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    let state = loop {
        let state = executor.get_status("e2e").await.unwrap();
        if state.is_finished() {
            break state;
        }
        assert!(tokio::time::Instant::now() < deadline, "batch did not finish");
        tokio::time::sleep(Duration::from_millis(50)).await;
    };

    assert_eq!(state.status, BatchStatus::Completed);
    assert!(state.results.iter().all(|row| row.status == RowStatus::Success));
    assert_eq!(state.results[1].data["L"], json!(20.0));
    assert!(output_dir.join("beam_L-10.pdf").is_file());
    assert!(output_dir.join("beam_L-20.pdf").is_file());

    let snapshot: JsonValue =
        serde_json::from_slice(&std::fs::read(output_dir.join("beam_L-20.pdf")).unwrap()).unwrap();
    assert_eq!(snapshot["values"]["L"], json!(20.0));

    supervisor.stop().await.unwrap();
}

#[test]
fn test_cli_job_prints_result() {
    let output = Command::new(CALCFLOW)
        .args(["job", "ping", "--payload", r#"{"n": 1}"#])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let result: JsonValue = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "success");
    assert_eq!(result["data"]["n"], 1);
}

#[test]
fn test_cli_failed_job_exits_with_error() {
    let output = Command::new(CALCFLOW)
        .args(["job", "calculate_job"])
        .output()
        .unwrap();
    assert!(!output.status.success());

    let result: JsonValue = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(result["status"], "error");
}

#[test]
fn test_cli_batch_writes_exports() {
    let dir = TempDir::new().unwrap();
    let sheet = worksheet(&dir, "frame.mcdx");
    let rows = dir.path().join("rows.json");
    std::fs::write(&rows, r#"[{"H": 3}, {"H": 4.5}]"#).unwrap();
    let output_dir = dir.path().join("exports");

    let output = Command::new(CALCFLOW)
        .arg("batch")
        .arg("--rows")
        .arg(&rows)
        .arg("--output-dir")
        .arg(&output_dir)
        .args(["--file", &sheet, "--batch-id", "cli", "--mcdx"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let state: JsonValue = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(state["status"], "completed");
    assert_eq!(state["completed"], 2);
    for name in ["frame_H-3.pdf", "frame_H-3.mcdx", "frame_H-4.5.pdf", "frame_H-4.5.mcdx"] {
        assert!(output_dir.join(name).is_file(), "missing {}", name);
    }
}

#[test]
fn test_cli_config_generate_and_show() {
    let dir = TempDir::new().unwrap();
    let config_file = dir.path().join("calcflow.yaml");

    let status = Command::new(CALCFLOW)
        .arg("config")
        .arg("generate")
        .arg("--output")
        .arg(&config_file)
        .status()
        .unwrap();
    assert!(status.success());

    let output = Command::new(CALCFLOW)
        .arg("--config")
        .arg(&config_file)
        .args(["config", "show", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let shown: JsonValue = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["engine"]["sidecar_args"], json!(["--sidecar"]));
}
