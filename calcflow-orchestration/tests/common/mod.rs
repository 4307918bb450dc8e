//! Scripted job engine for executor tests

use async_trait::async_trait;
use calcflow_execution::{EngineError, JobEngine};
use calcflow_ipc::{JobResult, JsonMap};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// What the engine does with a submitted job
pub enum Reply {
    Success(JsonMap),
    Error(String),
    /// Never produce a result
    Hang,
}

type Responder = Box<dyn FnMut(&str, &JsonMap) -> Reply + Send>;

#[derive(Debug, Clone)]
pub struct Submission {
    pub command: String,
    pub payload: JsonMap,
}

struct Inner {
    responder: Responder,
    results: HashMap<String, JobResult>,
    submissions: Vec<Submission>,
    restarts: u32,
    next_id: u64,
}

/// Answers every job synchronously through a caller-supplied responder
pub struct ScriptedEngine {
    inner: Mutex<Inner>,
}

impl ScriptedEngine {
    pub fn new(responder: impl FnMut(&str, &JsonMap) -> Reply + Send + 'static) -> Self {
        Self {
            inner: Mutex::new(Inner {
                responder: Box::new(responder),
                results: HashMap::new(),
                submissions: Vec::new(),
                restarts: 0,
                next_id: 0,
            }),
        }
    }

    /// Engine that echoes calculation inputs back as outputs
    pub fn echo() -> Self {
        Self::new(|command, payload| match command {
            "calculate_job" => Reply::Success(echo_outputs(payload)),
            _ => Reply::Success(JsonMap::new()),
        })
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.inner.lock().unwrap().submissions.clone()
    }

    pub fn submissions_of(&self, command: &str) -> Vec<Submission> {
        self.submissions()
            .into_iter()
            .filter(|s| s.command == command)
            .collect()
    }

    pub fn restarts(&self) -> u32 {
        self.inner.lock().unwrap().restarts
    }
}

#[async_trait]
impl JobEngine for ScriptedEngine {
    async fn submit(&self, command: &str, payload: JsonMap) -> Result<String, EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let job_id = format!("job-{}", inner.next_id);

        let reply = (inner.responder)(command, &payload);
        inner.submissions.push(Submission {
            command: command.to_string(),
            payload,
        });

        match reply {
            Reply::Success(data) => {
                inner
                    .results
                    .insert(job_id.clone(), JobResult::success(&job_id, data));
            }
            Reply::Error(message) => {
                inner
                    .results
                    .insert(job_id.clone(), JobResult::error(&job_id, message));
            }
            Reply::Hang => {}
        }
        Ok(job_id)
    }

    async fn get_job(&self, job_id: &str) -> Option<JobResult> {
        self.inner.lock().unwrap().results.get(job_id).cloned()
    }

    async fn restart(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().unwrap();
        inner.restarts += 1;
        inner.results.clear();
        Ok(())
    }

    async fn is_running(&self) -> bool {
        true
    }
}

/// Map every `inputs[*].alias` to its `value`
pub fn echo_outputs(payload: &JsonMap) -> JsonMap {
    let mut outputs = JsonMap::new();
    if let Some(inputs) = payload.get("inputs").and_then(|v| v.as_array()) {
        for input in inputs {
            if let (Some(alias), Some(value)) = (input["alias"].as_str(), input.get("value")) {
                outputs.insert(alias.to_string(), value.clone());
            }
        }
    }
    outputs
}

/// Input value submitted for `alias` in a calculate payload
pub fn input_value(payload: &JsonMap, alias: &str) -> Option<serde_json::Value> {
    payload
        .get("inputs")?
        .as_array()?
        .iter()
        .find(|input| input["alias"] == alias)
        .map(|input| input["value"].clone())
}

pub const FAST_TIMEOUT: Duration = Duration::from_millis(300);
pub const FAST_POLL: Duration = Duration::from_millis(5);

/// Poll `check` until it returns a value or five seconds pass
pub async fn eventually<T, F, Fut>(mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
